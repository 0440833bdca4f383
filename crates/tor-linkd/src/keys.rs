//! Ed25519 keys, and a simple certificate format that ties them
//! together.
//!
//! A relay has a long-term identity key, and a link key that signs its
//! LINK_AUTH cells.  Its certificate is the identity key, then the link
//! key, then the identity key's signature over the link key.

use std::convert::TryInto;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use tor_link::{Error, PeerKeys, RelayId, Result, TrustStore};

/// Length of an encoded certificate.
const CERT_LEN: usize = 32 + 32 + 64;

/// A [`TrustStore`] holding our own keys.
///
/// It believes any well-formed certificate whose signature checks out;
/// there is no list of known relays.
pub(crate) struct KeyTrustStore {
    /// Long-term identity key.
    identity: SigningKey,
    /// Key for signing LINK_AUTH.
    link: SigningKey,
    /// Our certificate, encoded.
    cert: Vec<u8>,
}

impl KeyTrustStore {
    /// Make a trust store with fresh keys.
    pub(crate) fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let identity = SigningKey::generate(rng);
        let link = SigningKey::generate(rng);
        let cert = encode_cert(&identity, &link.verifying_key());
        KeyTrustStore {
            identity,
            link,
            cert,
        }
    }
}

/// Certify `link` with `identity`.
fn encode_cert(identity: &SigningKey, link: &VerifyingKey) -> Vec<u8> {
    let mut cert = Vec::with_capacity(CERT_LEN);
    cert.extend_from_slice(identity.verifying_key().as_bytes());
    cert.extend_from_slice(link.as_bytes());
    cert.extend_from_slice(&identity.sign(link.as_bytes()).to_bytes());
    cert
}

/// Helper: make a certificate error.
fn bad_cert(why: &str) -> Error {
    Error::ChanProto(format!("bad certificate: {}", why))
}

impl TrustStore for KeyTrustStore {
    fn own_identity(&self) -> RelayId {
        self.identity.verifying_key().to_bytes().into()
    }

    fn own_certs(&self) -> Vec<Vec<u8>> {
        vec![self.cert.clone()]
    }

    fn check_certs(&self, certs: &[Vec<u8>]) -> Result<PeerKeys> {
        let cert = certs.first().ok_or_else(|| bad_cert("none sent"))?;
        if cert.len() != CERT_LEN {
            return Err(bad_cert("wrong length"));
        }
        let id_bytes: [u8; 32] = cert[..32].try_into().map_err(|_| bad_cert("identity"))?;
        let link_bytes: [u8; 32] = cert[32..64].try_into().map_err(|_| bad_cert("link key"))?;
        let sig_bytes: [u8; 64] = cert[64..].try_into().map_err(|_| bad_cert("signature"))?;

        let identity = VerifyingKey::from_bytes(&id_bytes).map_err(|_| bad_cert("identity"))?;
        let link = VerifyingKey::from_bytes(&link_bytes).map_err(|_| bad_cert("link key"))?;
        let sig = Signature::from_bytes(&sig_bytes);
        identity
            .verify_strict(&link_bytes, &sig)
            .map_err(|_| bad_cert("signature doesn't verify"))?;

        Ok(PeerKeys {
            identity: id_bytes.into(),
            signing_key: link,
        })
    }

    fn sign(&self, digest: &[u8; 32]) -> Signature {
        self.link.sign(&digest[..])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ed25519_dalek::Verifier;

    #[test]
    fn certify() {
        let mut rng = rand::rngs::OsRng;
        let a = KeyTrustStore::generate(&mut rng);
        let b = KeyTrustStore::generate(&mut rng);

        let keys = b.check_certs(&a.own_certs()).unwrap();
        assert_eq!(keys.identity, a.own_identity());
        let sig = a.sign(&[9; 32]);
        assert!(keys.signing_key.verify(&[9; 32], &sig).is_ok());
    }

    #[test]
    fn reject() {
        let mut rng = rand::rngs::OsRng;
        let a = KeyTrustStore::generate(&mut rng);

        assert!(a.check_certs(&[]).is_err());
        assert!(a.check_certs(&[vec![0; 12]]).is_err());

        let mut cert = a.own_certs().remove(0);
        cert[40] ^= 1;
        assert!(a.check_certs(&[cert]).is_err());
    }
}
