//! Traits for the things a link engine talks to but does not implement.
//!
//! The engine knows how to turn bytes into cells and how to run the
//! link handshake.  Encrypting the stream, judging certificates, and
//! building circuits are somebody else's job: the engine reaches those
//! through the traits in this module.

use std::io::{Read, Write};
use std::net::IpAddr;

use ed25519_dalek::{Signature, VerifyingKey};
use tor_cell::chancell::msg::DestroyReason;
use tor_cell::chancell::{CircId, RawCellBody};

use crate::connmap::ConnHandle;
use crate::Result;

/// A byte stream to a peer relay.
///
/// Normally this is a TLS session.  Reads and writes must be
/// non-blocking: a transport with nothing to give (or no room to take)
/// returns [`std::io::ErrorKind::WouldBlock`].
pub trait Transport: Read + Write {
    /// Return the number of bytes this transport has already decrypted
    /// and is holding, which socket readiness will not announce.
    fn pending_bytes(&self) -> usize {
        0
    }

    /// Return material that binds an authentication to this particular
    /// session.  Both ends of a session must return the same value.
    fn binding_material(&self) -> Vec<u8>;
}

/// The 32-byte Ed25519 identity of a relay.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct RelayId([u8; 32]);

impl RelayId {
    /// Return the bytes of this identity.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for RelayId {
    fn from(id: [u8; 32]) -> Self {
        RelayId(id)
    }
}

impl std::fmt::Display for RelayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "...")
    }
}

impl std::fmt::Debug for RelayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RelayId({})", self)
    }
}

/// What a [`TrustStore`] learned from a peer's CERT cell.
#[derive(Clone, Debug)]
pub struct PeerKeys {
    /// The peer's identity.
    pub identity: RelayId,
    /// The key the peer will sign its LINK_AUTH with.
    pub signing_key: VerifyingKey,
}

/// Holds our own keys, and decides whether to believe other relays' certificates.
pub trait TrustStore {
    /// Return our own identity.
    fn own_identity(&self) -> RelayId;
    /// Return the certificate blobs to send in our CERT cell.
    fn own_certs(&self) -> Vec<Vec<u8>>;
    /// Check the certificate blobs a peer sent, and return the keys
    /// they certify.
    fn check_certs(&self, certs: &[Vec<u8>]) -> Result<PeerKeys>;
    /// Sign a link authentication digest with our signing key.
    fn sign(&self, digest: &[u8; 32]) -> Signature;
}

/// Decides which addresses are local, and so exempt from bandwidth charges.
pub trait LocalAddrPolicy {
    /// Return true if `addr` is local.
    fn is_local(&self, addr: &IpAddr) -> bool;
}

/// The default [`LocalAddrPolicy`]: only loopback addresses are local.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackOnly;

impl LocalAddrPolicy for LoopbackOnly {
    fn is_local(&self, addr: &IpAddr) -> bool {
        addr.is_loopback()
    }
}

/// Whether a circuit is still being built.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CircState {
    /// We are waiting for a CREATED cell.
    PendingCreate,
    /// The circuit can carry relay cells.
    Open,
}

/// Which side of a circuit a (connection, circuit ID) pair names.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CircSide {
    /// The hop closer to the circuit's origin.
    Prev,
    /// The hop further from the circuit's origin.
    Next,
}

/// Which way a relay cell is travelling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Toward the circuit's origin.
    TowardOrigin,
    /// Away from the circuit's origin.
    AwayFromOrigin,
}

/// What the circuit layer says about a circuit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CircInfo {
    /// Is the circuit built yet?
    pub state: CircState,
    /// Did this relay create the circuit?
    pub is_origin: bool,
    /// Which side of the circuit was looked up.
    pub side: CircSide,
}

/// The handshake carried by a create-style cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateRequest {
    /// A CREATE cell's TAP handshake.
    Tap(Vec<u8>),
    /// A CREATE_FAST cell's key material.
    Fast(Vec<u8>),
}

/// The handshake reply carried by a created-style cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateResponse {
    /// A CREATED cell's TAP reply.
    Tap(Vec<u8>),
    /// A CREATED_FAST cell's reply.
    Fast(Vec<u8>),
}

/// The circuit layer, as seen from the link layer.
///
/// Circuits are named by the connection they arrived on and their
/// circuit ID on that connection.
pub trait CircuitLayer {
    /// Look up the circuit that uses `id` on `conn`.
    fn lookup(&self, conn: ConnHandle, id: CircId) -> Option<CircInfo>;
    /// Return true if this relay is hibernating, and refuses new circuits.
    fn is_hibernating(&self) -> bool;
    /// Begin building a circuit that a peer asked for.
    fn handle_create(&mut self, conn: ConnHandle, id: CircId, req: CreateRequest);
    /// Finish building a circuit that we extended.
    fn handle_created(&mut self, conn: ConnHandle, id: CircId, reply: CreateResponse);
    /// Hand a relay cell body to a circuit.
    fn deliver_relay(
        &mut self,
        conn: ConnHandle,
        id: CircId,
        dir: Direction,
        body: Box<RawCellBody>,
    ) -> Result<()>;
    /// Tell a circuit that one of its hops destroyed it.
    fn handle_destroy(
        &mut self,
        conn: ConnHandle,
        id: CircId,
        side: CircSide,
        reason: DestroyReason,
    );
    /// Close a circuit because of something the link layer saw.
    fn mark_for_close(&mut self, conn: ConnHandle, id: CircId, reason: DestroyReason);
    /// Tell the circuit layer that a connection is gone for good.
    fn connection_closed(&mut self, conn: ConnHandle);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn loopback_policy() {
        let p = LoopbackOnly;
        assert!(p.is_local(&"127.0.0.1".parse().unwrap()));
        assert!(p.is_local(&"::1".parse().unwrap()));
        assert!(!p.is_local(&"192.0.2.1".parse().unwrap()));
    }

    #[test]
    fn relay_id_display() {
        let id: RelayId = [0xab; 32].into();
        assert_eq!(id.to_string(), "abababab...");
        assert_eq!(format!("{:?}", id), "RelayId(abababab...)");
    }
}
