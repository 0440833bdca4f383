//! Implementations for the link handshake.
//!
//! A link begins with both parties sending VERSIONS.  If they share a
//! version of 2 or higher, each then sends NETINFO and CERT, and once
//! the initiator has both of those from the responder it proves its
//! identity with LINK_AUTH.  On a link that ends up at version 1, none
//! of that happens and the link is usable (but unauthenticated) as
//! soon as the versions are known.

use std::net::IpAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use ed25519_dalek::{Signature, Verifier};
use sha2::{Digest, Sha256};
use tor_cell::chancell::msg::{self, ChanMsg};
use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::conn::{CloseReason, Connection, Role};
use crate::traits::{PeerKeys, RelayId, Transport, TrustStore};
use crate::{Error, Result};

/// Where a link is in its handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandshakeStage {
    /// Nothing has happened yet.
    Unstarted,
    /// Waiting for the peer's VERSIONS.
    AwaitingVersions,
    /// We know the link version, but haven't sent NETINFO and CERT yet.
    VersionsNegotiated,
    /// Waiting for the peer's NETINFO and CERT.
    AwaitingNetinfoAndCert {
        /// Have we got the NETINFO?
        netinfo: bool,
        /// Have we got the CERT?
        certs: bool,
    },
    /// A responder with NETINFO and CERT, waiting for LINK_AUTH.
    Authenticating,
    /// The link can carry circuit cells.
    Open,
    /// The connection has been marked for close.
    Closed(CloseReason),
}

/// The state of one connection's link handshake.
#[derive(Clone, Debug)]
pub struct HandshakeState {
    /// Current stage.
    stage: HandshakeStage,
    /// Which end of the link we are.
    role: Role,
    /// Negotiated link protocol, or 0 if we don't know it yet.
    link_proto: u16,
    /// When we sent our VERSIONS.
    sent_versions_at: Option<Instant>,
    /// How far the peer's clock is behind ours, in seconds.
    apparent_skew: Option<i64>,
    /// The address the peer says it sees us at.
    observed_addr: Option<IpAddr>,
    /// The addresses the peer claims for itself.
    peer_addrs: Vec<IpAddr>,
    /// True if the peer claims the address we see it at.
    apparently_canonical: bool,
    /// Keys the peer's CERT cell certified.
    peer_keys: Option<PeerKeys>,
}

impl HandshakeState {
    /// Make a new state for a link where we play `role`.
    pub(crate) fn new(role: Role) -> Self {
        HandshakeState {
            stage: HandshakeStage::Unstarted,
            role,
            link_proto: 0,
            sent_versions_at: None,
            apparent_skew: None,
            observed_addr: None,
            peer_addrs: Vec::new(),
            apparently_canonical: false,
            peer_keys: None,
        }
    }

    /// Return the current stage.
    pub fn stage(&self) -> &HandshakeStage {
        &self.stage
    }
    /// Return our role on this link.
    pub fn role(&self) -> Role {
        self.role
    }
    /// Return the negotiated link protocol, or 0 if none yet.
    pub fn link_proto(&self) -> u16 {
        self.link_proto
    }
    /// Return true if the peer's VERSIONS has arrived.
    pub fn received_versions(&self) -> bool {
        self.link_proto != 0
    }
    /// Return true if the peer's NETINFO has arrived.
    pub fn received_netinfo(&self) -> bool {
        match self.stage {
            HandshakeStage::AwaitingNetinfoAndCert { netinfo, .. } => netinfo,
            HandshakeStage::Authenticating | HandshakeStage::Open => self.link_proto >= 2,
            _ => false,
        }
    }
    /// Return true if the peer's CERT has arrived.
    pub fn received_certs(&self) -> bool {
        match self.stage {
            HandshakeStage::AwaitingNetinfoAndCert { certs, .. } => certs,
            HandshakeStage::Authenticating | HandshakeStage::Open => self.link_proto >= 2,
            _ => false,
        }
    }
    /// Return true if the link is open and we know who the peer is.
    pub fn authenticated(&self) -> bool {
        self.stage == HandshakeStage::Open && self.peer_keys.is_some()
    }
    /// Return true if the link can carry circuit cells.
    pub fn is_open(&self) -> bool {
        self.stage == HandshakeStage::Open
    }
    /// Return the peer's clock skew in seconds (positive if the peer is
    /// behind us), if we measured it.
    pub fn apparent_skew(&self) -> Option<i64> {
        self.apparent_skew
    }
    /// Return the address the peer says it sees us at.
    pub fn observed_addr(&self) -> Option<IpAddr> {
        self.observed_addr
    }
    /// Return the addresses the peer claims for itself.
    pub fn peer_addrs(&self) -> &[IpAddr] {
        &self.peer_addrs[..]
    }
    /// Return true if the peer claims the address we see it at.
    pub fn apparently_canonical(&self) -> bool {
        self.apparently_canonical
    }
    /// Return the peer's identity, if its CERT has been checked.
    pub fn peer_identity(&self) -> Option<RelayId> {
        self.peer_keys.as_ref().map(|k| k.identity)
    }

    /// Move to the Closed stage.
    pub(crate) fn close(&mut self, reason: CloseReason) {
        if !matches!(self.stage, HandshakeStage::Closed(_)) {
            self.stage = HandshakeStage::Closed(reason);
        }
    }
}

/// What handshake and dispatch code needs from the engine.
pub(crate) struct LinkCtx<'a, S> {
    /// Engine configuration.
    pub(crate) config: &'a LinkConfig,
    /// Our keys, and our judge of other relays' certificates.
    pub(crate) trust: &'a S,
    /// Monotonic time.
    pub(crate) now: Instant,
    /// Wall-clock time.
    pub(crate) wallclock: SystemTime,
}

impl<'a, S> LinkCtx<'a, S> {
    /// Return the wall-clock time in seconds since the epoch.
    fn unix_secs(&self) -> u64 {
        self.wallclock
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Compute the digest that a LINK_AUTH cell signs.
///
/// It covers both parties' identities and the session's binding
/// material, so a signature can't be replayed on another link.
pub(crate) fn link_auth_digest(
    initiator: &RelayId,
    responder: &RelayId,
    binding: &[u8],
) -> [u8; 32] {
    let mut d = Sha256::new();
    d.update(b"LINK_AUTH");
    d.update(initiator.as_bytes());
    d.update(responder.as_bytes());
    d.update(binding);
    d.finalize().into()
}

impl<T: Transport> Connection<T> {
    /// Begin the link handshake.  An initiator speaks first.
    pub(crate) fn start_handshake<S: TrustStore>(&mut self, ctx: &LinkCtx<'_, S>) -> Result<()> {
        self.handshake.stage = HandshakeStage::AwaitingVersions;
        if self.handshake.role == Role::Initiator {
            self.send_versions(ctx)?;
        }
        Ok(())
    }

    /// Queue our VERSIONS cell.
    fn send_versions<S>(&mut self, ctx: &LinkCtx<'_, S>) -> Result<()> {
        let versions = msg::Versions::new(ctx.config.link_protocols.clone())?;
        self.queue_cell(versions.into())?;
        self.handshake.sent_versions_at = Some(ctx.now);
        trace!("{}: Sent VERSIONS", self.unique_id);
        Ok(())
    }

    /// Handle a handshake cell from the peer.
    ///
    /// An error means the connection must close.  Duplicates and
    /// harmless surprises are logged and dropped.
    pub(crate) fn handle_handshake_msg<S: TrustStore>(
        &mut self,
        ctx: &LinkCtx<'_, S>,
        msg: ChanMsg,
    ) -> Result<()> {
        match msg {
            ChanMsg::Versions(v) => self.handle_versions(ctx, v),
            ChanMsg::Netinfo(n) => self.handle_netinfo(ctx, n),
            ChanMsg::Certs(c) => self.handle_certs(ctx, c),
            ChanMsg::LinkAuth(a) => self.handle_link_auth(ctx, a),
            other => Err(Error::InternalError(format!(
                "{} is not a handshake message",
                other.cmd()
            ))),
        }
    }

    /// Handle a VERSIONS cell.
    fn handle_versions<S: TrustStore>(
        &mut self,
        ctx: &LinkCtx<'_, S>,
        versions: msg::Versions,
    ) -> Result<()> {
        if self.handshake.received_versions() {
            warn!("{}: Dropping duplicate VERSIONS cell", self.unique_id);
            return Ok(());
        }
        if self.handshake.stage != HandshakeStage::AwaitingVersions {
            return Err(Error::InternalError(format!(
                "VERSIONS in stage {:?}",
                self.handshake.stage
            )));
        }
        if self.handshake.role == Role::Responder {
            self.send_versions(ctx)?;
        }

        let link_proto = versions
            .best_shared_link_protocol(ctx.config.link_protocols())
            .unwrap_or(1);
        self.handshake.link_proto = link_proto;
        debug!(
            "{}: Negotiated link protocol {} (peer offered {:?})",
            self.unique_id,
            link_proto,
            versions.versions()
        );

        if link_proto < 2 {
            info!(
                "{}: Link open with legacy protocol; peer not authenticated",
                self.unique_id
            );
            self.handshake.stage = HandshakeStage::Open;
            return Ok(());
        }

        self.handshake.stage = HandshakeStage::VersionsNegotiated;
        let netinfo = msg::Netinfo::new(
            ctx.unix_secs() as u32,
            Some(self.real_addr.ip()),
            ctx.config.advertised_addrs.clone(),
        );
        self.queue_cell(netinfo.into())?;
        let certs = msg::Certs::new(ctx.trust.own_certs())?;
        self.queue_cell(certs.into())?;
        self.handshake.stage = HandshakeStage::AwaitingNetinfoAndCert {
            netinfo: false,
            certs: false,
        };
        Ok(())
    }

    /// Handle a NETINFO cell.
    fn handle_netinfo<S: TrustStore>(
        &mut self,
        ctx: &LinkCtx<'_, S>,
        netinfo: msg::Netinfo,
    ) -> Result<()> {
        if !self.handshake.received_versions() {
            return Err(Error::ChanProto("NETINFO before VERSIONS".into()));
        }
        if self.handshake.link_proto < 2 {
            debug!("{}: Dropping NETINFO on legacy link", self.unique_id);
            return Ok(());
        }
        let certs = match self.handshake.stage {
            HandshakeStage::AwaitingNetinfoAndCert {
                netinfo: false,
                certs,
            } => certs,
            _ => {
                warn!("{}: Dropping duplicate NETINFO cell", self.unique_id);
                return Ok(());
            }
        };

        if let Some(sent) = self.handshake.sent_versions_at {
            if ctx.now.saturating_duration_since(sent) < ctx.config.skew_tolerance {
                let skew = ctx.unix_secs() as i64 - i64::from(netinfo.timestamp());
                if skew.abs() > 3600 {
                    info!(
                        "{}: Peer's clock is off from ours by {} seconds",
                        self.unique_id, skew
                    );
                }
                self.handshake.apparent_skew = Some(skew);
            }
        }
        self.handshake.observed_addr = netinfo.their_addr().copied();
        self.handshake.peer_addrs = netinfo.my_addrs().to_vec();
        self.handshake.apparently_canonical = netinfo.my_addrs().contains(&self.real_addr.ip());

        self.handshake.stage = HandshakeStage::AwaitingNetinfoAndCert {
            netinfo: true,
            certs,
        };
        self.maybe_finish_handshake(ctx)
    }

    /// Handle a CERT cell.
    fn handle_certs<S: TrustStore>(
        &mut self,
        ctx: &LinkCtx<'_, S>,
        certs: msg::Certs,
    ) -> Result<()> {
        if !self.handshake.received_versions() {
            return Err(Error::ChanProto("CERT before VERSIONS".into()));
        }
        if self.handshake.link_proto < 2 {
            debug!("{}: Dropping CERT on legacy link", self.unique_id);
            return Ok(());
        }
        let netinfo = match self.handshake.stage {
            HandshakeStage::AwaitingNetinfoAndCert {
                netinfo,
                certs: false,
            } => netinfo,
            _ => {
                warn!("{}: Dropping duplicate CERT cell", self.unique_id);
                return Ok(());
            }
        };

        let keys = ctx.trust.check_certs(certs.certs())?;
        debug!("{}: Peer certified identity {}", self.unique_id, keys.identity);
        self.handshake.peer_keys = Some(keys);
        self.handshake.stage = HandshakeStage::AwaitingNetinfoAndCert {
            netinfo,
            certs: true,
        };
        self.maybe_finish_handshake(ctx)
    }

    /// Once NETINFO and CERT are both in, move on: an initiator
    /// authenticates and opens, a responder waits for LINK_AUTH.
    fn maybe_finish_handshake<S: TrustStore>(&mut self, ctx: &LinkCtx<'_, S>) -> Result<()> {
        if self.handshake.stage
            != (HandshakeStage::AwaitingNetinfoAndCert {
                netinfo: true,
                certs: true,
            })
        {
            return Ok(());
        }
        match self.handshake.role {
            Role::Initiator => {
                let peer = self
                    .handshake
                    .peer_identity()
                    .ok_or_else(|| Error::InternalError("no peer keys after CERT".into()))?;
                let digest = link_auth_digest(
                    &ctx.trust.own_identity(),
                    &peer,
                    &self.transport.binding_material(),
                );
                let sig = ctx.trust.sign(&digest);
                let auth = msg::LinkAuth::new(msg::LINK_AUTH_FORMAT_ED25519, &sig.to_bytes()[..]);
                self.queue_cell(auth.into())?;
                self.handshake.stage = HandshakeStage::Open;
                info!("{}: Link open to {}", self.unique_id, peer);
            }
            Role::Responder => {
                trace!("{}: Waiting for LINK_AUTH", self.unique_id);
                self.handshake.stage = HandshakeStage::Authenticating;
            }
        }
        Ok(())
    }

    /// Handle a LINK_AUTH cell.
    fn handle_link_auth<S: TrustStore>(
        &mut self,
        ctx: &LinkCtx<'_, S>,
        auth: msg::LinkAuth,
    ) -> Result<()> {
        if self.handshake.role == Role::Initiator {
            return Err(Error::ChanProto("LINK_AUTH from responder".into()));
        }
        if self.handshake.received_versions() && self.handshake.link_proto < 2 {
            debug!("{}: Dropping LINK_AUTH on legacy link", self.unique_id);
            return Ok(());
        }
        match self.handshake.stage {
            HandshakeStage::Authenticating => {}
            HandshakeStage::Open if self.handshake.authenticated() => {
                warn!("{}: Dropping duplicate LINK_AUTH cell", self.unique_id);
                return Ok(());
            }
            _ => {
                return Err(Error::ChanProto(
                    "LINK_AUTH before VERSIONS, NETINFO, and CERT".into(),
                ))
            }
        }
        if auth.format() != msg::LINK_AUTH_FORMAT_ED25519 {
            return Err(Error::BadLinkAuth("unrecognized signature format"));
        }
        let sig = Signature::from_slice(auth.signature())
            .map_err(|_| Error::BadLinkAuth("bad signature length"))?;
        let keys = self
            .handshake
            .peer_keys
            .as_ref()
            .ok_or_else(|| Error::InternalError("no peer keys while authenticating".into()))?;
        let digest = link_auth_digest(
            &keys.identity,
            &ctx.trust.own_identity(),
            &self.transport.binding_material(),
        );
        keys.signing_key
            .verify(&digest, &sig)
            .map_err(|_| Error::BadLinkAuth("signature did not verify"))?;

        info!(
            "{}: Link open; peer authenticated as {}",
            self.unique_id, keys.identity
        );
        self.handshake.stage = HandshakeStage::Open;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{FakeTransport, FakeTrustStore};
    use crate::unique_id::UniqIdContext;
    use tor_cell::chancell::{codec, ChanCell};
    use tor_linkbuf::ByteBuffer;

    fn conn(role: Role) -> Connection<FakeTransport> {
        let (t, _peer) = FakeTransport::pair();
        Connection::new(
            UniqIdContext::new().next(),
            t,
            "192.0.2.9:443".parse().unwrap(),
            role,
            4096,
            None,
            Instant::now(),
        )
    }

    fn sent(c: &mut Connection<FakeTransport>) -> Vec<ChanCell> {
        let mut b = ByteBuffer::new(8192);
        b.append(c.outbuf.as_slice()).unwrap();
        c.outbuf.clear();
        let mut v = Vec::new();
        while let Some(cell) = codec::read_chan_cell(&mut b).unwrap() {
            v.push(cell);
        }
        v
    }

    #[test]
    fn digest_covers_everything() {
        let a: RelayId = [1; 32].into();
        let b: RelayId = [2; 32].into();
        let d = link_auth_digest(&a, &b, b"binding");
        assert_ne!(d, link_auth_digest(&b, &a, b"binding"));
        assert_ne!(d, link_auth_digest(&a, &b, b"bindinG"));
        assert_eq!(d, link_auth_digest(&a, &b, b"binding"));
    }

    #[test]
    fn legacy_fallback() {
        let cfg = LinkConfig::default();
        let trust = FakeTrustStore::new(7);
        let ctx = LinkCtx {
            config: &cfg,
            trust: &trust,
            now: Instant::now(),
            wallclock: SystemTime::now(),
        };
        let mut c = conn(Role::Responder);
        c.start_handshake(&ctx).unwrap();
        assert!(c.outbuf.is_empty());

        let v = msg::Versions::new(vec![5, 6]).unwrap();
        c.handle_handshake_msg(&ctx, v.into()).unwrap();
        assert_eq!(c.handshake.link_proto(), 1);
        assert!(c.handshake.is_open());
        assert!(!c.handshake.authenticated());
        // Only our own VERSIONS went out.
        let cells = sent(&mut c);
        assert_eq!(cells.len(), 1);
        assert!(matches!(cells[0].msg(), ChanMsg::Versions(_)));

        // NETINFO is ignored on a legacy link.
        let n = msg::Netinfo::new(0, None, vec![]);
        c.handle_handshake_msg(&ctx, n.into()).unwrap();
        assert!(!c.handshake.received_netinfo());
    }

    #[test]
    fn responder_sends_netinfo_and_certs() {
        let cfg = LinkConfig::default();
        let trust = FakeTrustStore::new(7);
        let ctx = LinkCtx {
            config: &cfg,
            trust: &trust,
            now: Instant::now(),
            wallclock: UNIX_EPOCH + std::time::Duration::from_secs(1_000_000),
        };
        let mut c = conn(Role::Responder);
        c.start_handshake(&ctx).unwrap();
        let v = msg::Versions::new(vec![1, 2, 3]).unwrap();
        c.handle_handshake_msg(&ctx, v.into()).unwrap();
        assert_eq!(c.handshake.link_proto(), 2);
        assert_eq!(
            c.handshake.stage(),
            &HandshakeStage::AwaitingNetinfoAndCert {
                netinfo: false,
                certs: false
            }
        );
        let cells = sent(&mut c);
        assert_eq!(cells.len(), 3);
        match cells[1].msg() {
            ChanMsg::Netinfo(n) => {
                assert_eq!(n.timestamp(), 1_000_000);
                assert_eq!(n.their_addr(), Some(&"192.0.2.9".parse().unwrap()));
            }
            other => panic!("{:?}", other),
        }
        assert!(matches!(cells[2].msg(), ChanMsg::Certs(_)));

        // A second VERSIONS changes nothing.
        let v = msg::Versions::new(vec![1]).unwrap();
        c.handle_handshake_msg(&ctx, v.into()).unwrap();
        assert_eq!(c.handshake.link_proto(), 2);
        assert!(c.outbuf.is_empty());
    }

    #[test]
    fn netinfo_skew_and_canonical() {
        let cfg = LinkConfig::default();
        let trust = FakeTrustStore::new(7);
        let now = Instant::now();
        let ctx = LinkCtx {
            config: &cfg,
            trust: &trust,
            now,
            wallclock: UNIX_EPOCH + std::time::Duration::from_secs(5000),
        };
        let mut c = conn(Role::Initiator);
        c.start_handshake(&ctx).unwrap();
        c.handle_handshake_msg(&ctx, msg::Versions::new(vec![2]).unwrap().into())
            .unwrap();

        let peer_addr: IpAddr = "192.0.2.9".parse().unwrap();
        let n = msg::Netinfo::new(4900, Some("198.51.100.1".parse().unwrap()), vec![peer_addr]);
        c.handle_handshake_msg(&ctx, n.into()).unwrap();
        assert!(c.handshake.received_netinfo());
        assert!(!c.handshake.received_certs());
        assert_eq!(c.handshake.apparent_skew(), Some(100));
        assert!(c.handshake.apparently_canonical());
        assert_eq!(c.handshake.observed_addr(), Some("198.51.100.1".parse().unwrap()));

        // Duplicate is dropped without changing anything.
        let n = msg::Netinfo::new(1, None, vec![]);
        c.handle_handshake_msg(&ctx, n.into()).unwrap();
        assert_eq!(c.handshake.apparent_skew(), Some(100));
        assert!(c.handshake.apparently_canonical());
    }

    #[test]
    fn netinfo_too_late_for_skew() {
        let cfg = LinkConfig::default();
        let trust = FakeTrustStore::new(7);
        let start = Instant::now();
        let mut c = conn(Role::Initiator);
        let ctx = LinkCtx {
            config: &cfg,
            trust: &trust,
            now: start,
            wallclock: SystemTime::now(),
        };
        c.start_handshake(&ctx).unwrap();
        c.handle_handshake_msg(&ctx, msg::Versions::new(vec![2]).unwrap().into())
            .unwrap();
        let later = LinkCtx {
            now: start + std::time::Duration::from_secs(200),
            ..ctx
        };
        let n = msg::Netinfo::new(0, None, vec![]);
        c.handle_handshake_msg(&later, n.into()).unwrap();
        assert!(c.handshake.received_netinfo());
        assert_eq!(c.handshake.apparent_skew(), None);
        assert!(!c.handshake.apparently_canonical());
    }

    #[test]
    fn out_of_order() {
        let cfg = LinkConfig::default();
        let trust = FakeTrustStore::new(7);
        let ctx = LinkCtx {
            config: &cfg,
            trust: &trust,
            now: Instant::now(),
            wallclock: SystemTime::now(),
        };
        let mut c = conn(Role::Responder);
        c.start_handshake(&ctx).unwrap();
        let n = msg::Netinfo::new(0, None, vec![]);
        assert!(matches!(
            c.handle_handshake_msg(&ctx, n.into()),
            Err(Error::ChanProto(_))
        ));

        let mut c = conn(Role::Responder);
        c.start_handshake(&ctx).unwrap();
        c.handle_handshake_msg(&ctx, msg::Versions::new(vec![2]).unwrap().into())
            .unwrap();
        let a = msg::LinkAuth::new(0, &[0; 64][..]);
        assert!(matches!(
            c.handle_handshake_msg(&ctx, a.into()),
            Err(Error::ChanProto(_))
        ));
        assert!(!c.handshake.authenticated());
    }
}
