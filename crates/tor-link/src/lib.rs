//! `tor-link`: The link layer of a Tor relay.
//!
//! # Overview
//!
//! This crate turns raw, non-blocking byte streams to other relays into
//! authenticated links that carry cells.  A [`LinkEngine`] owns every
//! connection: for each one it keeps an input and an output
//! [`tor_linkbuf::ByteBuffer`], throttles reads and writes against
//! token buckets, decodes cells with [`tor_cell::chancell::codec`],
//! runs the VERSIONS/NETINFO/CERT/LINK_AUTH handshake, and then hands
//! circuit cells to the circuit layer.
//!
//! The engine does no I/O scheduling of its own.  A reactor tells it
//! when a transport is readable ([`LinkEngine::on_bytes_ready`]) or
//! writable ([`LinkEngine::on_writable`]), or calls
//! [`LinkEngine::run_once`] to service everything that asked for
//! attention.  Connections are closed in two steps: they are first
//! *marked* for close, and only later *reaped*, so that a handle is
//! never invalidated in the middle of handling one of its cells.
//!
//! Things outside the link layer are reached through traits:
//!
//! * [`Transport`]: the (normally TLS) byte stream.
//! * [`CircuitLayer`]: the owner of circuits.
//! * [`TrustStore`]: our keys, and our judge of certificates.
//! * [`Clock`]: the source of time.
//! * [`LocalAddrPolicy`]: which peers are exempt from bandwidth limits.
//!
//! # Limitations
//!
//! Certificates are opaque to this crate; the [`TrustStore`] decides
//! what they mean.  The link protocol versions this crate speaks are 1
//! (no authentication) and 2.

#![deny(missing_docs)]
#![warn(noop_method_call)]
#![deny(unreachable_pub)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]

mod clock;
pub mod config;
mod conn;
mod connmap;
mod dispatch;
mod engine;
mod err;
mod handshake;
mod ratelim;
mod traits;
mod unique_id;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use config::{BandwidthConfig, BandwidthConfigBuilder, LinkConfig, LinkConfigBuilder};
pub use conn::{CircIdRange, CloseMode, CloseReason, Role};
pub use connmap::ConnHandle;
pub use engine::LinkEngine;
pub use err::Error;
pub use handshake::{HandshakeStage, HandshakeState};
pub use traits::{
    CircInfo, CircSide, CircState, CircuitLayer, CreateRequest, CreateResponse, Direction,
    LocalAddrPolicy, LoopbackOnly, PeerKeys, RelayId, Transport, TrustStore,
};
pub use unique_id::UniqId;

/// A Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
