//! Per-connection state.

use std::net::SocketAddr;
use std::time::Instant;

use rand::Rng;
use tor_cell::chancell::{codec, ChanCell, CircId};
use tor_linkbuf::ByteBuffer;

use crate::handshake::HandshakeState;
use crate::ratelim::RateBucket;
use crate::unique_id::UniqId;
use crate::Result;

/// Which end of the link we are.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// We opened the connection.
    Initiator,
    /// The peer opened the connection.
    Responder,
}

/// Which group of circuit IDs are we allowed to allocate on a connection?
///
/// If we initiated the connection, we use High circuit ids.  If we're the
/// responder, we use low circuit ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CircIdRange {
    /// IDs with the high bit clear.
    Low,
    /// IDs with the high bit set.
    High,
}

impl CircIdRange {
    /// Return the range that a party in `role` allocates from.
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Initiator => CircIdRange::High,
            Role::Responder => CircIdRange::Low,
        }
    }

    /// Return true if `id` is one that this range would allocate.
    pub fn contains(self, id: CircId) -> bool {
        match self {
            CircIdRange::Low => !id.high_bit(),
            CircIdRange::High => id.high_bit(),
        }
    }
}

impl rand::distributions::Distribution<CircId> for CircIdRange {
    /// Return a random circuit ID in the appropriate range.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> CircId {
        // Make sure v is nonzero.
        let v = loop {
            match rng.gen::<u16>() & 0x7fff {
                0 => (),
                x => break x,
            }
        };
        match self {
            CircIdRange::Low => v,
            CircIdRange::High => v | 0x8000,
        }
        .into()
    }
}

/// How a connection should go away.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CloseMode {
    /// Drop any queued output and close now.
    Immediate,
    /// Try to flush queued output first.
    Graceful,
}

/// Why a connection was closed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CloseReason {
    /// Somebody asked for it.
    Requested,
    /// The peer broke the link protocol.
    ProtocolViolation,
    /// The peer failed to authenticate.
    AuthFailed,
    /// The peer hung up.
    PeerClosed,
    /// The transport failed.
    IoError,
    /// The handshake took too long.
    HandshakeTimeout,
    /// A buffer filled up.
    CapacityExceeded,
    /// A bug.
    Internal,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::Requested => "requested",
            CloseReason::ProtocolViolation => "protocol violation",
            CloseReason::AuthFailed => "authentication failed",
            CloseReason::PeerClosed => "peer closed",
            CloseReason::IoError => "I/O error",
            CloseReason::HandshakeTimeout => "handshake timeout",
            CloseReason::CapacityExceeded => "buffer full",
            CloseReason::Internal => "internal error",
        };
        write!(f, "{}", s)
    }
}

/// A pending request to close a connection.
#[derive(Copy, Clone, Debug)]
pub(crate) struct CloseRequest {
    /// Why.
    pub(crate) reason: CloseReason,
    /// How.
    pub(crate) mode: CloseMode,
    /// When the close was requested.
    pub(crate) marked_at: Instant,
}

/// A single link to another relay.
pub(crate) struct Connection<T> {
    /// Identifier for log messages.
    pub(crate) unique_id: UniqId,
    /// The byte stream to the peer.
    pub(crate) transport: T,
    /// Bytes read from the transport but not yet decoded.
    pub(crate) inbuf: ByteBuffer,
    /// Encoded cells not yet written to the transport.
    pub(crate) outbuf: ByteBuffer,
    /// The address of the peer, as the transport reports it.
    pub(crate) real_addr: SocketAddr,
    /// Which circuit IDs we allocate on this connection.
    pub(crate) circ_id_range: CircIdRange,
    /// Link handshake progress.
    pub(crate) handshake: HandshakeState,
    /// Per-connection read bucket, if connections are throttled.
    pub(crate) receiver_bucket: Option<RateBucket>,
    /// When the connection was created.
    pub(crate) created_at: Instant,
    /// When we last read anything.
    pub(crate) last_read: Instant,
    /// When we last wrote anything.
    pub(crate) last_write: Instant,
    /// Set once the connection is marked for close.
    pub(crate) close: Option<CloseRequest>,
    /// Reading stopped because a bucket ran dry.
    pub(crate) read_blocked_on_bw: bool,
    /// Writing stopped because a bucket ran dry.
    pub(crate) write_blocked_on_bw: bool,
    /// The reactor should tell us when the transport is readable.
    pub(crate) wants_read: bool,
    /// The reactor should tell us when the transport is writable.
    pub(crate) wants_write: bool,
    /// Padding cells received.
    pub(crate) n_padding: u64,
}

impl<T> Connection<T> {
    /// Make a new connection in `role` over `transport`.
    pub(crate) fn new(
        unique_id: UniqId,
        transport: T,
        real_addr: SocketAddr,
        role: Role,
        buffer_capacity: usize,
        receiver_bucket: Option<RateBucket>,
        now: Instant,
    ) -> Self {
        Connection {
            unique_id,
            transport,
            inbuf: ByteBuffer::new(buffer_capacity),
            outbuf: ByteBuffer::new(buffer_capacity),
            real_addr,
            circ_id_range: CircIdRange::for_role(role),
            handshake: HandshakeState::new(role),
            receiver_bucket,
            created_at: now,
            last_read: now,
            last_write: now,
            close: None,
            read_blocked_on_bw: false,
            write_blocked_on_bw: false,
            wants_read: true,
            wants_write: false,
            n_padding: 0,
        }
    }

    /// Encode `cell` onto the output buffer.
    ///
    /// A full output buffer is fatal for the connection.
    pub(crate) fn queue_cell(&mut self, cell: ChanCell) -> Result<()> {
        tracing::trace!(
            "{}: Queueing {} cell on circuit {}",
            self.unique_id,
            cell.msg().cmd(),
            cell.circid()
        );
        codec::write_chan_cell(cell, &mut self.outbuf)?;
        self.wants_write = true;
        Ok(())
    }

    /// Return true if this connection has been marked for close.
    pub(crate) fn is_closing(&self) -> bool {
        self.close.is_some()
    }
}
