//! Define an error type for the tor-link crate.
use std::sync::Arc;
use thiserror::Error;

use crate::conn::{CloseMode, CloseReason};

/// An error type for the tor-link crate.
///
/// Most of these errors are fatal to the connection they happened on;
/// see [`Error::is_fatal`].
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A buffer operation failed in a way that doesn't fit another
    /// category.
    #[error("buffer error: {0}")]
    Buf(#[source] tor_linkbuf::Error),
    /// An error occurred in the cell-handling layer.
    #[error("cell encoding error: {0}")]
    Cell(#[source] tor_cell::Error),
    /// A cell had a bad length or field.
    #[error("malformed cell: {0}")]
    MalformedCell(String),
    /// Protocol violation at the link level
    #[error("link protocol violation: {0}")]
    ChanProto(String),
    /// The peer's LINK_AUTH cell did not prove what it needed to.
    #[error("link authentication failed: {0}")]
    BadLinkAuth(&'static str),
    /// A connection's buffer could not hold what we needed to put in it.
    #[error("buffer capacity exceeded")]
    CapacityExceeded,
    /// The peer closed the connection.
    #[error("peer closed the connection")]
    PeerClosed,
    /// An error that occurred from the io system.
    #[error("io error: {0}")]
    Io(#[source] Arc<std::io::Error>),
    /// The link handshake did not finish in time.
    #[error("link handshake timed out")]
    HandshakeTimeout,
    /// A connection handle was stale, or never valid.
    #[error("no such connection")]
    NoSuchConnection,
    /// Tried to use a connection that is already closing.
    #[error("connection is closing")]
    ConnectionClosing,
    /// A configuration value was invalid.
    #[error("bad configuration: {0}")]
    Config(String),
    /// There was a programming error somewhere in the code.
    #[error("Internal programming error: {0}")]
    InternalError(String),
}

impl From<tor_linkbuf::Error> for Error {
    fn from(err: tor_linkbuf::Error) -> Error {
        use tor_linkbuf::Error as E;
        match err {
            E::CapacityExceeded { .. } => Error::CapacityExceeded,
            E::PeerClosed => Error::PeerClosed,
            E::Io(e) => Error::Io(e),
            E::Truncated | E::ExtraneousBytes | E::BadMessage(_) => {
                Error::MalformedCell(err.to_string())
            }
            _ => Error::Buf(err),
        }
    }
}

impl From<tor_cell::Error> for Error {
    fn from(err: tor_cell::Error) -> Error {
        match err {
            tor_cell::Error::BytesErr(e) => e.into(),
            tor_cell::Error::ChanProto(msg) => Error::ChanProto(msg),
            _ => Error::Cell(err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    /// Return true if this error means the connection it happened on
    /// must be torn down.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::NoSuchConnection | Error::ConnectionClosing | Error::Config(_) | Error::Buf(_)
        )
    }

    /// Return the reason to record when this error closes a connection.
    pub(crate) fn close_reason(&self) -> CloseReason {
        match self {
            Error::PeerClosed => CloseReason::PeerClosed,
            Error::Io(_) => CloseReason::IoError,
            Error::BadLinkAuth(_) => CloseReason::AuthFailed,
            Error::HandshakeTimeout => CloseReason::HandshakeTimeout,
            Error::CapacityExceeded => CloseReason::CapacityExceeded,
            Error::MalformedCell(_) | Error::ChanProto(_) | Error::Cell(_) => {
                CloseReason::ProtocolViolation
            }
            _ => CloseReason::Internal,
        }
    }

    /// Return how a connection that failed with this error should close.
    ///
    /// A broken socket can't flush anything, so it closes at once;
    /// everything else gets a chance to send what it has queued.
    pub(crate) fn close_mode(&self) -> CloseMode {
        match self {
            Error::PeerClosed | Error::Io(_) => CloseMode::Immediate,
            _ => CloseMode::Graceful,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classify() {
        let e: Error = tor_linkbuf::Error::Truncated.into();
        assert!(matches!(e, Error::MalformedCell(_)));
        assert!(e.is_fatal());
        assert_eq!(e.close_reason(), CloseReason::ProtocolViolation);

        let e: Error = tor_cell::Error::BytesErr(tor_linkbuf::Error::CapacityExceeded {
            wanted: 9,
            available: 2,
        })
        .into();
        assert!(matches!(e, Error::CapacityExceeded));
        assert_eq!(e.close_mode(), CloseMode::Graceful);

        let e: Error = std::io::Error::from(std::io::ErrorKind::ConnectionReset).into();
        assert_eq!(e.close_mode(), CloseMode::Immediate);
        assert_eq!(e.close_reason(), CloseReason::IoError);

        assert!(!Error::NoSuchConnection.is_fatal());
        assert!(Error::BadLinkAuth("bad signature").is_fatal());
    }
}
