//! Define an error type for the tor-linkbuf crate.

use std::sync::Arc;
use thiserror::Error;

/// Error type for buffer operations and in-memory decoding.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Tried to append more bytes than the buffer has room for.
    ///
    /// Nothing was written.
    #[error("buffer capacity exceeded: {wanted} bytes requested, {available} available")]
    CapacityExceeded {
        /// How many bytes we tried to add.
        wanted: usize,
        /// How many bytes of space were left.
        available: usize,
    },
    /// Tried to take more bytes than the buffer holds.
    ///
    /// Usually this just means "wait for more data".
    #[error("insufficient data: {wanted} bytes requested, {available} available")]
    InsufficientData {
        /// How many bytes we tried to remove.
        wanted: usize,
        /// How many bytes were present.
        available: usize,
    },
    /// The peer closed the stream in an orderly way.
    #[error("peer closed the connection")]
    PeerClosed,
    /// An error that occurred from the io system.
    #[error("io error: {0}")]
    Io(#[source] Arc<std::io::Error>),
    /// An object being decoded was truncated (or not fully present).
    #[error("object truncated (or not fully present)")]
    Truncated,
    /// An object being decoded had extra bytes at its end.
    #[error("extra bytes at end of object")]
    ExtraneousBytes,
    /// An object being decoded was malformed in some other way.
    #[error("bad object: {0}")]
    BadMessage(&'static str),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(Arc::new(e))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use Error::*;
        match (self, other) {
            (
                CapacityExceeded {
                    wanted: a,
                    available: b,
                },
                CapacityExceeded {
                    wanted: c,
                    available: d,
                },
            ) => a == c && b == d,
            (
                InsufficientData {
                    wanted: a,
                    available: b,
                },
                InsufficientData {
                    wanted: c,
                    available: d,
                },
            ) => a == c && b == d,
            (PeerClosed, PeerClosed) => true,
            (Io(a), Io(b)) => a.kind() == b.kind(),
            (Truncated, Truncated) => true,
            (ExtraneousBytes, ExtraneousBytes) => true,
            (BadMessage(a), BadMessage(b)) => a == b,
            (_, _) => false,
        }
    }
}
