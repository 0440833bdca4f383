//! Define an error type for the tor-cell crate.
use thiserror::Error;

/// An error type for the tor-cell crate.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// An error that occurred in the tor_linkbuf crate while decoding an
    /// object, or while appending to a buffer.
    #[error("parsing error: {0}")]
    BytesErr(#[from] tor_linkbuf::Error),
    /// There was a programming error somewhere in the code.
    #[error("Internal programming error: {0}")]
    InternalError(String),
    /// Protocol violation at the channel level
    #[error("channel protocol violation: {0}")]
    ChanProto(String),
    /// Tried to encode an object that can't be represented on the wire.
    #[error("cannot encode object")]
    CantEncode,
}
