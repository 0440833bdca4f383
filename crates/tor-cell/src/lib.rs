//! Coding, and decoding for the cells that travel over an OR link.
//!
//! A *cell* is the unit of data on a link between two relays.  Every
//! cell starts with a two-byte circuit ID and a one-byte command.  A
//! fixed-length cell is always [`chancell::CELL_LEN`] bytes long; a
//! variable-length cell adds a two-byte length field and a payload of
//! that length.
//!
//! In this crate you'll find:
//!
//! * [`chancell::Cell`], [`chancell::VarCell`]: cells as framed on the wire.
//! * [`chancell::msg::ChanMsg`]: the typed meaning of a cell body.
//! * [`chancell::ChanCell`]: a message together with its circuit ID.
//! * [`chancell::codec`]: moving cells in and out of a
//!   [`tor_linkbuf::ByteBuffer`].
//!
//! This crate does no cryptography and keeps no state: it only knows
//! how to frame bytes.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(noop_method_call)]
#![deny(unreachable_pub)]
#![deny(clippy::cast_lossless)]
#![warn(clippy::needless_borrow)]

pub mod chancell;
mod err;

pub use err::Error;

/// An error type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
