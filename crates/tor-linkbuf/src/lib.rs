//! `tor-linkbuf`: Byte buffers and byte-level decoding for Tor links.
//!
//! # Overview
//!
//! Every OR connection owns two of the [`ByteBuffer`]s defined here: one
//! for bytes that have arrived from the network but have not yet been
//! decoded into cells, and one for encoded cells that are waiting to be
//! written.  A `ByteBuffer` has a fixed capacity chosen when it is
//! created, and it never grows past that capacity: an append that would
//! not fit fails without changing anything.
//!
//! The buffers talk to non-blocking byte streams through the standard
//! [`std::io::Read`] and [`std::io::Write`] traits.  A stream that
//! reports [`std::io::ErrorKind::WouldBlock`] has simply made no progress;
//! that is not an error.
//!
//! For decoding things that are already in memory (cell payloads), this
//! crate also provides a [`Reader`] cursor, a [`Readable`] trait for
//! objects that can be decoded from one, and a [`Writer`] trait for
//! encoding onto a growable byte vector.
//!
//! # Contents
//!
//! * [`ByteBuffer`]: a bounded FIFO of bytes attached to a socket.
//! * [`Reader`]: a view of a byte slice, from which data can be decoded.
//! * [`Writer`]: trait to represent a growable buffer of bytes.
//! * [`Readable`]: trait for an object that can be decoded from a [`Reader`].

#![deny(missing_docs)]
#![warn(noop_method_call)]
#![deny(unreachable_pub)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]

mod buf;
mod err;
mod reader;
mod writer;

pub use buf::ByteBuffer;
pub use err::Error;
pub use reader::Reader;
pub use writer::Writer;

/// Result type returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for an object that can be extracted from a Reader.
///
/// Implement this trait in order to make an object that can (maybe)
/// be decoded from a reader.
///
/// # Example
///
/// ```
/// use tor_linkbuf::{Readable, Reader, Result};
/// #[derive(Debug, Eq, PartialEq)]
/// struct Header {
///   circid: u16,
///   cmd: u8
/// }
///
/// impl Readable for Header {
///     fn take_from(r: &mut Reader<'_>) -> Result<Self> {
///         let circid = r.take_u16()?;
///         let cmd = r.take_u8()?;
///         Ok(Header { circid, cmd })
///     }
/// }
///
/// let encoded = [0x80, 0x01, 0x07];
/// let mut reader = Reader::from_slice(&encoded);
/// let h: Header = reader.extract()?;
/// assert_eq!(h, Header { circid: 0x8001, cmd: 7 });
/// reader.should_be_exhausted()?;
/// # Result::Ok(())
/// ```
pub trait Readable: Sized {
    /// Try to extract an object of this type from a Reader.
    ///
    /// This is not the right place to check signatures or do anything
    /// else expensive.
    fn take_from(r: &mut Reader<'_>) -> Result<Self>;
}

impl Readable for u8 {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        r.take_u8()
    }
}

impl Readable for u16 {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        r.take_u16()
    }
}

impl Readable for u32 {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        r.take_u32()
    }
}
