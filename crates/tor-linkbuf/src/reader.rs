//! A forward-only cursor over bytes in memory.

use crate::{Error, Readable, Result};
use arrayref::array_ref;

/// A cursor for decoding a cell payload that is already in memory.
///
/// Unlike [`ByteBuffer`](crate::ByteBuffer), a Reader never owns its
/// bytes and never touches a stream.  It only walks forward over a
/// borrowed slice.  Multi-byte integers are big-endian.
///
/// # Example
///
/// ```
/// use tor_linkbuf::{Reader, Result};
/// // A VERSIONS body: two 16-bit version numbers.
/// let body = [0x00, 0x01, 0x00, 0x02];
/// let mut r = Reader::from_slice(&body[..]);
/// let mut versions = Vec::new();
/// while r.remaining() > 0 {
///     versions.push(r.take_u16()?);
/// }
/// assert_eq!(versions, vec![1, 2]);
/// r.should_be_exhausted()?;
/// # Result::Ok(())
/// ```
pub struct Reader<'a> {
    /// Bytes being decoded.
    b: &'a [u8],
    /// Offset of the first unread byte.
    off: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the front of `slice`.
    pub fn from_slice(slice: &'a [u8]) -> Self {
        Reader { b: slice, off: 0 }
    }
    /// Return how many bytes are left.
    pub fn remaining(&self) -> usize {
        self.b.len() - self.off
    }
    /// Return how many bytes have been read.
    pub fn consumed(&self) -> usize {
        self.off
    }
    /// Give up the reader, returning whatever was left unread.
    pub fn into_rest(self) -> &'a [u8] {
        &self.b[self.off..]
    }
    /// Skip `n` bytes.
    ///
    /// Fails with [`Error::Truncated`], skipping nothing, if fewer than
    /// `n` remain.
    pub fn advance(&mut self, n: usize) -> Result<()> {
        self.peek(n)?;
        self.off += n;
        Ok(())
    }
    /// Fail with [`Error::ExtraneousBytes`] unless everything has been
    /// read.
    pub fn should_be_exhausted(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            _ => Err(Error::ExtraneousBytes),
        }
    }
    /// Return the next `n` bytes, leaving them unread.
    pub fn peek(&self, n: usize) -> Result<&'a [u8]> {
        self.b
            .get(self.off..)
            .and_then(|rest| rest.get(..n))
            .ok_or(Error::Truncated)
    }
    /// Read the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let taken = self.peek(n)?;
        self.off += n;
        Ok(taken)
    }
    /// Read a byte.
    pub fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
    /// Read a big-endian u16.
    pub fn take_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes(*array_ref![b, 0, 2]))
    }
    /// Read a big-endian u32.
    pub fn take_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes(*array_ref![b, 0, 4]))
    }
    /// Decode an `E`.
    ///
    /// If decoding fails, the reader is left where it was.
    pub fn extract<E: Readable>(&mut self) -> Result<E> {
        let start = self.off;
        E::take_from(self).map_err(|e| {
            self.off = start;
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_ok() {
        let bytes = hex_literal::hex!("0007 00000002 61626364 2a");
        let mut r = Reader::from_slice(&bytes[..]);
        assert_eq!(r.remaining(), 11);
        assert_eq!(r.take_u16().unwrap(), 7);
        assert_eq!(r.take_u32().unwrap(), 2);
        assert_eq!(r.consumed(), 6);
        assert_eq!(r.peek(2).unwrap(), b"ab");
        assert_eq!(r.consumed(), 6);
        assert_eq!(r.take(4).unwrap(), b"abcd");
        assert_eq!(r.take_u8().unwrap(), 0x2a);
        r.should_be_exhausted().unwrap();
        assert_eq!(r.take(0).unwrap(), b"");
    }

    #[test]
    fn read_missing() {
        let mut r = Reader::from_slice(&b"123"[..]);
        assert_eq!(r.take_u32(), Err(Error::Truncated));
        assert_eq!(r.advance(4), Err(Error::Truncated));
        assert_eq!(r.remaining(), 3);
        assert_eq!(r.take_u16().unwrap(), 0x3132);
        assert_eq!(r.take_u16(), Err(Error::Truncated));
        assert_eq!(r.should_be_exhausted(), Err(Error::ExtraneousBytes));
        assert_eq!(r.into_rest(), b"3");
    }

    #[test]
    fn skip_then_rest() {
        let mut r = Reader::from_slice(&b"length then padding"[..]);
        r.advance(7).unwrap();
        assert_eq!(r.peek(4).unwrap(), b"then");
        assert_eq!(r.consumed(), 7);
        assert_eq!(r.into_rest(), b"then padding");
    }

    #[test]
    fn extract_rewinds() {
        /// A u16-length-prefixed blob.
        #[derive(Debug, PartialEq)]
        struct Blob(Vec<u8>);
        impl Readable for Blob {
            fn take_from(r: &mut Reader<'_>) -> Result<Self> {
                let len = r.take_u16()? as usize;
                Ok(Blob(r.take(len)?.into()))
            }
        }

        let bytes = hex_literal::hex!("0002 aabb 0003 cc");
        let mut r = Reader::from_slice(&bytes[..]);
        assert_eq!(r.extract::<Blob>().unwrap(), Blob(vec![0xaa, 0xbb]));
        assert_eq!(r.extract::<Blob>(), Err(Error::Truncated));
        assert_eq!(r.consumed(), 4);
        assert_eq!(r.remaining(), 3);
    }
}
