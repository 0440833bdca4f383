//! Internal: Declare the ByteBuffer type for tor-linkbuf.

use crate::{Error, Result};
use std::io::{ErrorKind, Read, Write};

/// A fixed-capacity FIFO of bytes, attached to a non-blocking stream.
///
/// The bytes in a `ByteBuffer` are always contiguous and in the order
/// they arrived.  Removing bytes from the front moves the remainder
/// down, so callers never see raw offsets.
///
/// No operation here ever lets the buffer hold more than
/// [`capacity`](ByteBuffer::capacity) bytes.
///
/// # Example
///
/// ```
/// use tor_linkbuf::{ByteBuffer, Error};
/// let mut buf = ByteBuffer::new(8);
/// buf.append(b"hello")?;
/// assert!(buf.append(b"world").is_err());
/// assert_eq!(buf.len(), 5);
/// assert_eq!(buf.take(4)?, b"hell");
/// assert_eq!(buf.as_slice(), b"o");
/// # Result::<(), Error>::Ok(())
/// ```
#[derive(Clone, Debug)]
pub struct ByteBuffer {
    /// The occupied bytes. `data.len()` is the occupied length.
    data: Vec<u8>,
    /// The most bytes we will ever hold.
    capacity: usize,
}

impl ByteBuffer {
    /// Return a new empty buffer that can hold up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        ByteBuffer {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Return the most bytes this buffer can ever hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the number of bytes currently held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Return true if this buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Return how many more bytes could be appended.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Return a view of all the bytes in this buffer, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..]
    }

    /// Copy `bytes` onto the end of this buffer.
    ///
    /// Fails with [`Error::CapacityExceeded`] if there is not room for
    /// all of them; in that case, nothing is written.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let available = self.remaining_capacity();
        if bytes.len() > available {
            return Err(Error::CapacityExceeded {
                wanted: bytes.len(),
                available,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Return the first `n` bytes of this buffer without removing them.
    pub fn peek(&self, n: usize) -> Result<&[u8]> {
        if n > self.data.len() {
            return Err(Error::InsufficientData {
                wanted: n,
                available: self.data.len(),
            });
        }
        Ok(&self.data[..n])
    }

    /// Remove and return the first `n` bytes of this buffer.
    ///
    /// Fails with [`Error::InsufficientData`] if fewer than `n` bytes
    /// are present; in that case, nothing is removed.
    pub fn take(&mut self, n: usize) -> Result<Vec<u8>> {
        let out = self.peek(n)?.to_vec();
        self.data.drain(..n);
        Ok(out)
    }

    /// Remove the first `n` bytes of this buffer without copying them.
    pub fn discard(&mut self, n: usize) -> Result<()> {
        self.peek(n)?;
        self.data.drain(..n);
        Ok(())
    }

    /// Drop every byte in this buffer.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Return the offset of the first occurrence of `needle`, if any.
    ///
    /// An empty needle is found at offset 0.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        self.data
            .windows(needle.len())
            .position(|window| window == needle)
    }

    /// Read up to `at_most` bytes from `source` onto the end of this buffer.
    ///
    /// Never reads more than there is room for.  Returns the number of
    /// bytes read, which is 0 if the source would block (or if there was
    /// no room).  An orderly end-of-stream is reported as
    /// [`Error::PeerClosed`].
    pub fn fill_from<R: Read + ?Sized>(
        &mut self,
        source: &mut R,
        at_most: usize,
    ) -> Result<usize> {
        let want = std::cmp::min(at_most, self.remaining_capacity());
        if want == 0 {
            return Ok(0);
        }
        let old_len = self.data.len();
        self.data.resize(old_len + want, 0);
        let outcome = loop {
            match source.read(&mut self.data[old_len..]) {
                Ok(0) => break Err(Error::PeerClosed),
                Ok(n) => break Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(e.into()),
            }
        };
        let got = *outcome.as_ref().unwrap_or(&0);
        self.data.truncate(old_len + got);
        outcome
    }

    /// Write up to `at_most` bytes from the front of this buffer to `sink`.
    ///
    /// Returns the number of bytes written, which is 0 if the sink would
    /// block.  Written bytes are removed from the buffer.
    pub fn drain_to<W: Write + ?Sized>(
        &mut self,
        sink: &mut W,
        at_most: usize,
    ) -> Result<usize> {
        let want = std::cmp::min(at_most, self.data.len());
        if want == 0 {
            return Ok(0);
        }
        loop {
            match sink.write(&self.data[..want]) {
                Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.data.drain(..n);
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
