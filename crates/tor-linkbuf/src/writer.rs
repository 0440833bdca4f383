//! The [`Writer`] trait, for encoding cell bodies in memory.

/// Something that cell bodies can be encoded onto.
///
/// Writing never fails: a `Writer` is an in-memory sink, and any limit
/// on size is enforced later, when the encoded body is framed into a
/// cell and appended to a [`ByteBuffer`](crate::ByteBuffer).
pub trait Writer {
    /// Append `bytes`.
    fn write_all(&mut self, bytes: &[u8]);

    /// Append one byte.
    fn write_u8(&mut self, x: u8) {
        self.write_all(&[x])
    }
    /// Append a big-endian u16.
    fn write_u16(&mut self, x: u16) {
        self.write_all(&x.to_be_bytes())
    }
    /// Append a big-endian u32.
    fn write_u32(&mut self, x: u32) {
        self.write_all(&x.to_be_bytes())
    }
}

impl Writer for Vec<u8> {
    fn write_all(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes)
    }
}
