//! Moving cells in and out of link buffers.
//!
//! The parse functions here never consume a partial cell: if the
//! buffer does not yet hold a whole cell they return `Ok(None)` and
//! leave the buffer untouched.
//!
//! The implemented formats are:
//!
//! ```ignore
//!     u16 circid;
//!     u8 command;
//!     u8 body[509];
//! ```
//!
//! ```ignore
//!     u16 circid;
//!     u8 command;
//!     u16 len;
//!     u8 body[len];
//! ```

use super::{
    write_var_header, AnyCell, Cell, ChanCell, ChanCmd, CircId, VarCell, CELL_DATA_LEN, CELL_LEN,
    VAR_CELL_HEADER_LEN,
};
use crate::Result;
use arrayref::array_ref;
use tor_linkbuf::{ByteBuffer, Writer};

/// Try to take one fixed-length cell from the front of `buf`.
pub fn try_parse_cell(buf: &mut ByteBuffer) -> Result<Option<Cell>> {
    if buf.len() < CELL_LEN {
        return Ok(None);
    }
    let raw = buf.take(CELL_LEN)?;
    let circid: CircId = u16::from_be_bytes(*array_ref![raw, 0, 2]).into();
    let cmd: ChanCmd = raw[2].into();
    let mut payload = Box::new([0_u8; CELL_DATA_LEN]);
    payload.copy_from_slice(&raw[3..]);
    Ok(Some(Cell {
        circid,
        cmd,
        payload,
    }))
}

/// Try to take one variable-length cell from the front of `buf`.
///
/// A cell whose declared length could never fit in `buf` is reported
/// as a capacity error, since waiting would never help.
pub fn try_parse_var_cell(buf: &mut ByteBuffer) -> Result<Option<VarCell>> {
    let header = match buf.peek(VAR_CELL_HEADER_LEN) {
        Ok(h) => h,
        Err(_) => return Ok(None),
    };
    let circid: CircId = u16::from_be_bytes(*array_ref![header, 0, 2]).into();
    let cmd: ChanCmd = header[2].into();
    let len = u16::from_be_bytes(*array_ref![header, 3, 2]) as usize;
    let total = VAR_CELL_HEADER_LEN + len;
    if total > buf.capacity() {
        return Err(tor_linkbuf::Error::CapacityExceeded {
            wanted: total,
            available: buf.capacity(),
        }
        .into());
    }
    if buf.len() < total {
        return Ok(None);
    }
    buf.discard(VAR_CELL_HEADER_LEN)?;
    let payload = buf.take(len)?;
    Ok(Some(VarCell {
        circid,
        cmd,
        payload,
    }))
}

/// Try to take one cell of either kind from the front of `buf`.
///
/// The command byte decides which framing applies.
pub fn try_parse(buf: &mut ByteBuffer) -> Result<Option<AnyCell>> {
    let cmd: ChanCmd = match buf.peek(3) {
        Ok(h) => h[2].into(),
        Err(_) => return Ok(None),
    };
    if cmd.is_var_cell() {
        Ok(try_parse_var_cell(buf)?.map(AnyCell::Var))
    } else {
        Ok(try_parse_cell(buf)?.map(AnyCell::Fixed))
    }
}

/// Append the wire form of a fixed-length cell to `buf`.
///
/// On failure, `buf` is unchanged.
pub fn serialize_cell(cell: &Cell, buf: &mut ByteBuffer) -> Result<()> {
    let mut v = Vec::with_capacity(CELL_LEN);
    v.write_u16(cell.circid.into());
    v.write_u8(cell.cmd.into());
    v.write_all(&cell.payload[..]);
    buf.append(&v[..])?;
    Ok(())
}

/// Append the wire form of a variable-length cell to `buf`.
///
/// On failure, `buf` is unchanged.
pub fn serialize_var_cell(cell: &VarCell, buf: &mut ByteBuffer) -> Result<()> {
    let mut v = Vec::with_capacity(cell.wire_len());
    // VarCell::new already refused payloads too long for this.
    write_var_header(&mut v, cell.circid, cell.cmd, cell.payload.len() as u16);
    v.write_all(&cell.payload[..]);
    buf.append(&v[..])?;
    Ok(())
}

/// Append the wire form of either kind of cell to `buf`.
pub fn serialize(cell: &AnyCell, buf: &mut ByteBuffer) -> Result<()> {
    match cell {
        AnyCell::Fixed(c) => serialize_cell(c, buf),
        AnyCell::Var(c) => serialize_var_cell(c, buf),
    }
}

/// Try to take one cell from `buf` and decode its message.
///
/// On a definite decoding error, return Err(_).  On a cell that might
/// just be truncated, return Ok(None).
pub fn read_chan_cell(buf: &mut ByteBuffer) -> Result<Option<ChanCell>> {
    match try_parse(buf)? {
        Some(cell) => Ok(Some(cell.into_chan_cell()?)),
        None => Ok(None),
    }
}

/// Encode `cell` and append it to `buf`.
pub fn write_chan_cell(cell: ChanCell, buf: &mut ByteBuffer) -> Result<()> {
    serialize(&cell.encode()?, buf)
}
