//! Cells sent over an OR link.
//!
//! A 'link' (or 'channel') is a direct connection between two relays.
//!
//! This module implements the framed cell types ([Cell], [VarCell]), and
//! the [ChanCell] type, which pairs a typed message with the circuit it
//! belongs to.  The [msg] module holds the messages themselves, and the
//! [codec] module moves cells in and out of link buffers.
pub mod codec;
pub mod msg;
use crate::{Error, Result};
use caret::caret_int;
use tor_linkbuf::Writer;

/// Total length of a fixed-length cell on the wire.
pub const CELL_LEN: usize = 512;

/// The amount of data sent in a fixed-length cell.
///
/// Two bytes of circuit ID and one of command make up the difference
/// with [`CELL_LEN`].
pub const CELL_DATA_LEN: usize = 509;

/// Length of the header of a variable-length cell: circuit ID,
/// command, and payload length.
pub const VAR_CELL_HEADER_LEN: usize = 5;

/// Largest payload a variable-length cell can carry.
pub const VAR_CELL_MAX_DATA_LEN: usize = u16::MAX as usize;

/// A cell body considered as a raw array of bytes
pub type RawCellBody = [u8; CELL_DATA_LEN];

/// Link-local identifier for a circuit.
///
/// The two parties on a link allocate circuit IDs from opposite halves
/// of the space, distinguished by the high bit.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub struct CircId(u16);

impl From<u16> for CircId {
    fn from(item: u16) -> Self {
        Self(item)
    }
}
impl From<CircId> for u16 {
    fn from(id: CircId) -> u16 {
        id.0
    }
}
impl std::fmt::Display for CircId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        self.0.fmt(f)
    }
}
impl CircId {
    /// Return true if this is the zero CircId.
    ///
    /// A zero-valid circuit ID denotes a cell that is not related to
    /// any particular circuit, but which applies to the link as a whole.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
    /// Return true if the high bit of this circuit ID is set.
    pub fn high_bit(&self) -> bool {
        self.0 & 0x8000 != 0
    }
}

caret_int! {
    /// A ChanCmd is the type of a link cell.  The value of the ChanCmd
    /// indicates the meaning of the cell, and (possibly) its length.
    pub struct ChanCmd(u8) {
        /// A fixed-length cell that will be dropped.
        PADDING = 0,
        /// Create a new circuit
        CREATE = 1,
        /// Finish circuit-creation handshake
        CREATED = 2,
        /// Relay cell, transmitted over a circuit.
        RELAY = 3,
        /// Destroy a circuit
        DESTROY = 4,
        /// Create a new circuit (no public-key)
        CREATE_FAST = 5,
        /// Finish a circuit-creation handshake (no public-key)
        CREATED_FAST = 6,
        /// Variable-length: negotiate link protocol versions
        VERSIONS = 7,
        /// Variable-length: time and address information
        NETINFO = 8,
        /// Variable-length: certificates for the link handshake
        CERT = 9,
        /// Variable-length: initiator's proof of identity
        LINK_AUTH = 10,
    }
}

/// Possible requirements on circuit IDs for a link command.
enum CircIdReq {
    /// indicates a command that only takes a zero-valued circuit ID
    WantZero,
    /// indicates a command that only takes a nonzero-valued circuit ID
    WantNonZero,
    /// indicates a command that can take any circuit ID
    Any,
}

impl ChanCmd {
    /// Return true if this command is for a cell using the the
    /// variable-length format.
    pub fn is_var_cell(self) -> bool {
        matches!(
            self,
            ChanCmd::VERSIONS | ChanCmd::NETINFO | ChanCmd::CERT | ChanCmd::LINK_AUTH
        ) || self.0 >= 128_u8
    }
    /// Return true if this command is part of link negotiation.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            ChanCmd::VERSIONS | ChanCmd::NETINFO | ChanCmd::CERT | ChanCmd::LINK_AUTH
        )
    }
    /// Return what kind of circuit ID this command expects.
    fn allows_circid(self) -> CircIdReq {
        match self {
            ChanCmd::PADDING
            | ChanCmd::VERSIONS
            | ChanCmd::NETINFO
            | ChanCmd::CERT
            | ChanCmd::LINK_AUTH => CircIdReq::WantZero,
            ChanCmd::CREATE
            | ChanCmd::CREATED
            | ChanCmd::RELAY
            | ChanCmd::DESTROY
            | ChanCmd::CREATE_FAST
            | ChanCmd::CREATED_FAST => CircIdReq::WantNonZero,
            _ => CircIdReq::Any,
        }
    }
    /// Return true if this command is one that accepts the particular
    /// circuit ID `id`.
    pub fn accepts_circid_val(self, id: CircId) -> bool {
        match (self.allows_circid(), id.is_zero()) {
            (CircIdReq::WantNonZero, true) => false,
            (CircIdReq::WantZero, false) => false,
            (_, _) => true,
        }
    }
}

/// A fixed-length cell, as framed on the wire.
///
/// The payload is always exactly [`CELL_DATA_LEN`] bytes; shorter
/// bodies are zero-padded.
#[derive(Clone, PartialEq, Eq)]
pub struct Cell {
    /// Circuit ID associated with this cell
    circid: CircId,
    /// Command for this cell
    cmd: ChanCmd,
    /// Zero-padded payload
    payload: Box<RawCellBody>,
}

impl Cell {
    /// Construct a new fixed-length cell, padding `body` with zeros.
    ///
    /// Fails with [`Error::InternalError`] if `body` is longer than
    /// [`CELL_DATA_LEN`].
    pub fn new(circid: CircId, cmd: ChanCmd, body: &[u8]) -> Result<Self> {
        if body.len() > CELL_DATA_LEN {
            return Err(Error::InternalError(format!(
                "{} bytes is too long for a fixed-length cell",
                body.len()
            )));
        }
        let mut payload = Box::new([0_u8; CELL_DATA_LEN]);
        payload[..body.len()].copy_from_slice(body);
        Ok(Cell {
            circid,
            cmd,
            payload,
        })
    }
    /// Return the circuit ID for this cell.
    pub fn circid(&self) -> CircId {
        self.circid
    }
    /// Return the command for this cell.
    pub fn cmd(&self) -> ChanCmd {
        self.cmd
    }
    /// Return the full (padded) payload of this cell.
    pub fn payload(&self) -> &RawCellBody {
        &self.payload
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("circid", &self.circid)
            .field("cmd", &self.cmd)
            .finish()
    }
}

/// A variable-length cell, as framed on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarCell {
    /// Circuit ID associated with this cell
    circid: CircId,
    /// Command for this cell
    cmd: ChanCmd,
    /// Payload; never longer than [`VAR_CELL_MAX_DATA_LEN`].
    payload: Vec<u8>,
}

impl VarCell {
    /// Construct a new variable-length cell.
    ///
    /// Fails with [`Error::InternalError`] if `payload` is longer than a
    /// two-byte length field can describe.
    pub fn new<B: Into<Vec<u8>>>(circid: CircId, cmd: ChanCmd, payload: B) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > VAR_CELL_MAX_DATA_LEN {
            return Err(Error::InternalError(format!(
                "{} bytes is too long for a variable-length cell",
                payload.len()
            )));
        }
        Ok(VarCell {
            circid,
            cmd,
            payload,
        })
    }
    /// Return the circuit ID for this cell.
    pub fn circid(&self) -> CircId {
        self.circid
    }
    /// Return the command for this cell.
    pub fn cmd(&self) -> ChanCmd {
        self.cmd
    }
    /// Return the payload of this cell.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..]
    }
    /// Return the number of bytes this cell takes on the wire.
    pub fn wire_len(&self) -> usize {
        VAR_CELL_HEADER_LEN + self.payload.len()
    }
}

/// Either kind of framed cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnyCell {
    /// A fixed-length cell
    Fixed(Cell),
    /// A variable-length cell
    Var(VarCell),
}

impl AnyCell {
    /// Return the command for this cell.
    pub fn cmd(&self) -> ChanCmd {
        match self {
            AnyCell::Fixed(c) => c.cmd(),
            AnyCell::Var(c) => c.cmd(),
        }
    }
    /// Return the circuit ID for this cell.
    pub fn circid(&self) -> CircId {
        match self {
            AnyCell::Fixed(c) => c.circid(),
            AnyCell::Var(c) => c.circid(),
        }
    }
    /// Decode the body of this cell into a typed [`ChanCell`].
    ///
    /// Fails with [`Error::BytesErr`] if the body is malformed for its
    /// command, and with [`Error::ChanProto`] if the command does not
    /// allow this cell's circuit ID.
    pub fn into_chan_cell(self) -> Result<ChanCell> {
        let circid = self.circid();
        let cmd = self.cmd();
        if cmd.is_var_cell() != matches!(self, AnyCell::Var(_)) {
            return Err(Error::ChanProto(format!(
                "{} cell sent with the wrong framing",
                cmd
            )));
        }
        if !cmd.accepts_circid_val(circid) {
            return Err(Error::ChanProto(format!(
                "Invalid circuit ID {} for cell command {}",
                circid, cmd
            )));
        }
        let body: &[u8] = match &self {
            AnyCell::Fixed(c) => &c.payload()[..],
            AnyCell::Var(c) => c.payload(),
        };
        let msg = msg::ChanMsg::decode(cmd, body)?;
        Ok(ChanCell { circid, msg })
    }
}

/// A decoded link cell, to be sent or received on a link.
#[derive(Debug, Clone)]
pub struct ChanCell {
    /// Circuit ID associated with this cell
    circid: CircId,
    /// Underlying message in this cell
    msg: msg::ChanMsg,
}

impl ChanCell {
    /// Construct a new link cell.
    pub fn new(circid: CircId, msg: msg::ChanMsg) -> Self {
        ChanCell { circid, msg }
    }
    /// Return the circuit ID for this cell.
    pub fn circid(&self) -> CircId {
        self.circid
    }
    /// Return a reference to the underlying message of this cell.
    pub fn msg(&self) -> &msg::ChanMsg {
        &self.msg
    }
    /// Consume this cell and return its components.
    pub fn into_circid_and_msg(self) -> (CircId, msg::ChanMsg) {
        (self.circid, self.msg)
    }
    /// Encode this cell into the framing its command calls for.
    pub fn encode(self) -> Result<AnyCell> {
        let ChanCell { circid, msg } = self;
        let cmd = msg.cmd();
        let mut body = Vec::new();
        msg.write_body_onto(&mut body);
        if cmd.is_var_cell() {
            Ok(AnyCell::Var(VarCell::new(circid, cmd, body)?))
        } else {
            Ok(AnyCell::Fixed(Cell::new(circid, cmd, &body[..])?))
        }
    }
}

/// Helper: write the header of a variable-length cell onto `w`.
fn write_var_header<W: Writer + ?Sized>(w: &mut W, circid: CircId, cmd: ChanCmd, len: u16) {
    w.write_u16(circid.into());
    w.write_u8(cmd.into());
    w.write_u16(len);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cmd_framing() {
        assert!(ChanCmd::VERSIONS.is_var_cell());
        assert!(ChanCmd::NETINFO.is_var_cell());
        assert!(ChanCmd::CERT.is_var_cell());
        assert!(ChanCmd::LINK_AUTH.is_var_cell());
        assert!(ChanCmd::from(200).is_var_cell());
        assert!(!ChanCmd::CREATE.is_var_cell());
        assert!(!ChanCmd::RELAY.is_var_cell());
        assert!(!ChanCmd::from(99).is_var_cell());
    }

    #[test]
    fn circid_rules() {
        assert!(ChanCmd::RELAY.accepts_circid_val(7.into()));
        assert!(!ChanCmd::RELAY.accepts_circid_val(0.into()));
        assert!(ChanCmd::VERSIONS.accepts_circid_val(0.into()));
        assert!(!ChanCmd::NETINFO.accepts_circid_val(1.into()));
        assert!(ChanCmd::from(140).accepts_circid_val(1.into()));
        assert!(CircId::from(0x8001).high_bit());
        assert!(!CircId::from(0x7fff).high_bit());
    }

    #[test]
    fn oversized() {
        assert!(matches!(
            Cell::new(1.into(), ChanCmd::RELAY, &[0; 510]),
            Err(Error::InternalError(_))
        ));
        assert!(Cell::new(1.into(), ChanCmd::RELAY, &[0; 509]).is_ok());
        assert!(matches!(
            VarCell::new(0.into(), ChanCmd::VERSIONS, vec![0; 65536]),
            Err(Error::InternalError(_))
        ));
    }

    #[test]
    fn bad_circid_on_decode() {
        let c = Cell::new(0.into(), ChanCmd::RELAY, b"x").unwrap();
        assert!(matches!(
            AnyCell::Fixed(c).into_chan_cell(),
            Err(Error::ChanProto(_))
        ));
        let v = VarCell::new(5.into(), ChanCmd::VERSIONS, vec![0, 2]).unwrap();
        assert!(matches!(
            AnyCell::Var(v).into_chan_cell(),
            Err(Error::ChanProto(_))
        ));
    }
}
