//! The messages a link cell can carry, one type per command.
//!
//! Each message type implements [`Body`], which knows how to encode it,
//! and [`Readable`], which knows how to decode it from a cell payload.

use super::{ChanCmd, RawCellBody, CELL_DATA_LEN};
use std::net::{IpAddr, Ipv4Addr};
use tor_linkbuf::{Error, Readable, Reader, Result, Writer};

use caret::caret_int;

/// A type that can appear as the payload of a link cell.
pub trait Body: Readable {
    /// Wrap this body in the matching [`ChanMsg`] variant.
    fn into_message(self) -> ChanMsg;
    /// Encode this body onto `w`.
    ///
    /// Only the body is written: no header, and no padding.
    fn write_body_onto<W: Writer + ?Sized>(self, w: &mut W);
}

/// A message sent between two relays over a single link.
///
/// Circuit-level messages (`Create`, `Relay`, `Destroy` and friends)
/// are passed on to the circuit layer; the others are part of link
/// negotiation.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum ChanMsg {
    /// Ignored filler.
    Padding(Padding),
    /// Cell to create a new circuit.
    Create(Create),
    /// Cell to create a new circuit with no public-key handshake.
    CreateFast(CreateFast),
    /// Answer to a Create cell
    Created(Created),
    /// Answer to a CreateFast cell
    CreatedFast(CreatedFast),
    /// Opaque traffic for a circuit.
    Relay(Relay),
    /// Tear down a circuit
    Destroy(Destroy),
    /// Part of link negotiation: describes what link protocol versions
    /// we support
    Versions(Versions),
    /// Part of link negotiation: describes our position on the network
    Netinfo(Netinfo),
    /// Part of link negotiation: the sender's certificates
    Certs(Certs),
    /// Part of link negotiation: the initiator proves its identity
    LinkAuth(LinkAuth),
    /// A command we don't know; ignored.
    Unrecognized(Unrecognized),
}

impl ChanMsg {
    /// Return the command that goes with this message.
    pub fn cmd(&self) -> ChanCmd {
        use ChanMsg::*;
        match self {
            Padding(_) => ChanCmd::PADDING,
            Create(_) => ChanCmd::CREATE,
            CreateFast(_) => ChanCmd::CREATE_FAST,
            Created(_) => ChanCmd::CREATED,
            CreatedFast(_) => ChanCmd::CREATED_FAST,
            Relay(_) => ChanCmd::RELAY,
            Destroy(_) => ChanCmd::DESTROY,
            Versions(_) => ChanCmd::VERSIONS,
            Netinfo(_) => ChanCmd::NETINFO,
            Certs(_) => ChanCmd::CERT,
            LinkAuth(_) => ChanCmd::LINK_AUTH,
            Unrecognized(c) => c.cmd(),
        }
    }

    /// Encode the body of this message onto `w`, with no cell header.
    pub fn write_body_onto<W: Writer + ?Sized>(self, w: &mut W) {
        use ChanMsg::*;
        match self {
            Padding(b) => b.write_body_onto(w),
            Create(b) => b.write_body_onto(w),
            CreateFast(b) => b.write_body_onto(w),
            Created(b) => b.write_body_onto(w),
            CreatedFast(b) => b.write_body_onto(w),
            Relay(b) => b.write_body_onto(w),
            Destroy(b) => b.write_body_onto(w),
            Versions(b) => b.write_body_onto(w),
            Netinfo(b) => b.write_body_onto(w),
            Certs(b) => b.write_body_onto(w),
            LinkAuth(b) => b.write_body_onto(w),
            Unrecognized(b) => b.write_body_onto(w),
        }
    }

    /// Read a message with command `cmd` from `r`.
    ///
    /// For fixed-length cells the reader holds the whole padded payload;
    /// for variable-length cells it holds exactly the body.
    pub fn take(r: &mut Reader<'_>, cmd: ChanCmd) -> Result<Self> {
        use ChanMsg::*;
        Ok(match cmd {
            ChanCmd::PADDING => Padding(r.extract()?),
            ChanCmd::CREATE => Create(r.extract()?),
            ChanCmd::CREATE_FAST => CreateFast(r.extract()?),
            ChanCmd::CREATED => Created(r.extract()?),
            ChanCmd::CREATED_FAST => CreatedFast(r.extract()?),
            ChanCmd::RELAY => Relay(r.extract()?),
            ChanCmd::DESTROY => Destroy(r.extract()?),
            ChanCmd::VERSIONS => Versions(r.extract()?),
            ChanCmd::NETINFO => Netinfo(r.extract()?),
            ChanCmd::CERT => Certs(r.extract()?),
            ChanCmd::LINK_AUTH => LinkAuth(r.extract()?),
            _ => Unrecognized(unrecognized_with_cmd(cmd, r)?),
        })
    }

    /// Decode a message with command `cmd` from a framed cell's payload.
    pub fn decode(cmd: ChanCmd, payload: &[u8]) -> Result<Self> {
        let mut r = Reader::from_slice(payload);
        Self::take(&mut r, cmd)
    }
}

/// A fixed-length cell with no meaning.
///
/// Receivers count it and drop it.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Padding {}
impl Padding {
    /// Make a padding message.
    pub fn new() -> Self {
        Padding {}
    }
}
impl Body for Padding {
    fn into_message(self) -> ChanMsg {
        ChanMsg::Padding(self)
    }
    fn write_body_onto<W: Writer + ?Sized>(self, _w: &mut W) {}
}
impl Readable for Padding {
    fn take_from(_r: &mut Reader<'_>) -> Result<Self> {
        Ok(Padding {})
    }
}

/// Declare a message holding a handshake of exactly `$len` bytes, read
/// from the front of a fixed-length cell.
macro_rules! fixed_len {
    {
        $(#[$meta:meta])*
        $name:ident , $cmd:ident, $len:ident
    } => {
        $(#[$meta])*
        #[derive(Clone,Debug)]
        pub struct $name {
            /// Handshake bytes, exactly `$len` of them.
            handshake: Vec<u8>
        }
        impl $name {
            /// Wrap `handshake`, cutting or zero-padding it to length.
            pub fn new<B>(handshake: B) -> Self
                where B: Into<Vec<u8>>
            {
                let mut handshake = handshake.into();
                handshake.resize($len, 0);
                $name { handshake }
            }
            /// Return the handshake bytes.
            pub fn body(&self) -> &[u8] {
                &self.handshake[..]
            }
            /// Unwrap the handshake bytes.
            pub fn into_body(self) -> Vec<u8> {
                self.handshake
            }
        }
        impl Body for $name {
            fn into_message(self) -> ChanMsg {
                ChanMsg::$name(self)
            }
            fn write_body_onto<W: Writer + ?Sized>(self, w: &mut W) {
                w.write_all(&self.handshake[..])
            }
        }
        impl Readable for $name {
            fn take_from(r: &mut Reader<'_>) -> Result<Self> {
                Ok($name {
                    handshake: r.take($len)?.into(),
                })
            }
        }
    }
}

/// Length of the onion skin in a CREATE cell.
pub const TAP_C_HANDSHAKE_LEN: usize = 128 + 16 + 42;
/// Length of the reply in a CREATED cell.
pub const TAP_S_HANDSHAKE_LEN: usize = 128 + 20;

/// Length of the key material in a CREATE_FAST cell.
pub const FAST_C_HANDSHAKE_LEN: usize = 20;
/// Length of the reply in a CREATED_FAST cell: key material and a digest.
pub const FAST_S_HANDSHAKE_LEN: usize = 20 + 20;

fixed_len! {
    /// Asks the receiver to extend a circuit to itself with the TAP
    /// handshake.
    ///
    /// Answered with Created, or with Destroy on refusal.
    Create, CREATE, TAP_C_HANDSHAKE_LEN
}
fixed_len! {
    /// Successful reply to Create.
    Created, CREATED, TAP_S_HANDSHAKE_LEN
}
fixed_len! {
    /// Like Create, but without public-key operations.
    ///
    /// Only meaningful for a circuit's first hop, where the link
    /// itself is already authenticated.
    CreateFast, CREATE_FAST, FAST_C_HANDSHAKE_LEN
}
fixed_len! {
    /// Successful reply to CreateFast.
    CreatedFast, CREATED_FAST, FAST_S_HANDSHAKE_LEN
}

/// Traffic on a circuit.
///
/// The body is opaque here; it is handed to the circuit layer as-is.
#[derive(Clone)]
pub struct Relay {
    /// The whole payload, still encrypted.
    body: Box<RawCellBody>,
}
impl Relay {
    /// Make a Relay message whose payload starts with `body`.
    ///
    /// Short bodies are zero-padded; bytes beyond [`CELL_DATA_LEN`]
    /// are dropped.
    pub fn new<P>(body: P) -> Self
    where
        P: AsRef<[u8]>,
    {
        let mut payload = Box::new([0_u8; CELL_DATA_LEN]);
        for (dst, src) in payload.iter_mut().zip(body.as_ref()) {
            *dst = *src;
        }
        Relay { body: payload }
    }
    /// Return the payload.
    pub fn body(&self) -> &RawCellBody {
        &self.body
    }
    /// Unwrap the payload.
    pub fn into_relay_body(self) -> RawCellBody {
        *self.body
    }
}
impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Relay { .. }")
    }
}
impl Body for Relay {
    fn into_message(self) -> ChanMsg {
        ChanMsg::Relay(self)
    }
    fn write_body_onto<W: Writer + ?Sized>(self, w: &mut W) {
        w.write_all(&self.body[..])
    }
}
impl Readable for Relay {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Relay::new(r.take(CELL_DATA_LEN)?))
    }
}

/// Closes a circuit on this link.
///
/// The circuit layer is told which side of the circuit went away, and
/// why.
#[derive(Clone, Debug)]
pub struct Destroy {
    /// Why the sender closed the circuit.
    reason: DestroyReason,
}
impl Destroy {
    /// Make a Destroy message with a given reason.
    pub fn new(reason: DestroyReason) -> Self {
        Destroy { reason }
    }
    /// Return the reason code.
    pub fn reason(&self) -> DestroyReason {
        self.reason
    }
}
impl Body for Destroy {
    fn into_message(self) -> ChanMsg {
        ChanMsg::Destroy(self)
    }
    fn write_body_onto<W: Writer + ?Sized>(self, w: &mut W) {
        w.write_u8(self.reason.into())
    }
}
impl Readable for Destroy {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Destroy::new(r.take_u8()?.into()))
    }
}

caret_int! {
    /// Reason code carried in a Destroy message.
    pub struct DestroyReason(u8) {
        /// Unspecified.
        NONE = 0,
        /// The other side broke the protocol.
        PROTOCOL = 1,
        /// Something went wrong inside the sender.
        INTERNAL = 2,
        /// The circuit's owner asked for it to be cut.
        REQUESTED = 3,
        /// The sender is hibernating, and takes no new circuits.
        HIBERNATING = 4,
        /// The sender is short of memory, sockets, or circuit IDs.
        RESOURCELIMIT = 5,
        /// A connection to the next relay failed.
        CONNECTFAILED = 6,
        /// The next relay had the wrong identity.
        OR_IDENTITY = 7,
        /// A link under this circuit closed.
        CHANNEL_CLOSED = 8,
        /// The circuit is old or used up.
        FINISHED = 9,
        /// Building the circuit took too long.
        TIMEOUT = 10,
        /// The circuit was closed without being asked to.
        DESTROYED = 11,
        /// No such onion service.
        NOSUCHSERVICE = 12
    }
}

/// First message of link negotiation: the link protocol versions the
/// sender speaks.
#[derive(Clone, Debug)]
pub struct Versions {
    /// Versions, in the order the sender listed them.
    versions: Vec<u16>,
}
impl Versions {
    /// Make a Versions message listing `vs`.
    ///
    /// Fails if the list can't fit in a variable-length cell.
    pub fn new<B>(vs: B) -> crate::Result<Self>
    where
        B: Into<Vec<u16>>,
    {
        let versions = vs.into();
        if versions.len() * 2 > u16::MAX as usize {
            return Err(crate::Error::CantEncode);
        }
        Ok(Versions { versions })
    }
    /// Return the listed versions.
    pub fn versions(&self) -> &[u16] {
        &self.versions[..]
    }
    /// Return the highest version that appears both here and in
    /// `ours`, if any.
    pub fn best_shared_link_protocol(&self, ours: &[u16]) -> Option<u16> {
        self.versions
            .iter()
            .copied()
            .filter(|v| ours.contains(v))
            .max()
    }
}
impl Body for Versions {
    fn into_message(self) -> ChanMsg {
        ChanMsg::Versions(self)
    }
    fn write_body_onto<W: Writer + ?Sized>(self, w: &mut W) {
        self.versions.into_iter().for_each(|v| w.write_u16(v));
    }
}
impl Readable for Versions {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        let mut versions = Vec::with_capacity(r.remaining() / 2);
        while r.remaining() > 0 {
            versions.push(r.take_u16()?);
        }
        Ok(Versions { versions })
    }
}

/// Link negotiation: the sender's clock, the address it sees the
/// receiver at, and the addresses it claims for itself.
#[derive(Clone, Debug)]
pub struct Netinfo {
    /// Sender's wall clock, in seconds since the epoch.
    timestamp: u32,
    /// Where the sender sees the receiver; `None` if unspecified.
    their_addr: Option<IpAddr>,
    /// The sender's own addresses.
    my_addrs: Vec<IpAddr>,
}
/// Address type byte for IPv4 in a NETINFO address.
const ADDR_TYPE_IPV4: u8 = 0x04;
/// Address type byte for IPv6 in a NETINFO address.
const ADDR_TYPE_IPV6: u8 = 0x06;

/// Write `addr` as a type-length-value triple.
fn write_netinfo_addr<W: Writer + ?Sized>(w: &mut W, addr: &IpAddr) {
    let (atype, octets): (u8, Vec<u8>) = match addr {
        IpAddr::V4(a) => (ADDR_TYPE_IPV4, a.octets().to_vec()),
        IpAddr::V6(a) => (ADDR_TYPE_IPV6, a.octets().to_vec()),
    };
    w.write_u8(atype);
    w.write_u8(octets.len() as u8);
    w.write_all(&octets);
}

/// Read one type-length-value address.
///
/// Returns `None` for an unknown type, or a known type with the wrong
/// length.  A length that runs past the end of the message is an error.
fn read_netinfo_addr(r: &mut Reader<'_>) -> Result<Option<IpAddr>> {
    let atype = r.take_u8()?;
    let alen = r.take_u8()? as usize;
    let value = r.take(alen)?;
    Ok(match atype {
        ADDR_TYPE_IPV4 if alen == 4 => {
            let mut octets = [0_u8; 4];
            octets.copy_from_slice(value);
            Some(IpAddr::from(octets))
        }
        ADDR_TYPE_IPV6 if alen == 16 => {
            let mut octets = [0_u8; 16];
            octets.copy_from_slice(value);
            Some(IpAddr::from(octets))
        }
        _ => None,
    })
}
impl Netinfo {
    /// Make a Netinfo message.
    pub fn new<V>(timestamp: u32, their_addr: Option<IpAddr>, my_addrs: V) -> Self
    where
        V: Into<Vec<IpAddr>>,
    {
        Netinfo {
            timestamp,
            their_addr,
            my_addrs: my_addrs.into(),
        }
    }
    /// Return the sender's clock, in seconds since the epoch.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }
    /// Return the address at which the sender sees the recipient.
    pub fn their_addr(&self) -> Option<&IpAddr> {
        self.their_addr.as_ref()
    }
    /// Return the addresses the sender claims for itself.
    pub fn my_addrs(&self) -> &[IpAddr] {
        &self.my_addrs[..]
    }
}
impl Body for Netinfo {
    fn into_message(self) -> ChanMsg {
        ChanMsg::Netinfo(self)
    }
    fn write_body_onto<W: Writer + ?Sized>(self, w: &mut W) {
        w.write_u32(self.timestamp);
        // An unknown address goes on the wire as 0.0.0.0.
        let seen = self.their_addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        write_netinfo_addr(w, &seen);
        let mine = &self.my_addrs[..std::cmp::min(self.my_addrs.len(), u8::MAX as usize)];
        w.write_u8(mine.len() as u8);
        for addr in mine {
            write_netinfo_addr(w, addr);
        }
    }
}
impl Readable for Netinfo {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        let timestamp = r.take_u32()?;
        let their_addr = read_netinfo_addr(r)?.filter(|a| !a.is_unspecified());
        let n_addrs = r.take_u8()?;
        let mut my_addrs = Vec::with_capacity(n_addrs as usize);
        for _ in 0..n_addrs {
            my_addrs.extend(read_netinfo_addr(r)?);
        }
        Ok(Netinfo {
            timestamp,
            their_addr,
            my_addrs,
        })
    }
}

/// The most certificates a Certs message may carry.
pub const MAX_CERTS: usize = 2;

/// Link negotiation: the sender's certificates.
///
/// The body is a sequence of up to [`MAX_CERTS`] blobs, each prefixed
/// by a two-byte length.  This crate does not look inside the blobs.
#[derive(Clone, Debug, Default)]
pub struct Certs {
    /// Certificate blobs, in order.
    certs: Vec<Vec<u8>>,
}
impl Certs {
    /// Make a Certs message with no certificates.
    pub fn new_empty() -> Self {
        Certs { certs: Vec::new() }
    }
    /// Build a certs cell from a list of encoded certificates.
    ///
    /// Fails if there are too many certificates, or one is too long.
    pub fn new(certs: Vec<Vec<u8>>) -> crate::Result<Self> {
        if certs.len() > MAX_CERTS || certs.iter().any(|c| c.len() > u16::MAX as usize) {
            return Err(crate::Error::CantEncode);
        }
        Ok(Certs { certs })
    }
    /// Return the encoded certificates in this cell.
    pub fn certs(&self) -> &[Vec<u8>] {
        &self.certs[..]
    }
}
impl Body for Certs {
    fn into_message(self) -> ChanMsg {
        ChanMsg::Certs(self)
    }
    fn write_body_onto<W: Writer + ?Sized>(self, w: &mut W) {
        for c in self.certs.iter() {
            w.write_u16(c.len() as u16);
            w.write_all(&c[..]);
        }
    }
}
impl Readable for Certs {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        let mut certs = Vec::with_capacity(MAX_CERTS);
        while r.remaining() > 0 {
            if certs.len() == MAX_CERTS {
                return Err(Error::BadMessage("too many certificates in CERT cell"));
            }
            let len = r.take_u16()?;
            certs.push(r.take(len as usize)?.into());
        }
        Ok(Certs { certs })
    }
}

/// The only signature format we recognize in a LinkAuth message.
pub const LINK_AUTH_FORMAT_ED25519: u8 = 0;

/// Link negotiation, initiator to responder only.
///
/// Proves that the initiator holds the signing key
/// named in its certificates, by signing a digest bound to this link.
#[derive(Clone, Debug)]
pub struct LinkAuth {
    /// Format byte; see [`LINK_AUTH_FORMAT_ED25519`].
    format: u8,
    /// Signature over the link authentication digest
    signature: Vec<u8>,
}
impl LinkAuth {
    /// Make a LinkAuth message.
    pub fn new<B>(format: u8, signature: B) -> Self
    where
        B: Into<Vec<u8>>,
    {
        LinkAuth {
            format,
            signature: signature.into(),
        }
    }
    /// Return the signature format byte.
    pub fn format(&self) -> u8 {
        self.format
    }
    /// Return the signature.
    pub fn signature(&self) -> &[u8] {
        &self.signature[..]
    }
}
impl Body for LinkAuth {
    fn into_message(self) -> ChanMsg {
        ChanMsg::LinkAuth(self)
    }
    fn write_body_onto<W: Writer + ?Sized>(self, w: &mut W) {
        // The length covers the format byte and the signature.
        let len = std::cmp::min(self.signature.len() + 1, u16::MAX as usize);
        w.write_u16(len as u16);
        w.write_u8(self.format);
        w.write_all(&self.signature[..len - 1]);
    }
}
impl Readable for LinkAuth {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        let len = r.take_u16()? as usize;
        if len == 0 {
            return Err(Error::BadMessage("empty LINK_AUTH body"));
        }
        let body = r.take(len)?;
        r.should_be_exhausted()?;
        Ok(LinkAuth {
            format: body[0],
            signature: body[1..].into(),
        })
    }
}

/// A message with a command this crate doesn't know.
///
/// The payload is kept as-is so that the message can be logged or
/// re-encoded.
#[derive(Clone, Debug)]
pub struct Unrecognized {
    /// The command the message arrived with.
    cmd: ChanCmd,
    /// Everything after the header.
    content: Vec<u8>,
}
/// Read the rest of `r` as an unrecognized message with command `cmd`.
fn unrecognized_with_cmd(cmd: ChanCmd, r: &mut Reader<'_>) -> Result<Unrecognized> {
    Ok(Unrecognized::new(cmd, r.take(r.remaining())?))
}
impl Unrecognized {
    /// Make a message with an arbitrary command and payload.
    pub fn new<B>(cmd: ChanCmd, content: B) -> Self
    where
        B: Into<Vec<u8>>,
    {
        Unrecognized {
            cmd,
            content: content.into(),
        }
    }
    /// Return the command.
    pub fn cmd(&self) -> ChanCmd {
        self.cmd
    }
}
impl Body for Unrecognized {
    fn into_message(self) -> ChanMsg {
        ChanMsg::Unrecognized(self)
    }
    fn write_body_onto<W: Writer + ?Sized>(self, w: &mut W) {
        w.write_all(&self.content[..])
    }
}
impl Readable for Unrecognized {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        unrecognized_with_cmd(0.into(), r)
    }
}

impl<B: Body> From<B> for ChanMsg {
    fn from(body: B) -> Self {
        body.into_message()
    }
}

/// Link-negotiation messages always travel on circuit 0.
macro_rules! msg_into_cell {
    ($body:ident) => {
        impl From<$body> for super::ChanCell {
            fn from(body: $body) -> Self {
                super::ChanCell {
                    circid: 0.into(),
                    msg: body.into_message(),
                }
            }
        }
    };
}

msg_into_cell!(Padding);
msg_into_cell!(Versions);
msg_into_cell!(Netinfo);
msg_into_cell!(Certs);
msg_into_cell!(LinkAuth);
