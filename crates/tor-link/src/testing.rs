//! Mock implementations of everything a [`LinkEngine`](crate::LinkEngine)
//! talks to, for testing.
//!
//! Nothing here is for production use.

// Note: please remember that this module only exists for writing
// tests.  Let's resist the temptation to add things we don't need.

#![allow(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use tor_cell::chancell::msg::DestroyReason;
use tor_cell::chancell::{CircId, RawCellBody};

use crate::clock::Clock;
use crate::connmap::ConnHandle;
use crate::traits::{
    CircInfo, CircSide, CircState, CircuitLayer, CreateRequest, CreateResponse, Direction,
    PeerKeys, RelayId, Transport, TrustStore,
};
use crate::{Error, Result};

/// A [`Clock`] whose time only moves when a test says so.
///
/// Clones share the same timeline.
#[derive(Clone)]
pub struct MockClock {
    state: Arc<Mutex<ClockState>>,
}

struct ClockState {
    /// What time do we pretend it is (monotonic)?  This value only
    /// moves forward.
    instant: Instant,
    /// What time do we pretend it is (wall clock)?
    wallclock: SystemTime,
}

impl MockClock {
    /// Create a new MockClock, starting at a given wall-clock time.
    pub fn new(wallclock: SystemTime) -> Self {
        MockClock {
            state: Arc::new(Mutex::new(ClockState {
                instant: Instant::now(),
                wallclock,
            })),
        }
    }

    /// Advance the simulated timeline forward by `dur`.
    pub fn advance(&self, dur: Duration) {
        let mut state = self.state.lock().expect("Poisoned lock");
        state.instant += dur;
        state.wallclock += dur;
    }

    /// Simulate a discontinuity in the system clock, by jumping to
    /// `new_wallclock`.
    pub fn jump_to(&self, new_wallclock: SystemTime) {
        let mut state = self.state.lock().expect("Poisoned lock");
        state.wallclock = new_wallclock;
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.state.lock().expect("Poisoned lock").instant
    }
    fn wallclock(&self) -> SystemTime {
        self.state.lock().expect("Poisoned lock").wallclock
    }
}

/// One direction of a [`FakeTransport`] pair.
#[derive(Default)]
struct Pipe {
    data: VecDeque<u8>,
    /// The writing end is gone.
    closed: bool,
    /// Most bytes the pipe will hold, if limited.
    limit: Option<usize>,
}

/// One end of an in-memory, non-blocking byte stream.
///
/// An empty stream reports `WouldBlock` on read; a full one (see
/// [`FakeTransport::set_inbound_limit`]) reports `WouldBlock` on
/// write.  Dropping an end closes it: the other end then reads EOF
/// once it has read everything that was sent.
pub struct FakeTransport {
    /// Bytes coming to us.
    rx: Arc<Mutex<Pipe>>,
    /// Bytes going to the other end.
    tx: Arc<Mutex<Pipe>>,
    /// Shared by both ends.
    binding: Vec<u8>,
}

impl FakeTransport {
    /// Make two connected ends.
    pub fn pair() -> (FakeTransport, FakeTransport) {
        let a = Arc::new(Mutex::new(Pipe::default()));
        let b = Arc::new(Mutex::new(Pipe::default()));
        let binding = rand::random::<[u8; 32]>().to_vec();
        (
            FakeTransport {
                rx: Arc::clone(&a),
                tx: Arc::clone(&b),
                binding: binding.clone(),
            },
            FakeTransport {
                rx: b,
                tx: a,
                binding,
            },
        )
    }

    /// Send `bytes` to the other end, ignoring any limit.
    pub fn push(&self, bytes: &[u8]) {
        self.tx.lock().expect("Poisoned lock").data.extend(bytes);
    }

    /// Take everything the other end has sent us so far.
    pub fn drain(&self) -> Vec<u8> {
        self.rx.lock().expect("Poisoned lock").data.drain(..).collect()
    }

    /// Return the number of bytes waiting for us.
    pub fn n_incoming(&self) -> usize {
        self.rx.lock().expect("Poisoned lock").data.len()
    }

    /// Stop the other end from writing more than `limit` bytes that we
    /// haven't read yet.
    pub fn set_inbound_limit(&self, limit: Option<usize>) {
        self.rx.lock().expect("Poisoned lock").limit = limit;
    }

    /// Close our sending side.
    pub fn shutdown(&self) {
        self.tx.lock().expect("Poisoned lock").closed = true;
    }
}

impl Read for FakeTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.lock().expect("Poisoned lock");
        if rx.data.is_empty() {
            if rx.closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(rx.data.len());
        for (b, v) in buf.iter_mut().zip(rx.data.drain(..n)) {
            *b = v;
        }
        Ok(n)
    }
}

impl Write for FakeTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut tx = self.tx.lock().expect("Poisoned lock");
        if tx.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let room = match tx.limit {
            Some(limit) => limit.saturating_sub(tx.data.len()),
            None => usize::MAX,
        };
        if room == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(room);
        tx.data.extend(&buf[..n]);
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.closed = true;
        }
    }
}

impl Transport for FakeTransport {
    fn binding_material(&self) -> Vec<u8> {
        self.binding.clone()
    }
}

/// A [`CircuitLayer`] that remembers everything it's told.
#[derive(Default, Debug)]
pub struct FakeCircuitLayer {
    pub circuits: HashMap<(ConnHandle, CircId), CircInfo>,
    pub hibernating: bool,
    /// If true, every relay cell is refused.
    pub fail_relay: bool,
    pub creates: Vec<(ConnHandle, CircId, CreateRequest)>,
    pub createds: Vec<(ConnHandle, CircId, CreateResponse)>,
    pub relays: Vec<(ConnHandle, CircId, Direction)>,
    pub destroys: Vec<(ConnHandle, CircId, CircSide, DestroyReason)>,
    pub closed_circs: Vec<(ConnHandle, CircId, DestroyReason)>,
    pub closed_conns: Vec<ConnHandle>,
}

impl FakeCircuitLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a circuit exists.
    pub fn add_circuit(
        &mut self,
        conn: ConnHandle,
        id: CircId,
        state: CircState,
        is_origin: bool,
        side: CircSide,
    ) {
        self.circuits.insert(
            (conn, id),
            CircInfo {
                state,
                is_origin,
                side,
            },
        );
    }
}

impl CircuitLayer for FakeCircuitLayer {
    fn lookup(&self, conn: ConnHandle, id: CircId) -> Option<CircInfo> {
        self.circuits.get(&(conn, id)).copied()
    }
    fn is_hibernating(&self) -> bool {
        self.hibernating
    }
    fn handle_create(&mut self, conn: ConnHandle, id: CircId, req: CreateRequest) {
        self.add_circuit(conn, id, CircState::PendingCreate, false, CircSide::Prev);
        self.creates.push((conn, id, req));
    }
    fn handle_created(&mut self, conn: ConnHandle, id: CircId, reply: CreateResponse) {
        if let Some(c) = self.circuits.get_mut(&(conn, id)) {
            c.state = CircState::Open;
        }
        self.createds.push((conn, id, reply));
    }
    fn deliver_relay(
        &mut self,
        conn: ConnHandle,
        id: CircId,
        dir: Direction,
        _body: Box<RawCellBody>,
    ) -> Result<()> {
        if self.fail_relay {
            return Err(Error::ChanProto("unwanted relay cell".into()));
        }
        self.relays.push((conn, id, dir));
        Ok(())
    }
    fn handle_destroy(
        &mut self,
        conn: ConnHandle,
        id: CircId,
        side: CircSide,
        reason: DestroyReason,
    ) {
        self.circuits.remove(&(conn, id));
        self.destroys.push((conn, id, side, reason));
    }
    fn mark_for_close(&mut self, conn: ConnHandle, id: CircId, reason: DestroyReason) {
        self.circuits.remove(&(conn, id));
        self.closed_circs.push((conn, id, reason));
    }
    fn connection_closed(&mut self, conn: ConnHandle) {
        self.circuits.retain(|(c, _), _| *c != conn);
        self.closed_conns.push(conn);
    }
}

/// A [`TrustStore`] with a real Ed25519 key and a trivial certificate
/// format.
///
/// The one certificate it sends is its identity followed by its
/// signing key (which here are the same key).  It believes any
/// certificate of that shape, unless told to reject everything.
pub struct FakeTrustStore {
    key: SigningKey,
    reject: bool,
}

impl FakeTrustStore {
    /// Make a trust store whose key is derived from `seed`.
    pub fn new(seed: u8) -> Self {
        FakeTrustStore {
            key: SigningKey::from_bytes(&[seed; 32]),
            reject: false,
        }
    }

    /// Make a trust store with a random key.
    pub fn new_random() -> Self {
        FakeTrustStore {
            key: SigningKey::generate(&mut rand::rngs::OsRng),
            reject: false,
        }
    }

    /// Make this trust store reject every certificate.
    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }

    /// Return the verifying half of our key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl TrustStore for FakeTrustStore {
    fn own_identity(&self) -> RelayId {
        self.key.verifying_key().to_bytes().into()
    }
    fn own_certs(&self) -> Vec<Vec<u8>> {
        let k = self.key.verifying_key().to_bytes();
        let mut cert = k.to_vec();
        cert.extend_from_slice(&k[..]);
        vec![cert]
    }
    fn check_certs(&self, certs: &[Vec<u8>]) -> Result<PeerKeys> {
        if self.reject {
            return Err(Error::ChanProto("certificate rejected".into()));
        }
        let cert = match certs.first() {
            Some(c) if c.len() == 64 => c,
            _ => return Err(Error::ChanProto("missing or malformed certificate".into())),
        };
        let mut id = [0_u8; 32];
        id.copy_from_slice(&cert[..32]);
        let mut key = [0_u8; 32];
        key.copy_from_slice(&cert[32..]);
        let signing_key = VerifyingKey::from_bytes(&key)
            .map_err(|_| Error::ChanProto("bad signing key in certificate".into()))?;
        Ok(PeerKeys {
            identity: id.into(),
            signing_key,
        })
    }
    fn sign(&self, digest: &[u8; 32]) -> Signature {
        self.key.sign(&digest[..])
    }
}
