//! The link engine: every connection, and the events that drive them.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::distributions::Distribution;
use rand::Rng;
use tor_cell::chancell::{codec, ChanCell, CircId};
use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::LinkConfig;
use crate::conn::{CloseMode, CloseReason, CloseRequest, Connection, Role};
use crate::connmap::{ConnHandle, ConnMap};
use crate::dispatch::dispatch;
use crate::handshake::{HandshakeState, LinkCtx};
use crate::ratelim::RateLimiter;
use crate::traits::{CircuitLayer, LocalAddrPolicy, LoopbackOnly, Transport, TrustStore};
use crate::unique_id::{UniqId, UniqIdContext};
use crate::{Error, Result};

/// After a long stall, don't run more than this many refills at once.
///
/// Buckets are clamped at their burst, so extra refills change nothing.
const MAX_CATCHUP_REFILLS: u64 = 60;

/// How many random circuit IDs to try before giving up.
const CIRC_ID_ATTEMPTS: usize = 16;

/// The link layer of a relay.
///
/// A `LinkEngine` owns every connection to another relay, along with
/// the bandwidth buckets they share.  It is driven by readiness
/// events from a reactor, and reaches the rest of the relay through
/// its [`CircuitLayer`] and [`TrustStore`].
pub struct LinkEngine<T, C, S> {
    /// Configuration.
    config: LinkConfig,
    /// Every connection that hasn't been reaped.
    conns: ConnMap<Connection<T>>,
    /// Bandwidth buckets.
    ratelim: RateLimiter,
    /// The circuit layer.
    circuits: C,
    /// Our keys, and our judge of certificates.
    trust: S,
    /// Source of time.
    clock: Box<dyn Clock>,
    /// Allocator for connection log identifiers.
    ids: UniqIdContext,
    /// Connections that are ready to be reaped.
    pending_removal: Vec<ConnHandle>,
    /// When the buckets were last refilled.
    last_refill: Instant,
}

impl<T, C, S> LinkEngine<T, C, S>
where
    T: Transport,
    C: CircuitLayer,
    S: TrustStore,
{
    /// Make a new engine that reads the system clock.
    pub fn new(config: LinkConfig, circuits: C, trust: S) -> Result<Self> {
        Self::with_clock(config, circuits, trust, Box::new(SystemClock))
    }

    /// Make a new engine that takes its time from `clock`.
    pub fn with_clock(
        config: LinkConfig,
        circuits: C,
        trust: S,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let ratelim = RateLimiter::new(&config.bandwidth, Box::new(LoopbackOnly));
        let last_refill = clock.now();
        Ok(LinkEngine {
            config,
            conns: ConnMap::new(),
            ratelim,
            circuits,
            trust,
            clock,
            ids: UniqIdContext::new(),
            pending_removal: Vec::new(),
            last_refill,
        })
    }

    /// Replace the policy that decides which peers are exempt from
    /// bandwidth accounting.
    pub fn set_local_addr_policy(&mut self, policy: Box<dyn LocalAddrPolicy>) {
        self.ratelim.set_local_policy(policy);
    }

    /// Return this engine's configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
    /// Return the circuit layer.
    pub fn circuits(&self) -> &C {
        &self.circuits
    }
    /// Return the circuit layer, mutably.
    pub fn circuits_mut(&mut self) -> &mut C {
        &mut self.circuits
    }
    /// Return the trust store.
    pub fn trust_store(&self) -> &S {
        &self.trust
    }

    /// Return the number of connections that haven't been reaped.
    pub fn n_connections(&self) -> usize {
        self.conns.len()
    }
    /// Return handles to every connection that hasn't been reaped.
    pub fn connections(&self) -> Vec<ConnHandle> {
        self.conns.handles()
    }

    /// Return the levels of the global read and write buckets.
    pub fn global_bucket_levels(&self) -> (i64, i64) {
        (
            self.ratelim.global_read_level(),
            self.ratelim.global_write_level(),
        )
    }

    /// Start a link over `transport`, which we opened to `addr`.
    ///
    /// Our VERSIONS cell is queued at once.
    pub fn launch(&mut self, transport: T, addr: SocketAddr) -> Result<ConnHandle> {
        self.add_connection(transport, addr, Role::Initiator)
    }

    /// Start a link over `transport`, which `addr` opened to us.
    pub fn accept(&mut self, transport: T, addr: SocketAddr) -> Result<ConnHandle> {
        self.add_connection(transport, addr, Role::Responder)
    }

    /// Helper: add a connection in `role` and start its handshake.
    fn add_connection(&mut self, transport: T, addr: SocketAddr, role: Role) -> Result<ConnHandle> {
        let unique_id = self.ids.next();
        let conn = Connection::new(
            unique_id,
            transport,
            addr,
            role,
            self.config.buffer_capacity,
            self.ratelim.new_receiver_bucket(),
            self.clock.now(),
        );
        let h = self.conns.insert(conn);
        debug!("{}: New {:?} connection with {}", unique_id, role, addr);

        let r = {
            let ctx = LinkCtx {
                config: &self.config,
                trust: &self.trust,
                now: self.clock.now(),
                wallclock: self.clock.wallclock(),
            };
            match self.conns.get_mut(h) {
                Some(conn) => conn.start_handshake(&ctx),
                None => Err(Error::InternalError("connection vanished".into())),
            }
        };
        self.check(h, r)?;
        Ok(h)
    }

    /// Helper: if `r` is a fatal error, mark `h` for close.
    fn check<X>(&mut self, h: ConnHandle, r: Result<X>) -> Result<X> {
        if let Err(e) = &r {
            if e.is_fatal() {
                self.close_on_error(h, e);
            }
        }
        r
    }

    /// Helper: mark `h` for close because of `e`.
    fn close_on_error(&mut self, h: ConnHandle, e: &Error) {
        if let Some(conn) = self.conns.get(h) {
            if !conn.is_closing() {
                match e {
                    Error::PeerClosed => debug!("{}: Peer closed connection", conn.unique_id),
                    _ => warn!("{}: Closing connection: {}", conn.unique_id, e),
                }
            }
        }
        let _ = self.mark_for_close(h, e.close_reason(), e.close_mode());
    }

    /// Read what the transport for `h` has to give (within our
    /// bandwidth budget), and handle every complete cell.
    ///
    /// Returns the number of bytes read.  On a fatal error, the
    /// connection has already been marked for close.
    pub fn on_bytes_ready(&mut self, h: ConnHandle) -> Result<usize> {
        let r = self.read_and_dispatch(h);
        self.check(h, r)
    }

    /// Helper: body of on_bytes_ready.
    fn read_and_dispatch(&mut self, h: ConnHandle) -> Result<usize> {
        let ctx = LinkCtx {
            config: &self.config,
            trust: &self.trust,
            now: self.clock.now(),
            wallclock: self.clock.wallclock(),
        };
        let conn = self.conns.get_mut(h).ok_or(Error::NoSuchConnection)?;
        if conn.is_closing() {
            return Ok(0);
        }
        if self.ratelim.should_pause(conn) {
            trace!("{}: Out of read bandwidth", conn.unique_id);
            conn.read_blocked_on_bw = true;
            conn.wants_read = false;
            return Ok(0);
        }

        let mut total = 0;
        let mut chunk = ctx.config.read_chunk_bytes();
        loop {
            let want = chunk.min(conn.inbuf.remaining_capacity());
            let budget = self.ratelim.read_budget(conn, want);
            if budget == 0 {
                break;
            }
            let n = conn.inbuf.fill_from(&mut conn.transport, budget)?;
            if n == 0 {
                break;
            }
            self.ratelim.charge_read(conn, n);
            conn.last_read = ctx.now;
            total += n;
            chunk -= n;
            process_inbuf(h, conn, &mut self.circuits, &ctx)?;
            if chunk == 0 || conn.transport.pending_bytes() == 0 {
                break;
            }
        }

        if self.ratelim.should_pause(conn) {
            trace!("{}: Read bandwidth exhausted; pausing", conn.unique_id);
            conn.read_blocked_on_bw = true;
            conn.wants_read = false;
        }
        Ok(total)
    }

    /// Handle a cell that some other layer decoded for `h`.
    pub fn on_cell_decoded(&mut self, h: ConnHandle, cell: ChanCell) -> Result<()> {
        let r = {
            let ctx = LinkCtx {
                config: &self.config,
                trust: &self.trust,
                now: self.clock.now(),
                wallclock: self.clock.wallclock(),
            };
            let conn = self.conns.get_mut(h).ok_or(Error::NoSuchConnection)?;
            if conn.is_closing() {
                return Err(Error::ConnectionClosing);
            }
            dispatch(h, conn, &mut self.circuits, &ctx, cell)
        };
        self.check(h, r)
    }

    /// Write as much queued output for `h` as the transport and our
    /// bandwidth budget allow.
    ///
    /// Returns the number of bytes written.
    pub fn on_writable(&mut self, h: ConnHandle) -> Result<usize> {
        let r = self.flush(h);
        let (n, flushed) = self.check(h, r)?;
        if flushed {
            self.on_flush_complete(h)?;
        }
        Ok(n)
    }

    /// Helper: body of on_writable.  Also reports whether the output
    /// buffer is now empty.
    fn flush(&mut self, h: ConnHandle) -> Result<(usize, bool)> {
        let now = self.clock.now();
        let conn = self.conns.get_mut(h).ok_or(Error::NoSuchConnection)?;
        if conn.outbuf.is_empty() {
            conn.wants_write = false;
            return Ok((0, true));
        }
        if self.ratelim.should_pause_write() {
            trace!("{}: Out of write bandwidth", conn.unique_id);
            conn.write_blocked_on_bw = true;
            conn.wants_write = false;
            return Ok((0, false));
        }
        let budget = self.ratelim.write_budget(conn.outbuf.len());
        let n = conn.outbuf.drain_to(&mut conn.transport, budget)?;
        self.ratelim.charge_write(conn, n);
        if n > 0 {
            conn.last_write = now;
        }
        let flushed = conn.outbuf.is_empty();
        if flushed {
            conn.wants_write = false;
        }
        Ok((n, flushed))
    }

    /// Note that everything queued on `h` has been written.
    ///
    /// A connection that was closing gracefully can now be reaped.
    pub fn on_flush_complete(&mut self, h: ConnHandle) -> Result<()> {
        let conn = self.conns.get(h).ok_or(Error::NoSuchConnection)?;
        if conn.is_closing() && conn.outbuf.is_empty() {
            trace!("{}: Flushed; ready to close", conn.unique_id);
            self.schedule_removal(h);
        }
        Ok(())
    }

    /// Note that the peer on `h` hung up.
    pub fn on_peer_closed(&mut self, h: ConnHandle) -> Result<()> {
        if let Some(conn) = self.conns.get(h) {
            debug!("{}: Peer closed connection", conn.unique_id);
        }
        self.mark_for_close(h, CloseReason::PeerClosed, CloseMode::Immediate)
    }

    /// Queue `cell` for sending on `h`.
    ///
    /// Only an open link accepts cells this way; the handshake sends its
    /// own.
    pub fn send_cell(&mut self, h: ConnHandle, cell: ChanCell) -> Result<()> {
        let conn = self.conns.get_mut(h).ok_or(Error::NoSuchConnection)?;
        if conn.is_closing() {
            return Err(Error::ConnectionClosing);
        }
        if !conn.handshake.is_open() {
            return Err(Error::ChanProto("link is not open yet".into()));
        }
        let r = conn.queue_cell(cell);
        self.check(h, r)
    }

    /// Mark `h` for close.
    ///
    /// This is idempotent, except that an immediate close overrides an
    /// earlier graceful one.  The connection is removed by a later
    /// [`reap_closed`](Self::reap_closed): at once if `mode` is
    /// immediate or nothing is queued, or else when its output is
    /// flushed or its linger timeout expires.
    pub fn mark_for_close(
        &mut self,
        h: ConnHandle,
        reason: CloseReason,
        mode: CloseMode,
    ) -> Result<()> {
        let now = self.clock.now();
        let conn = self.conns.get_mut(h).ok_or(Error::NoSuchConnection)?;
        let ready = match conn.close.as_mut() {
            Some(req) => {
                if mode == CloseMode::Immediate && req.mode == CloseMode::Graceful {
                    debug!("{}: Closing immediately", conn.unique_id);
                    req.mode = CloseMode::Immediate;
                    conn.outbuf.clear();
                    conn.wants_write = false;
                    true
                } else {
                    false
                }
            }
            None => {
                debug!(
                    "{}: Marked for close ({}, {:?})",
                    conn.unique_id, reason, mode
                );
                conn.close = Some(CloseRequest {
                    reason,
                    mode,
                    marked_at: now,
                });
                conn.handshake.close(reason);
                conn.wants_read = false;
                if mode == CloseMode::Immediate {
                    conn.outbuf.clear();
                }
                conn.wants_write = !conn.outbuf.is_empty();
                conn.outbuf.is_empty()
            }
        };
        if ready {
            self.schedule_removal(h);
        }
        Ok(())
    }

    /// Helper: put `h` on the pending-removal queue, once.
    fn schedule_removal(&mut self, h: ConnHandle) {
        if !self.pending_removal.contains(&h) {
            self.pending_removal.push(h);
        }
    }

    /// Remove every connection on the pending-removal queue, and tell the
    /// circuit layer about each.
    ///
    /// Returns the number of connections removed.
    pub fn reap_closed(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending_removal);
        let mut n = 0;
        for h in pending {
            if let Some(conn) = self.conns.remove(h) {
                let reason = conn.close.map(|c| c.reason).unwrap_or(CloseReason::Internal);
                debug!("{}: Connection removed ({})", conn.unique_id, reason);
                self.circuits.connection_closed(h);
                n += 1;
            }
        }
        n
    }

    /// Refill the bandwidth buckets, and wake connections that were
    /// waiting for bandwidth.
    ///
    /// [`run_once`](Self::run_once) calls this once per second.
    pub fn refill_tick(&mut self) {
        self.ratelim.refill_tick(self.conns.values_mut());
    }

    /// Do one pass of reactor work.
    ///
    /// Reads from every connection that wants to read, writes to every
    /// connection that wants to write, enforces the handshake and
    /// linger timeouts, refills the buckets if a second has passed, and
    /// reaps closed connections.  Returns the number of connections
    /// reaped.
    pub fn run_once(&mut self) -> usize {
        for h in self.conns.handles() {
            if self.conns.get(h).map(|c| c.wants_read).unwrap_or(false) {
                if let Err(e) = self.on_bytes_ready(h) {
                    trace!("Read on {} failed: {}", h, e);
                }
            }
            if self.conns.get(h).map(|c| c.wants_write).unwrap_or(false) {
                if let Err(e) = self.on_writable(h) {
                    trace!("Write on {} failed: {}", h, e);
                }
            }
        }

        let now = self.clock.now();
        self.enforce_timeouts(now);

        let elapsed = now.saturating_duration_since(self.last_refill);
        let ticks = elapsed.as_secs();
        if ticks > 0 {
            for _ in 0..ticks.min(MAX_CATCHUP_REFILLS) {
                self.refill_tick();
            }
            self.last_refill += Duration::from_secs(ticks);
        }

        self.reap_closed()
    }

    /// Helper: close links whose handshake took too long, and force
    /// closed any graceful close that has lingered too long.
    fn enforce_timeouts(&mut self, now: Instant) {
        let mut expired = Vec::new();
        let mut lingered = Vec::new();
        for h in self.conns.handles() {
            let conn = match self.conns.get(h) {
                Some(c) => c,
                None => continue,
            };
            match conn.close {
                Some(req) => {
                    let elapsed = now.saturating_duration_since(req.marked_at);
                    let timeout = self.config.linger_timeout;
                    if req.mode == CloseMode::Graceful && elapsed >= timeout {
                        warn!(
                            "{}: Couldn't flush output within {:?}; closing anyway",
                            conn.unique_id, self.config.linger_timeout
                        );
                        lingered.push((h, req.reason));
                    }
                }
                None => {
                    if !conn.handshake.is_open()
                        && now.saturating_duration_since(conn.created_at)
                            >= self.config.handshake_timeout
                    {
                        warn!("{}: Link handshake timed out", conn.unique_id);
                        expired.push(h);
                    }
                }
            }
        }
        for h in expired {
            let e = Error::HandshakeTimeout;
            let _ = self.mark_for_close(h, e.close_reason(), e.close_mode());
        }
        for (h, reason) in lingered {
            let _ = self.mark_for_close(h, reason, CloseMode::Immediate);
        }
    }

    /// Pick an unused circuit ID that we are allowed to allocate on `h`.
    pub fn new_circ_id<R: Rng>(&self, h: ConnHandle, rng: &mut R) -> Result<CircId> {
        let conn = self.conns.get(h).ok_or(Error::NoSuchConnection)?;
        for _ in 0..CIRC_ID_ATTEMPTS {
            let id = conn.circ_id_range.sample(rng);
            if self.circuits.lookup(h, id).is_none() {
                return Ok(id);
            }
        }
        Err(Error::InternalError(format!(
            "no free circuit ID after {} tries",
            CIRC_ID_ATTEMPTS
        )))
    }

    /// Helper: look up a connection.
    fn conn(&self, h: ConnHandle) -> Result<&Connection<T>> {
        self.conns.get(h).ok_or(Error::NoSuchConnection)
    }

    /// Return the handshake state of `h`.
    pub fn handshake(&self, h: ConnHandle) -> Result<&HandshakeState> {
        Ok(&self.conn(h)?.handshake)
    }
    /// Return true if `h` is open and its peer has proven who it is.
    pub fn is_authenticated(&self, h: ConnHandle) -> Result<bool> {
        Ok(self.conn(h)?.handshake.authenticated())
    }
    /// Return the negotiated link protocol of `h`, or 0 if none yet.
    pub fn link_version(&self, h: ConnHandle) -> Result<u16> {
        Ok(self.conn(h)?.handshake.link_proto())
    }
    /// Return true if `h` can carry circuit cells.
    pub fn is_open(&self, h: ConnHandle) -> Result<bool> {
        Ok(self.conn(h)?.handshake.is_open())
    }
    /// Return true if `h` has been marked for close.
    pub fn is_closing(&self, h: ConnHandle) -> Result<bool> {
        Ok(self.conn(h)?.is_closing())
    }
    /// Return true if the reactor should report `h` readable.
    pub fn wants_read(&self, h: ConnHandle) -> Result<bool> {
        Ok(self.conn(h)?.wants_read)
    }
    /// Return true if the reactor should report `h` writable.
    pub fn wants_write(&self, h: ConnHandle) -> Result<bool> {
        Ok(self.conn(h)?.wants_write)
    }
    /// Return true if reads on `h` are paused for lack of bandwidth.
    pub fn is_read_blocked(&self, h: ConnHandle) -> Result<bool> {
        Ok(self.conn(h)?.read_blocked_on_bw)
    }
    /// Return the number of bytes queued for writing on `h`.
    pub fn pending_output(&self, h: ConnHandle) -> Result<usize> {
        Ok(self.conn(h)?.outbuf.len())
    }
    /// Return the number of padding cells received on `h`.
    pub fn n_padding(&self, h: ConnHandle) -> Result<u64> {
        Ok(self.conn(h)?.n_padding)
    }
    /// Return the log identifier of `h`.
    pub fn unique_id(&self, h: ConnHandle) -> Result<UniqId> {
        Ok(self.conn(h)?.unique_id)
    }
    /// Return the peer address of `h`.
    pub fn peer_addr(&self, h: ConnHandle) -> Result<SocketAddr> {
        Ok(self.conn(h)?.real_addr)
    }
    /// Return the transport of `h`.
    pub fn transport(&self, h: ConnHandle) -> Result<&T> {
        Ok(&self.conn(h)?.transport)
    }
}

/// Decode and dispatch every complete cell in the input buffer of `conn`.
fn process_inbuf<T, C, S>(
    h: ConnHandle,
    conn: &mut Connection<T>,
    circuits: &mut C,
    ctx: &LinkCtx<'_, S>,
) -> Result<()>
where
    T: Transport,
    C: CircuitLayer,
    S: TrustStore,
{
    while let Some(cell) = codec::read_chan_cell(&mut conn.inbuf)? {
        dispatch(h, conn, circuits, ctx, cell)?;
    }
    Ok(())
}
