//! Token-bucket bandwidth limiting for a link engine.
//!
//! There are two global buckets, one for reading and one for writing,
//! and optionally one receiver bucket per connection that limits its
//! reads.  Buckets are refilled once a second.  A bucket's level can go
//! negative when a read or write overshoots it; the connection then
//! stays paused until enough refills bring it back above zero.

use std::convert::TryFrom;
use tracing::trace;

use crate::config::BandwidthConfig;
use crate::conn::Connection;
use crate::traits::LocalAddrPolicy;

/// A single token bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RateBucket {
    /// Bytes we may still move.  May be negative.
    level: i64,
    /// Bytes added per refill.
    rate: i64,
    /// Highest level a refill may reach.
    burst: i64,
}

impl RateBucket {
    /// Make a new full bucket.
    pub(crate) fn new(rate: u64, burst: u64) -> Self {
        // BandwidthConfig::validate keeps these in range.
        let rate = rate.min(i64::MAX as u64) as i64;
        let burst = burst.min(i64::MAX as u64) as i64;
        RateBucket {
            level: burst,
            rate,
            burst,
        }
    }

    /// Return the current level.
    pub(crate) fn level(&self) -> i64 {
        self.level
    }

    /// Add one second's worth of tokens, up to the burst.
    fn refill(&mut self) {
        self.level = self.level.saturating_add(self.rate).min(self.burst);
    }

    /// Raise the level to `burst` if it is below that.
    fn raise_to_cap(&mut self) {
        if self.level < self.burst {
            self.level = self.burst;
        }
    }

    /// Take `n` tokens.
    fn charge(&mut self, n: usize) {
        let n = i64::try_from(n).unwrap_or(i64::MAX);
        self.level = self.level.saturating_sub(n);
    }

    /// Return the level as a byte budget.
    fn budget(&self) -> usize {
        usize::try_from(self.level.max(0)).unwrap_or(usize::MAX)
    }
}

/// The bandwidth limiter for every connection in an engine.
pub(crate) struct RateLimiter {
    /// The global read bucket.
    read: RateBucket,
    /// The global write bucket.
    write: RateBucket,
    /// Cap for per-connection receiver buckets, if connections are throttled.
    per_conn_cap: Option<u64>,
    /// Which peers don't count against our buckets.
    local: Box<dyn LocalAddrPolicy>,
}

impl RateLimiter {
    /// Make a new RateLimiter with full buckets.
    pub(crate) fn new(cfg: &BandwidthConfig, local: Box<dyn LocalAddrPolicy>) -> Self {
        RateLimiter {
            read: RateBucket::new(cfg.rate, cfg.burst),
            write: RateBucket::new(cfg.rate, cfg.burst),
            per_conn_cap: cfg.per_conn_cap,
            local,
        }
    }

    /// Replace the policy that decides which peers are local.
    pub(crate) fn set_local_policy(&mut self, local: Box<dyn LocalAddrPolicy>) {
        self.local = local;
    }

    /// Return a receiver bucket for a new connection, if connections are
    /// throttled.
    pub(crate) fn new_receiver_bucket(&self) -> Option<RateBucket> {
        self.per_conn_cap.map(|cap| RateBucket::new(cap, cap))
    }

    /// Return the global read bucket's level.
    pub(crate) fn global_read_level(&self) -> i64 {
        self.read.level()
    }

    /// Return the global write bucket's level.
    pub(crate) fn global_write_level(&self) -> i64 {
        self.write.level()
    }

    /// Refill every bucket, and wake connections that were waiting on
    /// bandwidth and now have some.
    ///
    /// Waking a connection only restores its interest in readiness; no
    /// I/O happens here.
    pub(crate) fn refill_tick<'a, T: 'a>(
        &mut self,
        conns: impl Iterator<Item = &'a mut Connection<T>>,
    ) {
        self.read.refill();
        self.write.refill();
        for conn in conns {
            if let Some(b) = conn.receiver_bucket.as_mut() {
                b.raise_to_cap();
            }
            // A closing connection reads nothing more, but it may still
            // have output to flush.
            if conn.read_blocked_on_bw && !conn.is_closing() && !self.should_pause(conn) {
                trace!("{}: Bandwidth available; resuming reads", conn.unique_id);
                conn.read_blocked_on_bw = false;
                conn.wants_read = true;
            }
            if conn.write_blocked_on_bw && !self.should_pause_write() {
                trace!("{}: Bandwidth available; resuming writes", conn.unique_id);
                conn.write_blocked_on_bw = false;
                conn.wants_write = !conn.outbuf.is_empty();
            }
        }
    }

    /// Return how many bytes `conn` may read right now, out of `requested`.
    pub(crate) fn read_budget<T>(&self, conn: &Connection<T>, requested: usize) -> usize {
        let mut budget = requested.min(self.read.budget());
        if let Some(b) = &conn.receiver_bucket {
            budget = budget.min(b.budget());
        }
        budget
    }

    /// Return how many bytes may be written right now, out of `requested`.
    pub(crate) fn write_budget(&self, requested: usize) -> usize {
        requested.min(self.write.budget())
    }

    /// Record that `conn` read `n` bytes.
    pub(crate) fn charge_read<T>(&mut self, conn: &mut Connection<T>, n: usize) {
        if self.local.is_local(&conn.real_addr.ip()) {
            return;
        }
        self.read.charge(n);
        if let Some(b) = conn.receiver_bucket.as_mut() {
            b.charge(n);
        }
    }

    /// Record that `conn` wrote `n` bytes.
    pub(crate) fn charge_write<T>(&mut self, conn: &Connection<T>, n: usize) {
        if self.local.is_local(&conn.real_addr.ip()) {
            return;
        }
        self.write.charge(n);
    }

    /// Return true if `conn` must stop reading until the next refill.
    pub(crate) fn should_pause<T>(&self, conn: &Connection<T>) -> bool {
        self.read.level() <= 0
            || conn
                .receiver_bucket
                .as_ref()
                .map(|b| b.level() <= 0)
                .unwrap_or(false)
    }

    /// Return true if writing must stop until the next refill.
    pub(crate) fn should_pause_write(&self) -> bool {
        self.write.level() <= 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::BandwidthConfigBuilder;
    use crate::conn::{CloseMode, CloseReason, CloseRequest, Role};
    use crate::traits::LoopbackOnly;
    use crate::unique_id::UniqIdContext;
    use std::time::Instant;

    fn conn(addr: &str, receiver: Option<RateBucket>) -> Connection<()> {
        Connection::new(
            UniqIdContext::new().next(),
            (),
            addr.parse().unwrap(),
            Role::Responder,
            4096,
            receiver,
            Instant::now(),
        )
    }

    fn limiter(rate: u64, burst: u64, cap: Option<u64>) -> RateLimiter {
        let cfg = BandwidthConfigBuilder::default()
            .set_rate(rate)
            .set_burst(burst)
            .set_per_conn_cap(cap)
            .build()
            .unwrap();
        RateLimiter::new(&cfg, Box::new(LoopbackOnly))
    }

    #[test]
    fn bucket_refill_clamps() {
        let mut b = RateBucket::new(100, 250);
        assert_eq!(b.level(), 250);
        b.charge(400);
        assert_eq!(b.level(), -150);
        b.refill();
        assert_eq!(b.level(), -50);
        b.refill();
        b.refill();
        b.refill();
        assert_eq!(b.level(), 250);
    }

    #[test]
    fn budget_and_pause() {
        let mut rl = limiter(1000, 1000, None);
        let mut c = conn("192.0.2.1:9001", None);
        assert_eq!(rl.read_budget(&c, 300), 300);
        assert_eq!(rl.read_budget(&c, 5000), 1000);
        rl.charge_read(&mut c, 1500);
        assert_eq!(rl.global_read_level(), -500);
        assert_eq!(rl.read_budget(&c, 10), 0);
        assert!(rl.should_pause(&c));
        rl.refill_tick(std::iter::once(&mut c));
        assert_eq!(rl.global_read_level(), 500);
        assert!(!rl.should_pause(&c));
    }

    #[test]
    fn receiver_bucket() {
        let mut rl = limiter(10_000, 10_000, Some(100));
        let mut c = conn("192.0.2.1:9001", rl.new_receiver_bucket());
        assert_eq!(rl.read_budget(&c, 5000), 100);
        rl.charge_read(&mut c, 100);
        assert!(rl.should_pause(&c));
        assert_eq!(rl.read_budget(&c, 5000), 0);
        assert_eq!(rl.global_read_level(), 9900);

        c.read_blocked_on_bw = true;
        c.wants_read = false;
        rl.refill_tick(std::iter::once(&mut c));
        assert!(!c.read_blocked_on_bw);
        assert!(c.wants_read);
        assert_eq!(c.receiver_bucket.as_ref().unwrap().level(), 100);
    }

    #[test]
    fn local_exempt() {
        let mut rl = limiter(1000, 1000, Some(10));
        let mut c = conn("127.0.0.1:9001", rl.new_receiver_bucket());
        rl.charge_read(&mut c, 5000);
        rl.charge_write(&c, 5000);
        assert_eq!(rl.global_read_level(), 1000);
        assert_eq!(rl.global_write_level(), 1000);
        assert!(!rl.should_pause(&c));
    }

    #[test]
    fn write_wake() {
        let mut rl = limiter(1000, 1000, None);
        let mut c = conn("192.0.2.1:9001", None);
        rl.charge_write(&c, 1000);
        assert!(rl.should_pause_write());
        assert_eq!(rl.write_budget(77), 0);
        c.outbuf.append(b"x").unwrap();
        c.write_blocked_on_bw = true;
        rl.refill_tick(std::iter::once(&mut c));
        assert!(!c.write_blocked_on_bw);
        assert!(c.wants_write);
        assert_eq!(rl.write_budget(77), 77);
    }

    #[test]
    fn closing_wakes_writes_only() {
        let mut rl = limiter(1000, 1000, None);
        let mut c = conn("192.0.2.1:9001", None);
        rl.charge_read(&mut c, 1000);
        rl.charge_write(&c, 1000);
        c.outbuf.append(b"destroy").unwrap();
        c.read_blocked_on_bw = true;
        c.write_blocked_on_bw = true;
        c.wants_read = false;
        c.wants_write = false;
        c.close = Some(CloseRequest {
            reason: CloseReason::Requested,
            mode: CloseMode::Graceful,
            marked_at: Instant::now(),
        });
        rl.refill_tick(std::iter::once(&mut c));
        assert!(!c.write_blocked_on_bw);
        assert!(c.wants_write);
        assert!(c.read_blocked_on_bw);
        assert!(!c.wants_read);
    }
}
