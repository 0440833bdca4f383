//! Configuration logic for a link engine.

use derive_builder::Builder;
use serde::Deserialize;

use std::net::IpAddr;
use std::time::Duration;

use tor_cell::chancell::CELL_LEN;

use crate::{Error, Result};

/// Bandwidth limits for a link engine.
///
/// This type is immutable once constructed. To create an object of this type,
/// use [`BandwidthConfigBuilder`].
#[derive(Debug, Clone, Builder, Deserialize, PartialEq)]
#[builder(setter(prefix = "set"), build_fn(validate = "Self::validate"))]
pub struct BandwidthConfig {
    /// Bytes per second added to each global bucket.
    #[builder(default = "5 * 1024 * 1024")]
    pub(crate) rate: u64,

    /// Most bytes each global bucket may hold.
    #[builder(default = "10 * 1024 * 1024")]
    pub(crate) burst: u64,

    /// If set, every connection gets a receiver bucket that is raised to
    /// this many bytes once a second.
    #[builder(default)]
    #[serde(default)]
    pub(crate) per_conn_cap: Option<u64>,
}

impl BandwidthConfigBuilder {
    /// Reject a burst smaller than the rate.
    fn validate(&self) -> std::result::Result<(), String> {
        if let (Some(rate), Some(burst)) = (self.rate, self.burst) {
            if burst < rate {
                return Err(format!("bandwidth burst {} is below rate {}", burst, rate));
            }
        }
        Ok(())
    }
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        BandwidthConfigBuilder::default().build().unwrap()
    }
}

impl BandwidthConfig {
    /// Check the invariants that the builder enforces, for a value that
    /// came from somewhere else (like a configuration file).
    pub fn validate(&self) -> Result<()> {
        if self.burst < self.rate {
            return Err(Error::Config(format!(
                "bandwidth burst {} is below rate {}",
                self.burst, self.rate
            )));
        }
        if self.rate > i64::MAX as u64 || self.burst > i64::MAX as u64 {
            return Err(Error::Config("bandwidth values too large".into()));
        }
        if let Some(cap) = self.per_conn_cap {
            if cap == 0 || cap > i64::MAX as u64 {
                return Err(Error::Config(format!(
                    "per-connection cap {} out of range",
                    cap
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for a link engine.
///
/// This type is immutable once constructed.  To create an object of
/// this type, use [`LinkConfigBuilder`].
#[derive(Debug, Clone, Builder, Deserialize)]
#[builder(setter(prefix = "set"))]
pub struct LinkConfig {
    /// Capacity in bytes of each connection's input and output buffers.
    #[builder(default = "64 * 1024")]
    pub(crate) buffer_capacity: usize,

    /// Link protocol versions we offer, and accept.
    #[builder(default = "vec![1, 2]")]
    pub(crate) link_protocols: Vec<u16>,

    /// A NETINFO that arrives within this long of our VERSIONS is used
    /// to estimate clock skew.
    #[builder(default = "Duration::from_secs(180)")]
    #[serde(with = "humantime_serde")]
    pub(crate) skew_tolerance: Duration,

    /// A connection whose link is not open after this long is closed.
    #[builder(default = "Duration::from_secs(60)")]
    #[serde(with = "humantime_serde")]
    pub(crate) handshake_timeout: Duration,

    /// A gracefully closing connection that still can't flush its output
    /// after this long is closed anyway.
    #[builder(default = "Duration::from_secs(15)")]
    #[serde(with = "humantime_serde")]
    pub(crate) linger_timeout: Duration,

    /// How many cells' worth of bytes to read from a connection per
    /// readiness event.
    #[builder(default = "16")]
    pub(crate) read_chunk: usize,

    /// Bandwidth limits.
    #[builder(default)]
    pub(crate) bandwidth: BandwidthConfig,

    /// Whether we accept CREATE cells.
    #[builder(default = "true")]
    pub(crate) server_mode: bool,

    /// Addresses we claim for ourselves in NETINFO cells.
    #[builder(default)]
    #[serde(default)]
    pub(crate) advertised_addrs: Vec<IpAddr>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfigBuilder::default().build().unwrap()
    }
}

impl LinkConfig {
    /// Check that this configuration can be used to run an engine.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity < CELL_LEN {
            return Err(Error::Config(format!(
                "buffer capacity {} can't hold a single cell",
                self.buffer_capacity
            )));
        }
        if self.link_protocols.is_empty() || self.link_protocols.contains(&0) {
            return Err(Error::Config(
                "link protocol list must be nonempty and nonzero".into(),
            ));
        }
        if self.read_chunk == 0 {
            return Err(Error::Config("read chunk must be at least one cell".into()));
        }
        self.bandwidth.validate()
    }

    /// Return the most bytes to read in one go.
    pub(crate) fn read_chunk_bytes(&self) -> usize {
        self.read_chunk.saturating_mul(CELL_LEN)
    }

    /// Return the link protocols we support.
    pub fn link_protocols(&self) -> &[u16] {
        &self.link_protocols[..]
    }

    /// Return whether we act as a server.
    pub fn server_mode(&self) -> bool {
        self.server_mode
    }
}
