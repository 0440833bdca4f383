//! Where a link engine gets the time from.

use std::time::{Instant, SystemTime};

/// A source of monotonic and wall-clock time.
///
/// The engine never asks the operating system for the time directly,
/// so that tests can substitute a clock they control.
pub trait Clock {
    /// Return the current monotonic time.
    fn now(&self) -> Instant;
    /// Return the current wall-clock time.
    fn wallclock(&self) -> SystemTime;
}

/// A [`Clock`] that reads the system clocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
    fn wallclock(&self) -> SystemTime {
        SystemTime::now()
    }
}
