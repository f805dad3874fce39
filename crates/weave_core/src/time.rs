//! # Clocks
//!
//! Elapsed wall-time in seconds, as seen by the network layer.
//!
//! The transport stamps every received datagram with [`Clock::now`], and the
//! client/server tick logic compares `now()` values against resend and
//! snapshot intervals. Tests drive a [`ManualClock`] so that cadence checks
//! are exact instead of sleep-based.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Source of monotonic time in seconds.
///
/// Implementations must never go backwards. The value is relative to an
/// arbitrary origin (usually clock creation).
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Seconds elapsed since the clock's origin.
    fn now(&self) -> f64;
}

/// Clock shared between the tick thread and the transport's receive thread.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by [`Instant`].
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose origin is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Convenience constructor for a [`SharedClock`].
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    seconds: Mutex<f64>,
}

impl ManualClock {
    /// Creates a clock reading zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `seconds`. Negative steps are ignored.
    pub fn advance(&self, seconds: f64) {
        if seconds > 0.0 {
            *self.seconds.lock() += seconds;
        }
    }

    /// Sets the clock to `seconds` if that is not earlier than the current
    /// reading.
    pub fn set(&self, seconds: f64) {
        let mut current = self.seconds.lock();
        if seconds > *current {
            *current = seconds;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.seconds.lock()
    }
}
