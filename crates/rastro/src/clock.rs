//! Injectable clock for deterministic grace-period tests.
//!
//! The tracker never reads wall time directly; it asks the clock it was
//! constructed with. Production code uses [`SystemClock`]; tests drive
//! grace-period expiry with [`FakeClock`].

use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time in milliseconds since the Unix epoch
pub trait Clock {
    /// Current time in milliseconds
    fn now_ms(&self) -> u64;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Settable clock for deterministic tests
#[derive(Debug, Default)]
pub struct FakeClock {
    current_ms: Cell<u64>,
}

impl FakeClock {
    /// Create a fake clock starting at the given time
    #[must_use]
    pub const fn at(time_ms: u64) -> Self {
        Self {
            current_ms: Cell::new(time_ms),
        }
    }

    /// Advance the clock by `delta_ms`
    pub fn advance(&self, delta_ms: u64) {
        self.current_ms.set(self.current_ms.get() + delta_ms);
    }

    /// Jump the clock to an absolute time
    pub fn set(&self, time_ms: u64) {
        self.current_ms.set(time_ms);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.current_ms.get()
    }
}
