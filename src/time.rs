//! Monotonic time source.
//!
//! All core logic runs on uptime seconds, strictly non-decreasing for the
//! life of the runtime. Wall-clock never enters the executive; processes that
//! want it go through the environment facility.

use core::cell::Cell;
use std::time::Instant;

/// One tick of granularity, the epsilon of every timeout guarantee.
pub const TICK_SECS: f64 = 0.001;

enum TimeSource {
    /// Uptime follows the host's monotonic clock.
    Host { start: Instant },
    /// Uptime only moves when advanced explicitly.
    Manual { now: Cell<f64> },
}

/// Monotonic uptime, in floating-point seconds.
pub struct Clock {
    source: TimeSource,
    /// High-water mark enforcing non-decreasing reads.
    last: Cell<f64>,
}

impl Clock {
    pub fn host() -> Clock {
        Clock {
            source: TimeSource::Host {
                start: Instant::now(),
            },
            last: Cell::new(0.0),
        }
    }

    pub fn manual() -> Clock {
        Clock {
            source: TimeSource::Manual { now: Cell::new(0.0) },
            last: Cell::new(0.0),
        }
    }

    /// Current uptime in seconds. Never decreases.
    pub fn now(&self) -> f64 {
        let raw = match &self.source {
            TimeSource::Host { start } => start.elapsed().as_secs_f64(),
            TimeSource::Manual { now } => now.get(),
        };
        let clamped = raw.max(self.last.get());
        self.last.set(clamped);
        clamped
    }

    /// Moves a manual clock forward. A host clock ignores this.
    pub fn advance(&mut self, secs: f64) {
        if let TimeSource::Manual { now } = &self.source {
            if secs > 0.0 {
                now.set(now.get() + secs);
            }
        }
    }
}

/// Converts a millisecond count to uptime seconds.
pub fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_only_on_request() {
        let mut clock = Clock::manual();
        assert_eq!(clock.now(), 0.0);
        clock.advance(1.5);
        assert_eq!(clock.now(), 1.5);
        clock.advance(-3.0);
        assert_eq!(clock.now(), 1.5);
    }

    #[test]
    fn host_clock_is_monotonic() {
        let clock = Clock::host();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
