use std::time::{Duration, Instant};

/// Monotonic nanosecond clock shared by every worker of a run.
#[derive(Debug, Clone, Copy)]
pub struct FleetClock {
    epoch: Instant,
}

impl Default for FleetClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    #[must_use]
    pub const fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Nanoseconds since the epoch, saturating at `u64::MAX`.
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn instant_at(&self, ns: u64) -> Instant {
        self.epoch + Duration::from_nanos(ns)
    }
}

/// Whole milliseconds between two clock readings, zero if `end` precedes `start`.
#[must_use]
pub const fn elapsed_ms(start_ns: u64, end_ns: u64) -> u64 {
    end_ns.saturating_sub(start_ns) / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotonic() {
        let clock = FleetClock::new();
        let a = clock.now_ns();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now_ns();
        assert!(b > a);
        assert!(b - a >= 2_000_000);
    }

    #[test]
    fn test_instant_at() {
        let clock = FleetClock::new();
        assert_eq!(clock.instant_at(1_000), clock.epoch() + Duration::from_micros(1));
    }

    #[test]
    fn test_elapsed_ms() {
        assert_eq!(elapsed_ms(0, 1_999_999), 1);
        assert_eq!(elapsed_ms(5_000_000, 5_000_000), 0);
        assert_eq!(elapsed_ms(10, 5), 0);
    }
}
