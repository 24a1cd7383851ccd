//! Monotonic time source for RTT measurement (spec §4.2).
//!
//! All round-trip timings in this crate go through `MonoClock` exclusively.
//! Wall-clock (`SystemTime`) is used only for user-visible timestamps such as
//! `PingResponse::timestamp`, never for measuring an interval.

use std::time::{Duration, Instant};

/// A monotonic clock. Readings never decrease, even across NTP/system-clock
/// adjustments, because it is backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonoClock {
    epoch: Instant,
}

impl MonoClock {
    /// Create a new clock with `now()` as its epoch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// A reading from this clock, monotonic relative to other readings of
    /// the same clock instance.
    #[must_use]
    pub fn now(&self) -> MonoInstant {
        MonoInstant(Instant::now())
    }

    /// The instant this clock was created.
    #[must_use]
    pub fn epoch(&self) -> MonoInstant {
        MonoInstant(self.epoch)
    }
}

impl Default for MonoClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A single monotonic reading. Subtracting two readings yields an RTT that
/// is never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonoInstant(Instant);

impl MonoInstant {
    /// The duration elapsed between `earlier` and `self`. Saturates to zero
    /// rather than panicking if `earlier` is actually later (can happen if
    /// readings were taken from different clock instances).
    #[must_use]
    pub fn since(&self, earlier: MonoInstant) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    /// The duration elapsed since this reading was taken.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

impl std::ops::Add<Duration> for MonoInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn rtt_is_never_negative_and_advances() {
        let clock = MonoClock::new();
        let sent = clock.now();
        sleep(Duration::from_millis(5));
        let received = clock.now();
        let rtt = received.since(sent);
        assert!(rtt >= Duration::from_millis(5));
    }

    #[test]
    fn since_of_identical_reading_is_zero() {
        let clock = MonoClock::new();
        let t = clock.now();
        assert_eq!(t.since(t), Duration::ZERO);
    }

    #[test]
    fn since_saturates_when_args_reversed() {
        let clock = MonoClock::new();
        let earlier = clock.now();
        sleep(Duration::from_millis(1));
        let later = clock.now();
        // Passing the later reading as `self` and earlier as the argument is
        // the correct order; the reverse must saturate rather than panic.
        assert_eq!(earlier.since(later), Duration::ZERO);
    }
}
