//! Monotonic time source abstraction.
//!
//! Injecting a [`Clock`] rather than calling `Instant::now()` directly inside
//! the dispatcher is what makes [`crate::Scheduler`] deterministically
//! testable — see [`crate::virtual_clock`].

use std::sync::OnceLock;
use std::time::Instant;

/// The scalar type used for every scheduling deadline and clock reading.
///
/// Modeled as seconds (fractional) rather than an integer tick count so that
/// callers can express sub-second delays the same way `enterabs`/`enter` do
/// in the scheduler's native idiom.
pub type Time = f64;

/// A monotonic, never-decreasing clock.
///
/// Implementations must never be affected by wall-clock adjustments (NTP
/// steps, leap seconds, user changing the system clock).
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// The default [`Clock`], backed by [`std::time::Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

impl Clock for SystemClock {
    fn now(&self) -> Time {
        epoch().elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t2 >= t1, "clock went backwards: {t1} > {t2}");
    }

    #[test]
    fn system_clock_starts_near_zero() {
        let clock = SystemClock;
        assert!(clock.now() < 1.0, "first reading should be near the epoch");
    }
}
