//! Time sources injected into device models.
//!
//! Devices never read ambient process-wide clocks: they sample an injected
//! [`Clock`] so unit tests can drive time deterministically with
//! [`ManualClock`] while production wiring uses [`HostClock`].

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Host time capability for device models.
pub trait Clock {
    /// Monotonic nanoseconds since an arbitrary origin. Never decreases.
    fn now_ns(&self) -> u64;

    /// Host wall-clock time as seconds since the Unix epoch.
    ///
    /// Only sampled at one-time setup (device attach) to seed guest-visible
    /// time; steady-state time readout is derived from [`Clock::now_ns`].
    fn wall_clock_secs(&self) -> i64;
}

/// Inert clock that never advances. Useful as a default type parameter for
/// devices whose tests do not care about time.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClock;

impl Clock for NullClock {
    fn now_ns(&self) -> u64 {
        0
    }

    fn wall_clock_secs(&self) -> i64 {
        0
    }
}

/// Real host clock: monotonic time from [`Instant`], wall-clock time from
/// [`SystemTime`].
#[derive(Debug, Clone)]
pub struct HostClock {
    origin: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HostClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn wall_clock_secs(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => since.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        }
    }
}

#[derive(Debug, Default)]
struct ManualClockInner {
    now_ns: Cell<u64>,
    wall_secs: Cell<i64>,
}

/// Hand-advanced clock for tests. Clones share the same underlying time, so a
/// handle kept by the test can advance time seen by the device under test.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Rc<ManualClockInner>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ns(&self, now_ns: u64) {
        self.inner.now_ns.set(now_ns);
    }

    pub fn advance_ns(&self, delta_ns: u64) {
        let now = self.inner.now_ns.get();
        self.inner.now_ns.set(now + delta_ns);
    }

    pub fn set_wall_clock_secs(&self, secs: i64) {
        self.inner.wall_secs.set(secs);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.inner.now_ns.get()
    }

    fn wall_clock_secs(&self) -> i64 {
        self.inner.wall_secs.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let handle = clock.clone();

        handle.set_ns(5_000);
        handle.advance_ns(1_500);
        assert_eq!(clock.now_ns(), 6_500);

        handle.set_wall_clock_secs(-3);
        assert_eq!(clock.wall_clock_secs(), -3);
    }

    #[test]
    fn host_clock_is_monotonic() {
        let clock = HostClock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }
}
