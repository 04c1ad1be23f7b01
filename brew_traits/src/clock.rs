use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Clock abstraction shared by the brew loops, the simulator and tests.
///
/// - now(): monotonic Instant used for tick timing
/// - utc_now(): wall-clock timestamp stamped onto samples and sessions
/// - sleep(): sleeps for the provided duration (implementations may simulate)
pub trait Clock {
    fn now(&self) -> Instant;
    fn utc_now(&self) -> DateTime<Utc>;
    fn sleep(&self, d: Duration);
}

/// Default, real-time clock backed by std::time::Instant and the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when advanced.
///
/// now() = origin + offset, utc_now() = utc_origin + offset.
/// sleep(d) advances internal time by d without actually sleeping, which lets
/// the accelerated simulator run an hours-long brew in a few milliseconds.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    utc_origin: DateTime<Utc>,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Start the clock at a fixed wall-clock time (useful for reproducible tests).
    pub fn starting_at(utc_origin: DateTime<Utc>) -> Self {
        Self {
            origin: Instant::now(),
            utc_origin,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    /// Total time advanced since construction.
    pub fn elapsed(&self) -> Duration {
        self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.elapsed())
            .ok()
            .and_then(|off| self.utc_origin.checked_add_signed(off))
            .unwrap_or(self.utc_origin)
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        let u0 = clock.utc_now();
        assert_eq!(clock.now(), t0);

        clock.sleep(Duration::from_millis(1500));
        assert_eq!(clock.now() - t0, Duration::from_millis(1500));
        assert_eq!((clock.utc_now() - u0).num_milliseconds(), 1500);
    }

    #[test]
    fn clones_share_time() {
        let a = ManualClock::new();
        let b = a.clone();
        a.advance(Duration::from_secs(3));
        assert_eq!(b.elapsed(), Duration::from_secs(3));
    }
}
