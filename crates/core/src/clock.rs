//! Time source abstraction.
//!
//! Every TTL decision in the memory tiers reads time through a [`Clock`], so
//! tests can drive expiry deterministically with [`ManualClock`].

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A source of wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and hand
/// another to the memory manager.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current_ms: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at the given instant.
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            current_ms: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    /// Create a clock frozen at the current system time.
    pub fn starting_now() -> Self {
        Self::at(Utc::now())
    }

    /// Move time forward. Negative durations are ignored.
    pub fn advance(&self, by: Duration) {
        let delta = by.num_milliseconds();
        if delta > 0 {
            self.current_ms.fetch_add(delta, Ordering::SeqCst);
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_now()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.current_ms.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_frozen_until_advanced() {
        let start = Utc::now();
        let clock = ManualClock::at(start);
        assert_eq!(clock.now().timestamp_millis(), start.timestamp_millis());

        clock.advance(Duration::minutes(31));
        assert_eq!(
            clock.now().timestamp_millis(),
            (start + Duration::minutes(31)).timestamp_millis()
        );
    }

    #[test]
    fn clones_share_time() {
        let clock = ManualClock::starting_now();
        let other = clock.clone();
        let before = other.now();
        clock.advance_secs(60);
        assert_eq!(other.now() - before, Duration::seconds(60));
    }

    #[test]
    fn time_never_goes_backwards() {
        let clock = ManualClock::starting_now();
        let before = clock.now();
        clock.advance(Duration::seconds(-10));
        assert_eq!(clock.now(), before);
    }

    #[test]
    fn system_clock_moves() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}
