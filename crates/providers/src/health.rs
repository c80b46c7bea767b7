//! Per-provider rolling health counters.
//!
//! Updated by the router after every attempt. Lock-free: every field is an
//! atomic, so concurrent requests never contend. The counters are advisory
//! and never influence routing order.

use chrono::{DateTime, Utc};
use meshbrain_core::{ErrorKind, ProviderHealthSnapshot};
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

const NO_ERROR: u8 = 0;
const NO_TIMESTAMP: i64 = i64::MIN;

#[derive(Debug)]
pub struct ProviderHealth {
    consecutive_failures: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    last_error: AtomicU8,
    last_error_at_ms: AtomicI64,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            consecutive_failures: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            last_error: AtomicU8::new(NO_ERROR),
            last_error_at_ms: AtomicI64::new(NO_TIMESTAMP),
        }
    }
}

impl ProviderHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: ErrorKind, at: DateTime<Utc>) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.last_error.store(encode(kind), Ordering::Relaxed);
        self.last_error_at_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self, provider: &str) -> ProviderHealthSnapshot {
        let at_ms = self.last_error_at_ms.load(Ordering::Relaxed);
        ProviderHealthSnapshot {
            provider: provider.to_string(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            last_error: decode(self.last_error.load(Ordering::Relaxed)),
            last_error_at: (at_ms != NO_TIMESTAMP)
                .then(|| DateTime::from_timestamp_millis(at_ms))
                .flatten(),
        }
    }
}

fn encode(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Auth => 1,
        ErrorKind::RateLimit => 2,
        ErrorKind::Timeout => 3,
        ErrorKind::Network => 4,
        ErrorKind::InvalidResponse => 5,
        ErrorKind::Unknown => 6,
    }
}

fn decode(code: u8) -> Option<ErrorKind> {
    match code {
        1 => Some(ErrorKind::Auth),
        2 => Some(ErrorKind::RateLimit),
        3 => Some(ErrorKind::Timeout),
        4 => Some(ErrorKind::Network),
        5 => Some(ErrorKind::InvalidResponse),
        6 => Some(ErrorKind::Unknown),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fresh_health_is_clean() {
        let snap = ProviderHealth::new().snapshot("azure");
        assert_eq!(snap.provider, "azure");
        assert_eq!(snap.total_successes, 0);
        assert_eq!(snap.total_failures, 0);
        assert!(snap.last_error.is_none());
        assert!(snap.last_error_at.is_none());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let health = ProviderHealth::new();
        let now = Utc::now();
        health.record_failure(ErrorKind::Timeout, now);
        health.record_failure(ErrorKind::RateLimit, now);
        assert_eq!(health.snapshot("p").consecutive_failures, 2);

        health.record_success();
        let snap = health.snapshot("p");
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.total_failures, 2);
        assert_eq!(snap.total_successes, 1);
        // Last error is kept for diagnosis
        assert_eq!(snap.last_error, Some(ErrorKind::RateLimit));
        assert_eq!(
            snap.last_error_at.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }

    #[test]
    fn every_kind_roundtrips() {
        for kind in [
            ErrorKind::Auth,
            ErrorKind::RateLimit,
            ErrorKind::Timeout,
            ErrorKind::Network,
            ErrorKind::InvalidResponse,
            ErrorKind::Unknown,
        ] {
            assert_eq!(decode(encode(kind)), Some(kind));
        }
    }

    #[test]
    fn concurrent_updates_are_counted() {
        let health = Arc::new(ProviderHealth::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let health = health.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        health.record_success();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(health.snapshot("p").total_successes, 8000);
    }
}
