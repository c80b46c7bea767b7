//! Per-user write serialization.
//!
//! `record_interaction` for one user runs under that user's async mutex, so
//! the user/assistant pair gets consecutive timestamps and WARM sees writes
//! in the order they were made. Different users never contend.

use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// State kept for a user while their lock is held.
#[derive(Debug, Default)]
pub struct UserSlot {
    last_timestamp: Option<DateTime<Utc>>,
}

impl UserSlot {
    /// Seed the watermark when nothing has been assigned in this process yet.
    pub fn seed(&mut self, newest: Option<DateTime<Utc>>) {
        if self.last_timestamp.is_none() {
            self.last_timestamp = newest;
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.last_timestamp.is_some()
    }

    /// Next turn timestamp: `now` at millisecond precision, bumped past the
    /// previous one if the clock hasn't moved or went backwards.
    pub fn next_timestamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = now
            .duration_trunc(Duration::milliseconds(1))
            .unwrap_or(now);
        let next = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(next);
        next
    }
}

/// A keyed set of async mutexes, one per user id.
#[derive(Debug, Default)]
pub struct UserLocks {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<UserSlot>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a user's slot.
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<UserSlot> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(user_id.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Forget slots nobody holds or waits on. Returns how many went.
    pub fn prune(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
