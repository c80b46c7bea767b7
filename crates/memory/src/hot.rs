//! HOT tier: process-local ring buffer of each user's most recent turns.
//!
//! All access is synchronous behind a std `RwLock` and never awaits, so it
//! is safe to call from any context. Expired records are dropped lazily on
//! read and actively by [`HotStore::purge_expired`] during the sweep.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshbrain_core::error::MemoryError;
use meshbrain_core::memory::{RangeQuery, TierStore};
use meshbrain_core::turn::{Tier, TierRecord};
use meshbrain_core::Clock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct UserBuffer {
    /// Oldest first
    records: VecDeque<TierRecord>,
    preferences: Option<BTreeMap<String, String>>,
}

impl UserBuffer {
    fn drop_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !r.is_expired(now));
        before - self.records.len()
    }

    /// Insert keeping timestamp order; an existing key is replaced.
    fn insert(&mut self, record: TierRecord) {
        let ts = record.turn.timestamp;
        match self.records.iter().rposition(|r| r.turn.timestamp <= ts) {
            Some(i) if self.records[i].turn.timestamp == ts => self.records[i] = record,
            Some(i) => self.records.insert(i + 1, record),
            None => self.records.push_front(record),
        }
    }
}

/// The in-process cache tier.
pub struct HotStore {
    users: RwLock<HashMap<String, UserBuffer>>,
    max_turns: usize,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl HotStore {
    pub fn new(max_turns: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            max_turns: max_turns.max(1),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage (every call fails with `Unavailable`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), MemoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MemoryError::Unavailable("hot cache offline".into()))
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, UserBuffer>>, MemoryError> {
        self.check()?;
        self.users
            .read()
            .map_err(|_| MemoryError::Unavailable("hot cache lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, UserBuffer>>, MemoryError> {
        self.check()?;
        self.users
            .write()
            .map_err(|_| MemoryError::Unavailable("hot cache lock poisoned".into()))
    }

    /// Append records for one user under a single lock acquisition, so a
    /// user/assistant pair becomes visible together. The buffer is trimmed
    /// to `max_turns`, oldest first.
    pub fn append(&self, user_id: &str, records: Vec<TierRecord>) -> Result<(), MemoryError> {
        let mut users = self.write()?;
        let buffer = users.entry(user_id.to_string()).or_default();
        for record in records {
            buffer.insert(record);
        }
        while buffer.records.len() > self.max_turns {
            buffer.records.pop_front();
        }
        Ok(())
    }

    /// Unexpired records for a user, newest first.
    pub fn recent(&self, user_id: &str, query: RangeQuery) -> Result<Vec<TierRecord>, MemoryError> {
        let now = self.clock.now();
        let mut users = self.write()?;
        let Some(buffer) = users.get_mut(user_id) else {
            return Ok(Vec::new());
        };
        buffer.drop_expired(now);

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(buffer
            .records
            .iter()
            .rev()
            .filter(|r| query.range.contains(r.turn.timestamp))
            .take(limit)
            .cloned()
            .collect())
    }

    /// Timestamp of the newest unexpired record for a user.
    pub fn newest_timestamp(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, MemoryError> {
        Ok(self
            .recent(user_id, RangeQuery::latest(1))?
            .first()
            .map(|r| r.turn.timestamp))
    }

    /// Drop every expired record; users left with nothing are forgotten.
    pub fn purge_expired(&self) -> Result<usize, MemoryError> {
        let now = self.clock.now();
        let mut users = self.write()?;
        let mut purged = 0;
        for buffer in users.values_mut() {
            purged += buffer.drop_expired(now);
        }
        users.retain(|_, b| !b.records.is_empty());
        Ok(purged)
    }

    /// Cached preferences, if this user's have been loaded.
    pub fn preferences(&self, user_id: &str) -> Result<Option<BTreeMap<String, String>>, MemoryError> {
        let users = self.read()?;
        Ok(users.get(user_id).and_then(|b| b.preferences.clone()))
    }

    pub fn cache_preferences(
        &self,
        user_id: &str,
        preferences: BTreeMap<String, String>,
    ) -> Result<(), MemoryError> {
        let mut users = self.write()?;
        users.entry(user_id.to_string()).or_default().preferences = Some(preferences);
        Ok(())
    }

    /// Update one cached key. No-op when the user's preferences aren't cached.
    pub fn update_preference(&self, user_id: &str, key: &str, value: &str) -> Result<(), MemoryError> {
        let mut users = self.write()?;
        if let Some(prefs) = users.get_mut(user_id).and_then(|b| b.preferences.as_mut()) {
            prefs.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.read().is_ok()
    }

    /// Number of records held, expired or not.
    pub fn len(&self) -> usize {
        self.read()
            .map(|users| users.values().map(|b| b.records.len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TierStore for HotStore {
    fn name(&self) -> &str {
        "hot"
    }

    fn tier(&self) -> Tier {
        Tier::Hot
    }

    async fn put(&self, record: TierRecord) -> Result<(), MemoryError> {
        let user_id = record.turn.user_id.clone();
        self.append(&user_id, vec![record])
    }

    async fn put_batch(&self, records: Vec<TierRecord>) -> Result<(), MemoryError> {
        let mut by_user: HashMap<String, Vec<TierRecord>> = HashMap::new();
        for record in records {
            by_user
                .entry(record.turn.user_id.clone())
                .or_default()
                .push(record);
        }
        for (user_id, records) in by_user {
            self.append(&user_id, records)?;
        }
        Ok(())
    }

    async fn get_range(&self, user_id: &str, query: RangeQuery) -> Result<Vec<TierRecord>, MemoryError> {
        self.recent(user_id, query)
    }

    async fn delete_before(&self, user_id: &str, before: DateTime<Utc>) -> Result<usize, MemoryError> {
        let mut users = self.write()?;
        let Some(buffer) = users.get_mut(user_id) else {
            return Ok(0);
        };
        let len = buffer.records.len();
        buffer.records.retain(|r| r.turn.timestamp >= before);
        Ok(len - buffer.records.len())
    }

    async fn users(&self) -> Result<Vec<String>, MemoryError> {
        Ok(self.read()?.keys().cloned().collect())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        self.check()?;
        Ok(self.len())
    }

    async fn health_check(&self) -> bool {
        self.is_available()
    }
}
