//! In-memory tier store: useful for testing and ephemeral deployments.
//!
//! Serves as WARM (no persistence configured) or COLD in tests. Can be
//! switched offline with [`InMemoryStore::set_available`] to exercise the
//! degraded paths of the memory manager.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshbrain_core::error::MemoryError;
use meshbrain_core::memory::{PreferenceStore, RangeQuery, TierStore};
use meshbrain_core::turn::{Tier, TierRecord};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

type UserRecords = BTreeMap<DateTime<Utc>, TierRecord>;

/// A tier store that keeps every record in process memory.
pub struct InMemoryStore {
    tier: Tier,
    records: Arc<RwLock<HashMap<String, UserRecords>>>,
    preferences: Arc<RwLock<HashMap<String, BTreeMap<String, String>>>>,
    available: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            records: Arc::new(RwLock::new(HashMap::new())),
            preferences: Arc::new(RwLock::new(HashMap::new())),
            available: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn warm() -> Self {
        Self::new(Tier::Warm)
    }

    pub fn cold() -> Self {
        Self::new(Tier::Cold)
    }

    /// Take the store offline (every call fails) or bring it back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful write calls, for asserting on write traffic.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), MemoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MemoryError::Unavailable(format!("{} store offline", self.tier)))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::warm()
    }
}

#[async_trait]
impl TierStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    async fn put(&self, record: TierRecord) -> Result<(), MemoryError> {
        self.put_batch(vec![record]).await
    }

    async fn put_batch(&self, records: Vec<TierRecord>) -> Result<(), MemoryError> {
        self.check()?;
        let mut all = self.records.write().await;
        for mut record in records {
            record.tier = self.tier;
            all.entry(record.turn.user_id.clone())
                .or_default()
                .entry(record.turn.timestamp)
                .or_insert(record);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_range(&self, user_id: &str, query: RangeQuery) -> Result<Vec<TierRecord>, MemoryError> {
        self.check()?;
        let all = self.records.read().await;
        let Some(records) = all.get(user_id) else {
            return Ok(Vec::new());
        };
        Ok(records
            .values()
            .rev()
            .filter(|r| query.range.contains(r.turn.timestamp))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn delete_before(&self, user_id: &str, before: DateTime<Utc>) -> Result<usize, MemoryError> {
        self.check()?;
        let mut all = self.records.write().await;
        let Some(records) = all.get_mut(user_id) else {
            return Ok(0);
        };
        let kept = records.split_off(&before);
        let removed = records.len();
        *records = kept;
        if records.is_empty() {
            all.remove(user_id);
        }
        Ok(removed)
    }

    async fn users(&self) -> Result<Vec<String>, MemoryError> {
        self.check()?;
        Ok(self.records.read().await.keys().cloned().collect())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        self.check()?;
        Ok(self.records.read().await.values().map(BTreeMap::len).sum())
    }

    async fn health_check(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PreferenceStore for InMemoryStore {
    async fn get_preferences(&self, user_id: &str) -> Result<BTreeMap<String, String>, MemoryError> {
        self.check()?;
        Ok(self
            .preferences
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_preference(&self, user_id: &str, key: &str, value: &str) -> Result<(), MemoryError> {
        self.check()?;
        self.preferences
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use meshbrain_core::{TimeRange, Turn};

    fn record(user: &str, text: &str, at: DateTime<Utc>) -> TierRecord {
        TierRecord::new(Turn::user(user, text, at), Tier::Warm, at + Duration::days(7))
    }

    #[tokio::test]
    async fn store_and_read_newest_first() {
        let store = InMemoryStore::warm();
        let t0 = Utc::now();
        store
            .put_batch(vec![
                record("u", "a", t0),
                record("u", "b", t0 + Duration::seconds(1)),
                record("v", "c", t0),
            ])
            .await
            .unwrap();

        let recs = store.get_range("u", RangeQuery::all()).await.unwrap();
        let texts: Vec<&str> = recs.iter().map(|r| r.turn.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "a"]);
        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn range_is_half_open() {
        let store = InMemoryStore::warm();
        let t0 = Utc::now();
        for i in 0..4 {
            store.put(record("u", &i.to_string(), t0 + Duration::seconds(i))).await.unwrap();
        }
        let range = TimeRange::new(Some(t0 + Duration::seconds(1)), Some(t0 + Duration::seconds(3)));
        let recs = store.get_range("u", RangeQuery::within(range)).await.unwrap();
        let texts: Vec<&str> = recs.iter().map(|r| r.turn.text.as_str()).collect();
        assert_eq!(texts, vec!["2", "1"]);

        let latest = store.get_range("u", RangeQuery::latest(1)).await.unwrap();
        assert_eq!(latest[0].turn.text, "3");
    }

    #[tokio::test]
    async fn put_relabels_tier() {
        let cold = InMemoryStore::cold();
        let t0 = Utc::now();
        cold.put(record("u", "x", t0)).await.unwrap();
        let recs = cold.get_range("u", RangeQuery::all()).await.unwrap();
        assert_eq!(recs[0].tier, Tier::Cold);
    }

    #[tokio::test]
    async fn existing_turn_is_not_overwritten() {
        let warm = InMemoryStore::warm();
        let t0 = Utc::now();
        warm.put(record("u", "original", t0)).await.unwrap();
        warm.put(record("u", "rewrite", t0)).await.unwrap();
        let recs = warm.get_range("u", RangeQuery::all()).await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].turn.text, "original");
    }

    #[tokio::test]
    async fn delete_before_removes_older() {
        let store = InMemoryStore::warm();
        let t0 = Utc::now();
        for i in 0..3 {
            store.put(record("u", "x", t0 + Duration::seconds(i))).await.unwrap();
        }
        let removed = store.delete_before("u", t0 + Duration::seconds(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 2);

        store.delete_before("u", t0 + Duration::seconds(10)).await.unwrap();
        assert!(store.users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn preferences_roundtrip() {
        let store = InMemoryStore::warm();
        assert!(store.get_preferences("u").await.unwrap().is_empty());
        store.set_preference("u", "lang", "pt").await.unwrap();
        store.set_preference("u", "lang", "en").await.unwrap();
        let prefs = store.get_preferences("u").await.unwrap();
        assert_eq!(prefs.get("lang").map(String::as_str), Some("en"));
    }

    #[tokio::test]
    async fn offline_store_fails() {
        let store = InMemoryStore::warm();
        store.set_available(false);
        assert!(!store.health_check().await);
        assert!(matches!(
            store.put(record("u", "x", Utc::now())).await,
            Err(MemoryError::Unavailable(_))
        ));
        assert!(store.get_preferences("u").await.is_err());

        store.set_available(true);
        assert!(store.health_check().await);
        assert_eq!(store.write_count(), 0);
    }
}
