//! Tier store traits: the storage seams of the memory manager.
//!
//! Each tier (HOT cache, WARM store, COLD archive) implements [`TierStore`].
//! TTLs are not enforced by the stores; the memory manager decides what is
//! expired and issues the deletes.

use crate::error::MemoryError;
use crate::turn::{Tier, TierRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A half-open interval `[since, until)` over turn timestamps.
///
/// Missing bounds are unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// The whole history.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self { since, until }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since.is_none_or(|s| at >= s) && self.until.is_none_or(|u| at < u)
    }
}

/// A range read against one user's records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeQuery {
    pub range: TimeRange,
    /// Maximum number of records, counted from the newest.
    pub limit: Option<usize>,
}

impl RangeQuery {
    /// Every record for the user.
    pub fn all() -> Self {
        Self::default()
    }

    /// The `limit` newest records.
    pub fn latest(limit: usize) -> Self {
        Self {
            range: TimeRange::all(),
            limit: Some(limit),
        }
    }

    /// Records with `timestamp < before`.
    pub fn before(before: DateTime<Utc>) -> Self {
        Self {
            range: TimeRange::new(None, Some(before)),
            limit: None,
        }
    }

    pub fn within(range: TimeRange) -> Self {
        Self { range, limit: None }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A storage tier holding per-user turns.
///
/// Implementations: in-process ring buffer (HOT), SQLite and in-memory
/// (WARM), JSON-lines files (COLD).
#[async_trait]
pub trait TierStore: Send + Sync {
    /// The store name (e.g., "sqlite", "jsonl").
    fn name(&self) -> &str;

    /// Which tier this store serves.
    fn tier(&self) -> Tier;

    /// Store one record. Turns are write-once: a record whose
    /// `(user_id, timestamp)` key already exists is ignored.
    async fn put(&self, record: TierRecord) -> Result<(), MemoryError>;

    /// Store several records; all-or-nothing where the backend allows it.
    async fn put_batch(&self, records: Vec<TierRecord>) -> Result<(), MemoryError>;

    /// Records for a user inside the query range, newest first.
    async fn get_range(
        &self,
        user_id: &str,
        query: RangeQuery,
    ) -> Result<Vec<TierRecord>, MemoryError>;

    /// Delete a user's records with `timestamp < before`. Returns how many went.
    async fn delete_before(&self, user_id: &str, before: DateTime<Utc>)
    -> Result<usize, MemoryError>;

    /// Every user with at least one record.
    async fn users(&self) -> Result<Vec<String>, MemoryError>;

    /// Total number of records held.
    async fn count(&self) -> Result<usize, MemoryError>;

    /// Can the store serve requests right now?
    async fn health_check(&self) -> bool;
}

/// Durable per-user key/value preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_preferences(&self, user_id: &str)
    -> Result<BTreeMap<String, String>, MemoryError>;

    async fn set_preference(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn range_is_half_open() {
        let now = Utc::now();
        let range = TimeRange::new(Some(now), Some(now + Duration::hours(1)));
        assert!(range.contains(now));
        assert!(range.contains(now + Duration::minutes(59)));
        assert!(!range.contains(now + Duration::hours(1)));
        assert!(!range.contains(now - Duration::seconds(1)));
    }

    #[test]
    fn unbounded_range_contains_everything() {
        let range = TimeRange::all();
        assert!(range.contains(DateTime::UNIX_EPOCH));
        assert!(range.contains(Utc::now()));
    }

    #[test]
    fn query_builders() {
        let q = RangeQuery::latest(5);
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.range, TimeRange::all());

        let cutoff = Utc::now();
        let q = RangeQuery::before(cutoff).with_limit(10);
        assert_eq!(q.range.until, Some(cutoff));
        assert_eq!(q.limit, Some(10));
    }

    #[test]
    fn time_range_deserializes_partial() {
        let range: TimeRange =
            serde_json::from_str(r#"{"since":"2024-01-01T00:00:00Z"}"#).unwrap();
        assert!(range.since.is_some());
        assert!(range.until.is_none());
    }
}
