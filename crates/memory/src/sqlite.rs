//! SQLite WARM store.
//!
//! A single database file with two tables:
//! - `turns`: one row per turn, keyed by `(user_id, ts_ms)`
//! - `preferences`: per-user key/value pairs
//!
//! Timestamps are stored as integer milliseconds since the epoch, so turn
//! keys must carry millisecond precision (the memory manager assigns them
//! that way).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshbrain_core::error::MemoryError;
use meshbrain_core::memory::{PreferenceStore, RangeQuery, TierStore};
use meshbrain_core::turn::{Role, Tier, TierRecord, Turn, TurnMetadata};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info};

/// The durable WARM tier backed by SQLite.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database; it is held on a
    /// single connection so every query sees the same data.
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite warm store initialized at {path}");
        Ok(store)
    }

    /// Open a database file, creating parent directories first.
    pub async fn open(path: &std::path::Path) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MemoryError::Storage(format!("Failed to create {}: {e}", parent.display())))?;
        }
        Self::new(&format!("sqlite://{}", path.display())).await
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                user_id     TEXT NOT NULL,
                ts_ms       INTEGER NOT NULL,
                role        TEXT NOT NULL,
                text        TEXT NOT NULL,
                metadata    TEXT NOT NULL DEFAULT '{}',
                expires_ms  INTEGER NOT NULL,
                PRIMARY KEY (user_id, ts_ms)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("turns table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                user_id     TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (user_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("preferences table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_ts ON turns(ts_ms)")
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::MigrationFailed(format!("ts index: {e}")))?;

        debug!("SQLite warm store migrations complete");
        Ok(())
    }

    fn row_to_record(row: &SqliteRow) -> Result<TierRecord, MemoryError> {
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| MemoryError::QueryFailed(format!("user_id column: {e}")))?;
        let ts_ms: i64 = row
            .try_get("ts_ms")
            .map_err(|e| MemoryError::QueryFailed(format!("ts_ms column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| MemoryError::QueryFailed(format!("role column: {e}")))?;
        let text: String = row
            .try_get("text")
            .map_err(|e| MemoryError::QueryFailed(format!("text column: {e}")))?;
        let metadata: String = row.try_get("metadata").unwrap_or_else(|_| "{}".into());
        let expires_ms: i64 = row
            .try_get("expires_ms")
            .map_err(|e| MemoryError::QueryFailed(format!("expires_ms column: {e}")))?;

        let role = Role::parse(&role)
            .ok_or_else(|| MemoryError::Serialization(format!("Unknown role '{role}'")))?;
        let metadata: TurnMetadata = serde_json::from_str(&metadata).unwrap_or_default();

        Ok(TierRecord {
            turn: Turn {
                user_id,
                role,
                text,
                timestamp: from_millis(ts_ms)?,
                metadata,
            },
            tier: Tier::Warm,
            expires_at: from_millis(expires_ms)?,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| MemoryError::Serialization(format!("Timestamp out of range: {ms}")))
}

/// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.and_then(|l| i64::try_from(l).ok()).unwrap_or(-1)
}

#[async_trait]
impl TierStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn tier(&self) -> Tier {
        Tier::Warm
    }

    async fn put(&self, record: TierRecord) -> Result<(), MemoryError> {
        self.put_batch(vec![record]).await
    }

    async fn put_batch(&self, records: Vec<TierRecord>) -> Result<(), MemoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Unavailable(format!("BEGIN failed: {e}")))?;

        for record in &records {
            let metadata = serde_json::to_string(&record.turn.metadata)
                .map_err(|e| MemoryError::Serialization(format!("Metadata serialization: {e}")))?;

            sqlx::query(
                r#"
                INSERT INTO turns (user_id, ts_ms, role, text, metadata, expires_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(user_id, ts_ms) DO NOTHING
                "#,
            )
            .bind(&record.turn.user_id)
            .bind(record.turn.timestamp.timestamp_millis())
            .bind(record.turn.role.as_str())
            .bind(&record.turn.text)
            .bind(&metadata)
            .bind(record.expires_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .map_err(|e| MemoryError::Storage(format!("INSERT failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("COMMIT failed: {e}")))?;

        debug!(count = records.len(), "Stored warm records");
        Ok(())
    }

    async fn get_range(&self, user_id: &str, query: RangeQuery) -> Result<Vec<TierRecord>, MemoryError> {
        let since = query.range.since.map_or(i64::MIN, |t| t.timestamp_millis());
        let until = query.range.until.map_or(i64::MAX, |t| t.timestamp_millis());

        let rows = sqlx::query(
            r#"
            SELECT user_id, ts_ms, role, text, metadata, expires_ms
            FROM turns
            WHERE user_id = ?1 AND ts_ms >= ?2 AND ts_ms < ?3
            ORDER BY ts_ms DESC
            LIMIT ?4
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(until)
        .bind(sql_limit(query.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Range query failed: {e}")))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn delete_before(&self, user_id: &str, before: DateTime<Utc>) -> Result<usize, MemoryError> {
        let result = sqlx::query("DELETE FROM turns WHERE user_id = ?1 AND ts_ms < ?2")
            .bind(user_id)
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("DELETE failed: {e}")))?;

        Ok(result.rows_affected() as usize)
    }

    async fn users(&self) -> Result<Vec<String>, MemoryError> {
        let rows = sqlx::query("SELECT DISTINCT user_id FROM turns")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Users query failed: {e}")))?;

        rows.iter()
            .map(|r| {
                r.try_get("user_id")
                    .map_err(|e| MemoryError::QueryFailed(format!("user_id column: {e}")))
            })
            .collect()
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM turns")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("COUNT: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| MemoryError::QueryFailed(format!("cnt column: {e}")))?;

        Ok(cnt as usize)
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[async_trait]
impl PreferenceStore for SqliteStore {
    async fn get_preferences(&self, user_id: &str) -> Result<BTreeMap<String, String>, MemoryError> {
        let rows = sqlx::query("SELECT key, value FROM preferences WHERE user_id = ?1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Preferences query failed: {e}")))?;

        let mut prefs = BTreeMap::new();
        for row in &rows {
            let key: String = row
                .try_get("key")
                .map_err(|e| MemoryError::QueryFailed(format!("key column: {e}")))?;
            let value: String = row
                .try_get("value")
                .map_err(|e| MemoryError::QueryFailed(format!("value column: {e}")))?;
            prefs.insert(key, value);
        }
        Ok(prefs)
    }

    async fn set_preference(&self, user_id: &str, key: &str, value: &str) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            INSERT INTO preferences (user_id, key, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Preference upsert failed: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use meshbrain_core::TimeRange;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn record(user: &str, text: &str, at: DateTime<Utc>) -> TierRecord {
        let mut turn = Turn::user(user, text, at);
        turn.metadata.channel = Some("http".into());
        TierRecord::new(turn, Tier::Warm, at + Duration::days(7))
    }

    #[tokio::test]
    async fn store_and_read_back() {
        let store = test_store().await;
        let mut reply = Turn::assistant("alice", "Hi!", t0() + Duration::milliseconds(1));
        reply.metadata.provider = Some("azure".into());
        reply.metadata.latency_ms = Some(42);
        store
            .put_batch(vec![
                record("alice", "Hello", t0()),
                TierRecord::new(reply.clone(), Tier::Warm, t0() + Duration::days(7)),
            ])
            .await
            .unwrap();

        let recs = store.get_range("alice", RangeQuery::all()).await.unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].turn, reply);
        assert_eq!(recs[1].turn.text, "Hello");
        assert_eq!(recs[1].turn.metadata.channel.as_deref(), Some("http"));
        assert_eq!(recs[1].expires_at, t0() + Duration::days(7));
    }

    #[tokio::test]
    async fn stored_turns_are_write_once() {
        let store = test_store().await;
        store.put(record("u", "first", t0())).await.unwrap();
        store.put(record("u", "second", t0())).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let recs = store.get_range("u", RangeQuery::all()).await.unwrap();
        assert_eq!(recs[0].turn.text, "first");
    }

    #[tokio::test]
    async fn range_and_limit() {
        let store = test_store().await;
        for i in 0..5 {
            store
                .put(record("u", &i.to_string(), t0() + Duration::seconds(i)))
                .await
                .unwrap();
        }

        let latest = store.get_range("u", RangeQuery::latest(2)).await.unwrap();
        let texts: Vec<&str> = latest.iter().map(|r| r.turn.text.as_str()).collect();
        assert_eq!(texts, vec!["4", "3"]);

        let range = TimeRange::new(Some(t0() + Duration::seconds(1)), Some(t0() + Duration::seconds(3)));
        let within = store.get_range("u", RangeQuery::within(range)).await.unwrap();
        let texts: Vec<&str> = within.iter().map(|r| r.turn.text.as_str()).collect();
        assert_eq!(texts, vec!["2", "1"]);

        assert!(store.get_range("nobody", RangeQuery::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_before_and_users() {
        let store = test_store().await;
        store.put(record("a", "old", t0())).await.unwrap();
        store.put(record("a", "new", t0() + Duration::days(1))).await.unwrap();
        store.put(record("b", "x", t0())).await.unwrap();

        let mut users = store.users().await.unwrap();
        users.sort();
        assert_eq!(users, vec!["a", "b"]);

        let removed = store.delete_before("a", t0() + Duration::hours(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn preferences_upsert() {
        let store = test_store().await;
        assert!(store.get_preferences("u").await.unwrap().is_empty());
        store.set_preference("u", "lang", "pt").await.unwrap();
        store.set_preference("u", "tone", "casual").await.unwrap();
        store.set_preference("u", "lang", "en").await.unwrap();

        let prefs = store.get_preferences("u").await.unwrap();
        assert_eq!(prefs.len(), 2);
        assert_eq!(prefs["lang"], "en");
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.put(record("u", "durable", t0())).await.unwrap();
            store.set_preference("u", "lang", "pt").await.unwrap();
            assert!(store.health_check().await);
        }

        let store = SqliteStore::open(&path).await.unwrap();
        let recs = store.get_range("u", RangeQuery::all()).await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].turn.text, "durable");
        assert_eq!(store.get_preferences("u").await.unwrap()["lang"], "pt");
    }

    #[test]
    fn limit_mapping() {
        assert_eq!(sql_limit(None), -1);
        assert_eq!(sql_limit(Some(50)), 50);
    }
}
