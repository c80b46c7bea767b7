//! The memory manager: single point of read/write for conversational memory.
//!
//! Hides the tier topology from callers:
//! - `get_context` reads HOT, tops up from WARM, never touches COLD
//! - `record_interaction` writes HOT then WARM (inline, or via the write queue)
//! - `sweep_expired` purges HOT, migrates WARM → COLD, expires COLD
//! - `export_history` is the only read path into COLD

use crate::archive::JsonlArchive;
use crate::context::{assemble, tokens_of};
use crate::hot::HotStore;
use crate::in_memory::InMemoryStore;
use crate::locks::UserLocks;
use crate::sqlite::SqliteStore;
use crate::write_queue::{QueueStats, RetryPolicy, WarmWriteQueue};
use chrono::{DateTime, Duration, Utc};
use meshbrain_config::{MemoryConfig, WarmBackend};
use meshbrain_core::error::MemoryError;
use meshbrain_core::memory::{PreferenceStore, RangeQuery, TierStore, TimeRange};
use meshbrain_core::turn::{Tier, TierRecord, Turn, TurnMetadata, UserContext};
use meshbrain_core::{Clock, SystemClock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A store that can serve as the WARM tier: turns plus preferences.
pub trait WarmStore: TierStore + PreferenceStore {}

impl<T: TierStore + PreferenceStore> WarmStore for T {}

/// Retention settings, resolved from [`MemoryConfig`].
#[derive(Debug, Clone, Copy)]
pub struct TierPolicy {
    pub hot_ttl: Duration,
    pub warm_ttl: Duration,
    /// Counted from the moment a turn leaves WARM
    pub cold_ttl: Duration,
    pub hot_max_turns: usize,
    pub warm_fetch_limit: usize,
}

impl TierPolicy {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            hot_ttl: secs(config.hot_ttl_secs),
            warm_ttl: secs(config.warm_ttl_secs),
            cold_ttl: secs(config.cold_ttl_secs),
            hot_max_turns: config.hot_max_turns,
            warm_fetch_limit: config.warm_fetch_limit,
        }
    }

    /// WARM turns to read for a context of `token_budget` tokens: the
    /// configured limit, raised to the most turns the budget could hold.
    pub fn warm_fetch_for(&self, token_budget: usize) -> usize {
        self.warm_fetch_limit
            .max(token_budget / Turn::OVERHEAD_TOKENS)
    }

    fn cold_expiry(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at + self.warm_ttl + self.cold_ttl
    }
}

/// TTLs beyond a century are treated as a century.
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

fn secs(s: u64) -> Duration {
    Duration::seconds(s.min(MAX_TTL_SECS) as i64)
}

/// Where the WARM copy of a recorded pair ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmWrite {
    /// Written inline
    Written,
    /// Handed to the background queue
    Queued,
    /// Queue full; the pair lives in HOT only
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordReceipt {
    pub user_turn_at: DateTime<Utc>,
    pub assistant_turn_at: DateTime<Utc>,
    pub hot: bool,
    pub warm: WarmWrite,
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub hot_expired: usize,
    /// WARM turns copied to COLD and deleted from WARM
    pub migrated: usize,
    pub cold_deleted: usize,
    /// Tier operations that failed; their work is retried next sweep
    pub failures: usize,
}

/// Per-tier availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierHealth {
    pub hot: bool,
    pub warm: bool,
    pub cold: bool,
    pub warm_queue_depth: usize,
}

impl TierHealth {
    pub fn all_available(&self) -> bool {
        self.hot && self.warm && self.cold
    }

    pub fn status(&self) -> &'static str {
        if self.all_available() { "healthy" } else { "degraded" }
    }
}

/// Storage statistics. Counts are `None` when the tier could not answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub status: &'static str,
    pub tiers: TierHealth,
    pub hot_turns: usize,
    pub warm_turns: Option<usize>,
    pub cold_turns: Option<usize>,
    pub warm_store: String,
    pub cold_store: String,
    pub queue: QueueStats,
}

pub struct MemoryManager {
    hot: HotStore,
    warm: Arc<dyn WarmStore>,
    cold: Arc<dyn TierStore>,
    queue: WarmWriteQueue,
    locks: UserLocks,
    clock: Arc<dyn Clock>,
    policy: TierPolicy,
}

impl MemoryManager {
    /// Wire the tiers together. Spawns the WARM write queue workers, so it
    /// must be called inside a Tokio runtime.
    pub fn new(
        warm: Arc<dyn WarmStore>,
        cold: Arc<dyn TierStore>,
        config: &MemoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = TierPolicy::from_config(config);
        let queue = WarmWriteQueue::spawn(
            warm.clone(),
            config.write_queue_shards,
            config.write_queue_capacity,
            RetryPolicy {
                attempts: config.write_retry_attempts.max(1),
                ..RetryPolicy::default()
            },
        );

        Self {
            hot: HotStore::new(policy.hot_max_turns, clock.clone()),
            warm,
            cold,
            queue,
            locks: UserLocks::new(),
            clock,
            policy,
        }
    }

    /// Open the configured WARM backend and COLD archive.
    pub async fn from_config(config: &MemoryConfig) -> Result<Self, MemoryError> {
        let warm: Arc<dyn WarmStore> = match config.warm_backend {
            WarmBackend::Sqlite => Arc::new(SqliteStore::open(&config.sqlite_path).await?),
            WarmBackend::InMemory => Arc::new(InMemoryStore::warm()),
        };
        let cold = Arc::new(JsonlArchive::new(config.cold_dir.clone()));
        info!(
            warm = warm.name(),
            cold = %config.cold_dir.display(),
            "Memory manager initialized"
        );
        Ok(Self::new(warm, cold, config, Arc::new(SystemClock)))
    }

    /// The HOT tier, for fault injection in tests and diagnostics.
    pub fn hot(&self) -> &HotStore {
        &self.hot
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    /// Assemble a user's context: newest turns within `token_budget`,
    /// returned oldest first. Pass `usize::MAX` for an unbounded read.
    ///
    /// Never fails: a HOT outage yields an empty context and a WARM outage
    /// a HOT-only one.
    pub async fn get_context(&self, user_id: &str, token_budget: usize) -> UserContext {
        let hot = match self.hot.recent(user_id, RangeQuery::all()) {
            Ok(records) => records,
            Err(e) => {
                warn!(user_id, error = %e, "HOT unavailable, continuing without history");
                return UserContext::empty(user_id);
            }
        };

        let mut warm = Vec::new();
        if tokens_of(&hot) < token_budget {
            let query = if token_budget == usize::MAX {
                RangeQuery::all()
            } else {
                RangeQuery::latest(self.policy.warm_fetch_for(token_budget))
            };
            match self.warm.get_range(user_id, query).await {
                Ok(records) => warm = records,
                Err(e) => warn!(user_id, error = %e, "WARM read failed, using HOT-only context"),
            }
        }

        let hot_count = hot.len();
        let warm_count = warm.len();
        let turns = assemble(hot, warm, token_budget);
        debug!(user_id, hot_count, warm_count, selected = turns.len(), "Context assembled");

        UserContext {
            user_id: user_id.to_string(),
            turns,
            preferences: self.preferences(user_id).await,
        }
    }

    /// Persist a user/assistant exchange.
    ///
    /// Both turns land in HOT together before this returns. WARM is written
    /// inline unless it fails or the user already has queued writes, in which
    /// case the pair is queued behind them. Errors only when the pair could
    /// be stored nowhere.
    pub async fn record_interaction(
        &self,
        user_id: &str,
        user_text: &str,
        assistant_text: &str,
        metadata: TurnMetadata,
    ) -> Result<RecordReceipt, MemoryError> {
        let mut slot = self.locks.lock(user_id).await;
        if !slot.is_seeded() {
            slot.seed(self.hot.newest_timestamp(user_id).ok().flatten());
        }
        let now = self.clock.now();
        let user_at = slot.next_timestamp(now);
        let assistant_at = slot.next_timestamp(now);

        let mut user_turn = Turn::user(user_id, user_text, user_at);
        user_turn.metadata.channel = metadata.channel.clone();
        let mut assistant_turn = Turn::assistant(user_id, assistant_text, assistant_at);
        assistant_turn.metadata = metadata;
        let turns = [user_turn, assistant_turn];

        let hot_records = turns
            .iter()
            .map(|t| TierRecord::new(t.clone(), Tier::Hot, t.timestamp + self.policy.hot_ttl))
            .collect();
        let hot_result = self.hot.append(user_id, hot_records);
        if let Err(e) = &hot_result {
            warn!(user_id, error = %e, "HOT write failed");
        }

        let warm_records = turns
            .into_iter()
            .map(|t| {
                let expires_at = t.timestamp + self.policy.warm_ttl;
                TierRecord::new(t, Tier::Warm, expires_at)
            })
            .collect();
        let warm = self.write_warm(user_id, warm_records).await;
        drop(slot);

        match hot_result {
            Err(e) if warm == WarmWrite::Dropped => Err(e),
            hot_result => Ok(RecordReceipt {
                user_turn_at: user_at,
                assistant_turn_at: assistant_at,
                hot: hot_result.is_ok(),
                warm,
            }),
        }
    }

    async fn write_warm(&self, user_id: &str, records: Vec<TierRecord>) -> WarmWrite {
        if self.queue.has_pending(user_id) {
            return self.enqueue(user_id, records);
        }
        match self.warm.put_batch(records.clone()).await {
            Ok(()) => WarmWrite::Written,
            Err(e) => {
                warn!(user_id, error = %e, "WARM write failed, queueing for retry");
                self.enqueue(user_id, records)
            }
        }
    }

    fn enqueue(&self, user_id: &str, records: Vec<TierRecord>) -> WarmWrite {
        match self.queue.enqueue(user_id, records) {
            Ok(()) => WarmWrite::Queued,
            Err(_) => {
                error!(user_id, "WARM write queue full, turns kept in HOT only");
                WarmWrite::Dropped
            }
        }
    }

    /// Wait for queued WARM writes to finish (or be dropped).
    pub async fn flush_writes(&self) {
        self.queue.drain().await;
    }

    /// A user's preferences: HOT cache first, then WARM (refilling the cache).
    /// An unavailable WARM yields an empty map.
    pub async fn preferences(&self, user_id: &str) -> BTreeMap<String, String> {
        match self.hot.preferences(user_id) {
            Ok(Some(prefs)) => return prefs,
            Ok(None) => {}
            Err(e) => debug!(user_id, error = %e, "HOT preference cache unavailable"),
        }

        // Refill under the user's lock so a concurrent set_preference can't
        // land between the WARM read and the cache fill.
        let _slot = self.locks.lock(user_id).await;
        if let Ok(Some(prefs)) = self.hot.preferences(user_id) {
            return prefs;
        }
        match self.warm.get_preferences(user_id).await {
            Ok(prefs) => {
                let _ = self.hot.cache_preferences(user_id, prefs.clone());
                prefs
            }
            Err(e) => {
                warn!(user_id, error = %e, "Preference read failed");
                BTreeMap::new()
            }
        }
    }

    /// Set one preference: WARM first, then the HOT cache.
    pub async fn set_preference(&self, user_id: &str, key: &str, value: &str) -> Result<(), MemoryError> {
        let _slot = self.locks.lock(user_id).await;
        self.warm.set_preference(user_id, key, value).await?;
        if let Err(e) = self.hot.update_preference(user_id, key, value) {
            debug!(user_id, error = %e, "HOT preference cache not updated");
        }
        Ok(())
    }

    /// Expire HOT, migrate aged WARM turns to COLD, delete aged COLD turns.
    pub async fn sweep_expired(&self) -> SweepReport {
        let started = std::time::Instant::now();
        let mut report = SweepReport::default();

        match self.hot.purge_expired() {
            Ok(n) => report.hot_expired = n,
            Err(e) => {
                report.failures += 1;
                warn!(error = %e, "HOT purge failed");
            }
        }

        let now = self.clock.now();
        self.migrate_warm(now - self.policy.warm_ttl, &mut report).await;
        self.expire_cold(now - self.policy.warm_ttl - self.policy.cold_ttl, &mut report)
            .await;
        self.locks.prune();

        info!(
            hot_expired = report.hot_expired,
            migrated = report.migrated,
            cold_deleted = report.cold_deleted,
            failures = report.failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Memory sweep complete"
        );
        report
    }

    async fn migrate_warm(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) {
        let users = match self.warm.users().await {
            Ok(users) => users,
            Err(e) => {
                report.failures += 1;
                warn!(error = %e, "WARM unavailable, skipping migration");
                return;
            }
        };

        for user_id in users {
            let aged = match self.warm.get_range(&user_id, RangeQuery::before(cutoff)).await {
                Ok(records) => records,
                Err(e) => {
                    report.failures += 1;
                    warn!(user_id, error = %e, "WARM range read failed");
                    continue;
                }
            };
            // Newest first, so this bounds exactly the batch being moved
            let Some(newest) = aged.first().map(|r| r.turn.timestamp) else {
                continue;
            };

            let cold_records: Vec<TierRecord> = aged
                .into_iter()
                .map(|mut r| {
                    r.tier = Tier::Cold;
                    r.expires_at = self.policy.cold_expiry(r.turn.timestamp);
                    r
                })
                .collect();
            let count = cold_records.len();

            if let Err(e) = self.cold.put_batch(cold_records).await {
                report.failures += 1;
                warn!(user_id, error = %e, "COLD write failed, WARM copy kept for next sweep");
                continue;
            }

            match self
                .warm
                .delete_before(&user_id, newest + Duration::milliseconds(1))
                .await
            {
                Ok(_) => report.migrated += count,
                Err(e) => {
                    report.failures += 1;
                    warn!(user_id, error = %e, "WARM delete failed after archiving, will re-archive");
                }
            }
        }
    }

    async fn expire_cold(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) {
        let users = match self.cold.users().await {
            Ok(users) => users,
            Err(e) => {
                report.failures += 1;
                warn!(error = %e, "COLD unavailable, skipping expiry");
                return;
            }
        };

        for user_id in users {
            match self.cold.delete_before(&user_id, cutoff).await {
                Ok(n) => report.cold_deleted += n,
                Err(e) => {
                    report.failures += 1;
                    warn!(user_id, error = %e, "COLD expiry failed");
                }
            }
        }
    }

    /// Run `sweep_expired` every `interval` until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep_expired().await;
            }
        })
    }

    /// A user's history from WARM and COLD, deduplicated, oldest first.
    ///
    /// One unavailable tier is tolerated; both failing is an error.
    pub async fn export_history(&self, user_id: &str, range: TimeRange) -> Result<Vec<Turn>, MemoryError> {
        let query = RangeQuery::within(range);
        let warm = self.warm.get_range(user_id, query).await;
        let cold = self.cold.get_range(user_id, query).await;

        let (warm, cold) = match (warm, cold) {
            (Err(e), Err(cold_err)) => {
                warn!(user_id, error = %cold_err, "COLD read failed during export");
                return Err(e);
            }
            (warm, cold) => (
                warm.unwrap_or_else(|e| {
                    warn!(user_id, error = %e, "WARM read failed during export");
                    Vec::new()
                }),
                cold.unwrap_or_else(|e| {
                    warn!(user_id, error = %e, "COLD read failed during export");
                    Vec::new()
                }),
            ),
        };

        let mut merged: BTreeMap<DateTime<Utc>, Turn> = BTreeMap::new();
        for record in cold.into_iter().chain(warm) {
            merged.insert(record.turn.timestamp, record.turn);
        }
        Ok(merged.into_values().collect())
    }

    pub async fn tier_health(&self) -> TierHealth {
        TierHealth {
            hot: self.hot.is_available(),
            warm: self.warm.health_check().await,
            cold: self.cold.health_check().await,
            warm_queue_depth: self.queue.depth(),
        }
    }

    pub async fn stats(&self) -> MemoryStats {
        let tiers = self.tier_health().await;
        MemoryStats {
            status: tiers.status(),
            tiers,
            hot_turns: self.hot.len(),
            warm_turns: self.warm.count().await.ok(),
            cold_turns: self.cold.count().await.ok(),
            warm_store: self.warm.name().to_string(),
            cold_store: self.cold.name().to_string(),
            queue: self.queue.stats(),
        }
    }
}
