//! Background queue for WARM writes that could not be applied inline.
//!
//! Jobs are sharded by user id onto bounded channels, each drained by one
//! worker task, so a user's writes reach WARM in the order they were queued.
//! A failing write is retried with exponential backoff and then dropped with
//! an error log; the caller's request never waits on it.

use meshbrain_core::memory::TierStore;
use meshbrain_core::turn::TierRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, warn};

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// How hard a worker tries before dropping a job.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// The queue refused a job because the user's shard is full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFull;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Jobs queued or in flight
    pub depth: usize,
    /// Jobs written after at least one retry
    pub recovered: u64,
    /// Jobs abandoned after exhausting retries
    pub failed: u64,
    /// Jobs refused because a shard was full
    pub rejected: u64,
}

struct WriteJob {
    user_id: String,
    records: Vec<TierRecord>,
}

#[derive(Default)]
struct Pending {
    per_user: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    idle: Notify,
    recovered: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl Pending {
    fn begin(&self, user_id: &str) {
        let mut per_user = self.per_user.lock().unwrap_or_else(|e| e.into_inner());
        *per_user.entry(user_id.to_string()).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self, user_id: &str) {
        {
            let mut per_user = self.per_user.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(n) = per_user.get_mut(user_id) {
                *n -= 1;
                if *n == 0 {
                    per_user.remove(user_id);
                }
            }
        }
        self.total.fetch_sub(1, Ordering::SeqCst);
        self.idle.notify_waiters();
    }

    fn has(&self, user_id: &str) -> bool {
        self.per_user
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(user_id)
    }
}

/// Sharded, bounded queue of WARM writes with one worker per shard.
pub struct WarmWriteQueue {
    shards: Vec<mpsc::Sender<WriteJob>>,
    pending: Arc<Pending>,
}

impl WarmWriteQueue {
    /// Start the shard workers. Must be called inside a Tokio runtime.
    pub fn spawn(
        store: Arc<dyn TierStore>,
        shards: usize,
        capacity: usize,
        retry: RetryPolicy,
    ) -> Self {
        let pending = Arc::new(Pending::default());
        let senders = (0..shards.max(1))
            .map(|shard| {
                let (tx, rx) = mpsc::channel::<WriteJob>(capacity.max(1));
                tokio::spawn(run_shard(shard, rx, store.clone(), pending.clone(), retry));
                tx
            })
            .collect();

        Self {
            shards: senders,
            pending,
        }
    }

    fn shard_for(&self, user_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Queue records for a user without waiting.
    pub fn enqueue(&self, user_id: &str, records: Vec<TierRecord>) -> Result<(), QueueFull> {
        self.pending.begin(user_id);
        let job = WriteJob {
            user_id: user_id.to_string(),
            records,
        };
        match self.shards[self.shard_for(user_id)].try_send(job) {
            Ok(()) => Ok(()),
            Err(_) => {
                self.pending.finish(user_id);
                self.pending.rejected.fetch_add(1, Ordering::Relaxed);
                Err(QueueFull)
            }
        }
    }

    /// Does this user have writes queued or in flight?
    pub fn has_pending(&self, user_id: &str) -> bool {
        self.pending.has(user_id)
    }

    pub fn depth(&self) -> usize {
        self.pending.total.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.depth(),
            recovered: self.pending.recovered.load(Ordering::Relaxed),
            failed: self.pending.failed.load(Ordering::Relaxed),
            rejected: self.pending.rejected.load(Ordering::Relaxed),
        }
    }

    /// Wait until every queued job has been written or dropped.
    pub async fn drain(&self) {
        loop {
            let notified = self.pending.idle.notified();
            if self.depth() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn run_shard(
    shard: usize,
    mut rx: mpsc::Receiver<WriteJob>,
    store: Arc<dyn TierStore>,
    pending: Arc<Pending>,
    retry: RetryPolicy,
) {
    while let Some(job) = rx.recv().await {
        let mut attempt = 0;
        loop {
            match store.put_batch(job.records.clone()).await {
                Ok(()) => {
                    if attempt > 0 {
                        pending.recovered.fetch_add(1, Ordering::Relaxed);
                    }
                    debug!(shard, user_id = %job.user_id, records = job.records.len(), "Queued WARM write applied");
                    break;
                }
                Err(e) if attempt + 1 < retry.attempts => {
                    let delay = retry.delay_for(attempt);
                    warn!(
                        shard,
                        user_id = %job.user_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "WARM write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    pending.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        shard,
                        user_id = %job.user_id,
                        records = job.records.len(),
                        error = %e,
                        "Dropping WARM write after exhausting retries"
                    );
                    break;
                }
            }
        }
        pending.finish(&job.user_id);
    }
    debug!(shard, "WARM write shard stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use meshbrain_core::RangeQuery;
    use meshbrain_core::turn::{Tier, Turn};

    fn record(user: &str, text: &str, offset_ms: i64) -> TierRecord {
        let at = Utc::now() + ChronoDuration::milliseconds(offset_ms);
        TierRecord::new(Turn::user(user, text, at), Tier::Warm, at + ChronoDuration::days(7))
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn jobs_reach_the_store_in_order() {
        let store = Arc::new(InMemoryStore::warm());
        let queue = WarmWriteQueue::spawn(store.clone(), 2, 16, fast_retry(3));
        for i in 0..5 {
            queue.enqueue("u", vec![record("u", &i.to_string(), i)]).unwrap();
        }
        queue.drain().await;

        assert_eq!(queue.depth(), 0);
        assert!(!queue.has_pending("u"));
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn retries_until_store_recovers() {
        let store = Arc::new(InMemoryStore::warm());
        store.set_available(false);
        let queue = WarmWriteQueue::spawn(store.clone(), 1, 16, fast_retry(10));

        queue.enqueue("u", vec![record("u", "late", 0)]).unwrap();
        assert!(queue.has_pending("u"));

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.set_available(true);
        queue.drain().await;

        let recs = store.get_range("u", RangeQuery::all()).await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(queue.stats().recovered, 1);
        assert_eq!(queue.stats().failed, 0);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let store = Arc::new(InMemoryStore::warm());
        store.set_available(false);
        let queue = WarmWriteQueue::spawn(store.clone(), 1, 16, fast_retry(2));

        queue.enqueue("u", vec![record("u", "lost", 0)]).unwrap();
        queue.drain().await;

        assert_eq!(queue.stats().failed, 1);
        assert!(!queue.has_pending("u"));
        store.set_available(true);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn full_shard_rejects() {
        let store = Arc::new(InMemoryStore::warm());
        store.set_available(false);
        // Long backoff keeps the worker busy with the first job
        let queue = WarmWriteQueue::spawn(
            store.clone(),
            1,
            1,
            RetryPolicy {
                attempts: 2,
                base_delay: Duration::from_secs(60),
            },
        );

        queue.enqueue("u", vec![record("u", "a", 0)]).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("u", vec![record("u", "b", 1)]).unwrap();
        assert_eq!(queue.enqueue("u", vec![record("u", "c", 2)]), Err(QueueFull));
        assert_eq!(queue.stats().rejected, 1);
        assert_eq!(queue.depth(), 2);
    }

    #[test]
    fn backoff_doubles() {
        let policy = fast_retry(4);
        assert_eq!(policy.delay_for(0), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(80));
    }
}
