//! COLD archive: append-only JSON-lines files, one per user per day.
//!
//! Layout: `<root>/<encoded user id>/<YYYY-MM-DD>.jsonl`, each line a
//! serialized [`TierRecord`]. User ids are percent-encoded so any id maps to
//! a single safe directory name.
//!
//! Appends may duplicate a record (migration is at-least-once); reads keep
//! the last line written for each timestamp.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use meshbrain_core::error::MemoryError;
use meshbrain_core::memory::{RangeQuery, TierStore};
use meshbrain_core::turn::{Tier, TierRecord};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A file-backed archive for turns that aged out of the WARM tier.
pub struct JsonlArchive {
    root: PathBuf,
    /// Serializes every mutation of the files
    write_lock: Mutex<()>,
}

impl JsonlArchive {
    /// Archive rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(path = %root.display(), "JSONL cold archive configured");
        Self {
            root,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(encode_user(user_id))
    }

    fn day_file(&self, user_id: &str, day: NaiveDate) -> PathBuf {
        self.user_dir(user_id).join(format!("{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// A user's day files, oldest day first.
    fn day_files(&self, user_id: &str) -> Vec<(NaiveDate, PathBuf)> {
        let Ok(entries) = std::fs::read_dir(self.user_dir(user_id)) else {
            return Vec::new();
        };
        let mut files: Vec<(NaiveDate, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let stem = path.file_stem()?.to_str()?;
                let day = NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()?;
                (path.extension()? == "jsonl").then_some((day, path))
            })
            .collect();
        files.sort_by_key(|(day, _)| *day);
        files
    }

    /// Load records from one file, skipping lines that don't parse.
    fn read_file(path: &Path) -> Result<Vec<TierRecord>, MemoryError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<TierRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Skipping corrupted archive line");
                    None
                }
            })
            .collect())
    }

    fn encode_lines(records: &[TierRecord]) -> Result<String, MemoryError> {
        let mut content = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| MemoryError::Serialization(format!("Failed to serialize record: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }
        Ok(content)
    }

    fn append(path: &Path, records: &[TierRecord]) -> Result<(), MemoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MemoryError::Storage(format!("Failed to create archive directory: {e}")))?;
        }
        let content = Self::encode_lines(records)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| MemoryError::Storage(format!("Failed to open {}: {e}", path.display())))?;
        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| MemoryError::Storage(format!("Failed to append to {}: {e}", path.display())))
    }

    /// Replace a file's contents atomically (write then rename).
    fn rewrite(path: &Path, records: &[TierRecord]) -> Result<(), MemoryError> {
        if records.is_empty() {
            return std::fs::remove_file(path)
                .map_err(|e| MemoryError::Storage(format!("Failed to remove {}: {e}", path.display())));
        }
        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, Self::encode_lines(records)?)
            .and_then(|_| std::fs::rename(&tmp, path))
            .map_err(|e| MemoryError::Storage(format!("Failed to rewrite {}: {e}", path.display())))
    }
}

#[async_trait]
impl TierStore for JsonlArchive {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn tier(&self) -> Tier {
        Tier::Cold
    }

    async fn put(&self, record: TierRecord) -> Result<(), MemoryError> {
        self.put_batch(vec![record]).await
    }

    async fn put_batch(&self, records: Vec<TierRecord>) -> Result<(), MemoryError> {
        let mut files: BTreeMap<PathBuf, Vec<TierRecord>> = BTreeMap::new();
        for mut record in records {
            record.tier = Tier::Cold;
            let path = self.day_file(&record.turn.user_id, record.turn.timestamp.date_naive());
            files.entry(path).or_default().push(record);
        }

        let _guard = self.write_lock.lock().await;
        for (path, records) in &files {
            Self::append(path, records)?;
        }
        Ok(())
    }

    async fn get_range(&self, user_id: &str, query: RangeQuery) -> Result<Vec<TierRecord>, MemoryError> {
        let first_day = query.range.since.map(|t| t.date_naive());
        let last_day = query.range.until.map(|t| t.date_naive());

        let mut by_ts: BTreeMap<DateTime<Utc>, TierRecord> = BTreeMap::new();
        for (day, path) in self.day_files(user_id) {
            if first_day.is_some_and(|d| day < d) || last_day.is_some_and(|d| day > d) {
                continue;
            }
            for record in Self::read_file(&path)? {
                if query.range.contains(record.turn.timestamp) {
                    by_ts.insert(record.turn.timestamp, record);
                }
            }
        }

        Ok(by_ts
            .into_values()
            .rev()
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn delete_before(&self, user_id: &str, before: DateTime<Utc>) -> Result<usize, MemoryError> {
        let cutoff_day = before.date_naive();
        let _guard = self.write_lock.lock().await;

        let mut removed = 0;
        for (day, path) in self.day_files(user_id) {
            if day > cutoff_day {
                break;
            }
            let records = Self::read_file(&path)?;
            let (old, keep): (Vec<_>, Vec<_>) = records
                .into_iter()
                .partition(|r| r.turn.timestamp < before);
            if old.is_empty() {
                continue;
            }
            Self::rewrite(&path, &keep)?;
            removed += old.len();
        }

        // Drop the user's directory once nothing is left in it
        if self.day_files(user_id).is_empty() {
            let _ = std::fs::remove_dir(self.user_dir(user_id));
        }
        Ok(removed)
    }

    async fn users(&self) -> Result<Vec<String>, MemoryError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MemoryError::Storage(format!("Failed to list archive: {e}"))),
        };

        Ok(entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| decode_user(e.file_name().to_str()?))
            .filter(|user| !self.day_files(user).is_empty())
            .collect())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        let mut total = 0;
        for user in self.users().await? {
            let mut seen: HashSet<DateTime<Utc>> = HashSet::new();
            for (_, path) in self.day_files(&user) {
                for record in Self::read_file(&path)? {
                    seen.insert(record.turn.timestamp);
                }
            }
            total += seen.len();
        }
        Ok(total)
    }

    async fn health_check(&self) -> bool {
        std::fs::create_dir_all(&self.root).is_ok() && self.root.is_dir()
    }
}

/// Percent-encode everything but `[A-Za-z0-9_-]`.
fn encode_user(user_id: &str) -> String {
    let mut out = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_user(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
