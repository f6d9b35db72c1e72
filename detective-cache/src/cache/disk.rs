//! Persistent tier: one JSON blob per key plus a single index file
//!
//! Layout inside the cache directory:
//!
//! ```text
//! cache_index.json   { "<key>": { created_at, last_accessed, access_count, size_bytes, metadata } }
//! <key>.blob         JSON-encoded value
//! ```
//!
//! Failures never escape the public methods. Reads degrade to a miss, writes
//! to a no-op, and broken entries are removed the next time they are touched.

use crate::cache::{
    entry::is_past_ttl,
    invalidation::InvalidationReason,
    memory::short,
    types::{CacheValue, DiskStats, Metadata},
};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the index file inside the cache directory
pub const INDEX_FILE: &str = "cache_index.json";

const BLOB_EXTENSION: &str = "blob";
const TEMP_SUFFIX: &str = "tmp";

/// Index bookkeeping for one blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,

    /// Size of the blob file as written
    pub size_bytes: u64,

    #[serde(default)]
    pub metadata: Metadata,
}

type Index = BTreeMap<String, IndexRecord>;

/// Disk-backed cache tier
///
/// The index is held in memory and rewritten as a whole after every mutation.
/// Blob I/O happens under the same lock as index updates, so operations on a
/// key are totally ordered.
pub struct DiskTier {
    directory: PathBuf,
    index_path: PathBuf,
    max_entries: usize,
    index: Mutex<Index>,

    /// Entries dropped because their blob was missing or unreadable
    repaired: AtomicU64,
}

impl DiskTier {
    /// Open (or create) a disk tier in `directory`.
    ///
    /// Fails only when the directory cannot be created. An unreadable or
    /// malformed index is logged and replaced by an empty one.
    pub fn open(directory: impl Into<PathBuf>, max_entries: usize) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let index_path = directory.join(INDEX_FILE);
        let index = match load_index(&index_path) {
            Ok(index) => index,
            Err(e) => {
                warn!("Disk cache index unusable, starting empty: {}", e);
                Index::new()
            }
        };

        info!(
            "Opened disk cache at {} ({} entries, capacity {})",
            directory.display(),
            index.len(),
            max_entries
        );

        Ok(Self {
            directory,
            index_path,
            max_entries,
            index: Mutex::new(index),
            repaired: AtomicU64::new(0),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Path of the blob file backing `key`
    pub fn blob_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", key, BLOB_EXTENSION))
    }

    /// Look up `key`, loading its blob.
    ///
    /// Expired, missing or undecodable entries are removed and reported as a
    /// miss. A hit updates the access bookkeeping and persists the index.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<CacheValue> {
        if let Err(e) = validate_key(key) {
            warn!("Disk cache lookup skipped: {}", e);
            return None;
        }

        let mut index = self.lock();
        let created_at = index.get(key)?.created_at;

        if is_past_ttl(created_at, ttl, Utc::now()) {
            self.remove_locked(&mut index, key, InvalidationReason::Expired);
            self.persist_or_warn(&index);
            return None;
        }

        match self.read_blob(key) {
            Ok(value) => {
                if let Some(record) = index.get_mut(key) {
                    record.last_accessed = Utc::now();
                    record.access_count += 1;
                }
                self.persist_or_warn(&index);
                Some(value)
            }
            Err(e) => {
                let reason = match &e {
                    CacheError::Io(io) if io.kind() == ErrorKind::NotFound => {
                        InvalidationReason::MissingBlob
                    }
                    other => InvalidationReason::Unreadable {
                        detail: other.to_string(),
                    },
                };
                warn!(key = %short(key), "Dropping broken disk cache entry: {}", reason);
                self.remove_locked(&mut index, key, reason);
                self.persist_or_warn(&index);
                None
            }
        }
    }

    /// Write `value` and upsert its index record, then enforce capacity.
    ///
    /// Returns whether the value was stored. On failure the index is left
    /// as it was and any partial blob is deleted.
    pub fn put(&self, key: &str, value: &CacheValue, metadata: &Metadata) -> bool {
        match self.try_put(key, value, metadata) {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %short(key), "Failed to write disk cache entry: {}", e);
                false
            }
        }
    }

    fn try_put(&self, key: &str, value: &CacheValue, metadata: &Metadata) -> Result<()> {
        validate_key(key)?;
        let bytes = serde_json::to_vec(value)?;

        let mut index = self.lock();
        let size_bytes = self.write_blob(key, &bytes)?;

        let now = Utc::now();
        index.insert(
            key.to_string(),
            IndexRecord {
                created_at: now,
                last_accessed: now,
                access_count: 1,
                size_bytes,
                metadata: metadata.clone(),
            },
        );

        while index.len() > self.max_entries {
            let Some(victim) = index
                .iter()
                .min_by_key(|(_, record)| record.last_accessed)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            self.remove_locked(&mut index, &victim, InvalidationReason::LeastRecentlyUsed);
        }

        self.persist_index(&index)
    }

    /// Remove a specific entry
    pub fn remove(&self, key: &str) -> bool {
        if validate_key(key).is_err() {
            return false;
        }

        let mut index = self.lock();
        let removed = self.remove_locked(&mut index, key, InvalidationReason::Manual);
        if removed {
            self.persist_or_warn(&index);
        }
        removed
    }

    /// Remove every entry older than `ttl`, returning how many were dropped
    pub fn cleanup_expired(&self, ttl: Duration) -> usize {
        let mut index = self.lock();
        let now = Utc::now();

        let expired: Vec<String> = index
            .iter()
            .filter(|(_, record)| is_past_ttl(record.created_at, ttl, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove_locked(&mut index, key, InvalidationReason::Expired);
        }
        if !expired.is_empty() {
            self.persist_or_warn(&index);
        }

        expired.len()
    }

    /// Erase everything on disk: indexed blobs, orphaned blobs left behind
    /// by a lost index, and stray temp files. Returns the number of files
    /// deleted.
    pub fn clear(&self) -> usize {
        let mut index = self.lock();
        let mut deleted = 0;

        match fs::read_dir(&self.directory) {
            Ok(entries) => {
                for path in entries.flatten().map(|e| e.path()) {
                    let is_blob = path.extension().is_some_and(|ext| ext == BLOB_EXTENSION);
                    let is_temp = path.extension().is_some_and(|ext| ext == TEMP_SUFFIX);
                    if !(is_blob || is_temp) {
                        continue;
                    }
                    match fs::remove_file(&path) {
                        Ok(()) => deleted += 1,
                        Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
                    }
                }
            }
            Err(e) => warn!(
                "Failed to list disk cache directory {}: {}",
                self.directory.display(),
                e
            ),
        }

        let count = index.len();
        index.clear();
        self.persist_or_warn(&index);

        info!(
            "Cleared {} entries from disk cache ({}, {} files deleted)",
            count,
            InvalidationReason::Cleared,
            deleted
        );
        deleted
    }

    /// Check presence in the index without touching the blob
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Snapshot of the index record for `key`
    pub fn record(&self, key: &str) -> Option<IndexRecord> {
        self.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> DiskStats {
        let index = self.lock();

        DiskStats {
            entries: index.len(),
            max_entries: self.max_entries,
            total_size_bytes: index.values().map(|r| r.size_bytes).sum(),
            cache_directory: self.directory.clone(),
            index_file_exists: self.index_path.exists(),
            repaired_entries: self.repaired.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_blob(&self, key: &str) -> Result<CacheValue> {
        let bytes = fs::read(self.blob_path(key))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write through a temp file so a failed write never leaves a truncated
    /// blob under the final name.
    fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<u64> {
        let path = self.blob_path(key);
        let temp = temp_path(&path);

        if let Err(e) = fs::write(&temp, bytes).and_then(|_| fs::rename(&temp, &path)) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        Ok(bytes.len() as u64)
    }

    fn remove_locked(&self, index: &mut Index, key: &str, reason: InvalidationReason) -> bool {
        let removed = index.remove(key).is_some();

        match fs::remove_file(self.blob_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(key = %short(key), "Failed to delete blob: {}", e),
        }

        if removed {
            if reason.is_self_healing() {
                self.repaired.fetch_add(1, Ordering::Relaxed);
            }
            debug!(key = %short(key), %reason, "Removed disk entry");
        }
        removed
    }

    /// Replace the index file atomically (temp file + rename)
    fn persist_index(&self, index: &Index) -> Result<()> {
        let json = serde_json::to_vec_pretty(index)?;
        let temp = temp_path(&self.index_path);

        if let Err(e) = fs::write(&temp, json).and_then(|_| fs::rename(&temp, &self.index_path)) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }

    fn persist_or_warn(&self, index: &Index) {
        if let Err(e) = self.persist_index(index) {
            warn!("Failed to persist disk cache index: {}", e);
        }
    }
}

fn load_index(path: &Path) -> Result<Index> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Index::new()),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&data).map_err(|e| CacheError::IndexCorruption {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Keys become file names, so only `[A-Za-z0-9_-]` is accepted.
fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}
