//! In-process LRU tier

use crate::cache::{
    entry::CacheEntry,
    invalidation::InvalidationReason,
    types::{CacheKey, CacheValue, MemoryStats, Metadata},
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Bounded LRU cache held in memory
///
/// Every operation runs under one mutex and never touches the filesystem.
/// After any `put` returns, the tier holds at most `max_entries` entries.
pub struct MemoryTier {
    max_entries: usize,
    store: Mutex<MemoryStore>,
}

/// Internal cache storage
#[derive(Default)]
struct MemoryStore {
    entries: HashMap<CacheKey, CacheEntry>,

    /// Recency order: least recently used at the front
    lru_queue: VecDeque<CacheKey>,

    capacity_evictions: u64,
    expired_evictions: u64,
}

impl MemoryStore {
    fn remove_entry(&mut self, key: &str, reason: InvalidationReason) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        debug!(key = %short(key), %reason, "Removed memory entry");
        Some(entry)
    }

    fn mark_recent(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }
}

impl MemoryTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            store: Mutex::new(MemoryStore::default()),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Look up `key`, expiring it lazily if it is older than `ttl`
    pub fn get(&self, key: &str, ttl: Duration) -> Option<CacheValue> {
        let mut store = self.lock();

        let expired = store.entries.get(key)?.is_expired(ttl);
        if expired {
            store.remove_entry(key, InvalidationReason::Expired);
            store.expired_evictions += 1;
            return None;
        }

        let entry = store.entries.get_mut(key)?;
        entry.touch();
        let value = entry.value.clone();
        store.mark_recent(key);

        Some(value)
    }

    /// Store `value` as the most recently used entry, evicting LRU entries
    /// beyond capacity
    pub fn put(&self, key: CacheKey, value: CacheValue, metadata: Metadata) {
        let entry = CacheEntry::new(key.clone(), value, metadata);
        let mut store = self.lock();

        if store.entries.insert(key.clone(), entry).is_some() {
            debug!(key = %short(&key), "Replacing memory entry");
        }
        store.mark_recent(&key);

        while store.entries.len() > self.max_entries {
            let Some(oldest) = store.lru_queue.front().cloned() else {
                break;
            };
            store.remove_entry(&oldest, InvalidationReason::LeastRecentlyUsed);
            store.capacity_evictions += 1;
        }
    }

    /// Remove a specific entry
    pub fn remove(&self, key: &str) -> bool {
        self.lock()
            .remove_entry(key, InvalidationReason::Manual)
            .is_some()
    }

    /// Clear all entries
    pub fn clear(&self) {
        let mut store = self.lock();
        let count = store.entries.len();
        store.entries.clear();
        store.lru_queue.clear();

        if count > 0 {
            info!("Cleared {} entries from memory tier ({})", count, InvalidationReason::Cleared);
        }
    }

    /// Remove every entry older than `ttl`, returning how many were dropped
    pub fn cleanup_expired(&self, ttl: Duration) -> usize {
        let mut store = self.lock();

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            store.remove_entry(key, InvalidationReason::Expired);
        }
        store.expired_evictions += expired_keys.len() as u64;

        expired_keys.len()
    }

    /// Check presence without touching recency or access counters
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Snapshot of an entry without touching recency or access counters
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    /// Keys from least to most recently used
    pub fn keys_by_recency(&self) -> Vec<CacheKey> {
        self.lock().lru_queue.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn stats(&self) -> MemoryStats {
        let store = self.lock();

        MemoryStats {
            entries: store.entries.len(),
            max_entries: self.max_entries,
            total_size_bytes: store.entries.values().map(|e| e.size_bytes).sum(),
            oldest_entry: store.entries.values().map(|e| e.created_at).min(),
            newest_entry: store.entries.values().map(|e| e.created_at).max(),
            capacity_evictions: store.capacity_evictions,
            expired_evictions: store.expired_evictions,
        }
    }

    // A panic while holding the lock leaves the maps consistent (every
    // mutation is a single insert/remove), so a poisoned lock is reused.
    fn lock(&self) -> MutexGuard<'_, MemoryStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// First 16 characters of a key, for log lines
pub(crate) fn short(key: &str) -> &str {
    key.get(..16).unwrap_or(key)
}
