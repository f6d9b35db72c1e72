//! Core type definitions for the cache system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Cache key type: lowercase hex digest produced by the key generator
pub type CacheKey = String;

/// Cached response. Opaque to the cache; strings and structured JSON alike.
pub type CacheValue = serde_json::Value;

/// Free-form metadata stored next to an entry
pub type Metadata = HashMap<String, serde_json::Value>;

/// Snapshot of the memory tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Number of entries currently held
    pub entries: usize,

    /// Configured capacity
    pub max_entries: usize,

    /// Sum of the estimated entry sizes
    pub total_size_bytes: usize,

    /// Creation time of the oldest entry
    pub oldest_entry: Option<DateTime<Utc>>,

    /// Creation time of the newest entry
    pub newest_entry: Option<DateTime<Utc>>,

    /// Entries evicted to stay within capacity
    pub capacity_evictions: u64,

    /// Entries dropped because their TTL elapsed
    pub expired_evictions: u64,
}

/// Snapshot of the disk tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskStats {
    pub entries: usize,
    pub max_entries: usize,
    pub total_size_bytes: u64,
    pub cache_directory: PathBuf,
    pub index_file_exists: bool,

    /// Entries dropped since open because their blob was missing or unreadable
    #[serde(default)]
    pub repaired_entries: u64,
}

/// Statistics reported by [`AiCache::get_statistics`](crate::cache::AiCache::get_statistics)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub stores: u64,

    /// `hits / (hits + misses)` as a percentage, two decimals
    pub hit_rate_percent: f64,

    pub total_requests: u64,
    pub cache_disabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_cache: Option<MemoryStats>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_cache: Option<DiskStats>,
}

impl CacheStatistics {
    /// Build the counter part of the report; tier sections start empty.
    pub fn from_counters(
        hits: u64,
        misses: u64,
        memory_hits: u64,
        disk_hits: u64,
        stores: u64,
        cache_disabled: bool,
    ) -> Self {
        let total_requests = hits + misses;
        let hit_rate_percent = if total_requests == 0 {
            0.0
        } else {
            let rate = hits as f64 / total_requests as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        };

        Self {
            hits,
            misses,
            memory_hits,
            disk_hits,
            stores,
            hit_rate_percent,
            total_requests,
            cache_disabled,
            memory_cache: None,
            disk_cache: None,
        }
    }

    /// Miss rate as a percentage
    pub fn miss_rate_percent(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            100.0 - self.hit_rate_percent
        }
    }
}

impl fmt::Display for CacheStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cache_disabled {
            return write!(f, "CacheStatistics {{ disabled, misses: {} }}", self.misses);
        }

        write!(
            f,
            "CacheStatistics {{ hits: {} (memory: {}, disk: {}), misses: {}, hit_rate: {:.2}%, stores: {} }}",
            self.hits,
            self.memory_hits,
            self.disk_hits,
            self.misses,
            self.hit_rate_percent,
            self.stores
        )
    }
}

/// Debug view of how a cache was configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub enabled: bool,
    pub memory_cache_enabled: bool,
    pub disk_cache_enabled: bool,
    pub max_memory_entries: usize,
    pub memory_ttl_seconds: u64,
    pub enable_disk_cache: bool,
    pub cache_directory: PathBuf,
}

/// Result of one expiry sweep over both tiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired_memory: usize,
    pub expired_disk: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.expired_memory + self.expired_disk
    }
}

/// Tier that served or stored a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Memory,
    Disk,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory"),
            CacheTier::Disk => write!(f, "disk"),
        }
    }
}
