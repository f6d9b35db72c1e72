//! Cache entry management with TTL support

use crate::cache::types::{CacheKey, CacheValue, Metadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size assumed for a value whose encoded length cannot be computed
pub const FALLBACK_SIZE_ESTIMATE: usize = 1000;

/// A cached response with its bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached value
    pub value: CacheValue,

    /// When the entry was stored
    pub created_at: DateTime<Utc>,

    /// Last successful lookup (creation time until the first hit)
    pub last_accessed: DateTime<Utc>,

    /// Number of successful lookups
    pub access_count: u64,

    /// Estimated size of the value in bytes
    pub size_bytes: usize,

    /// Caller-supplied metadata
    pub metadata: Metadata,
}

impl CacheEntry {
    /// Create a new entry stamped with the current time
    pub fn new(key: CacheKey, value: CacheValue, metadata: Metadata) -> Self {
        let now = Utc::now();
        let size_bytes = estimate_size(&value);

        Self {
            key,
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            size_bytes,
            metadata,
        }
    }

    /// Check whether the entry is older than `ttl`.
    ///
    /// A zero TTL expires every entry.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        is_past_ttl(self.created_at, ttl, Utc::now())
    }

    /// Record a successful lookup
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }
}

/// Shared expiry rule for both tiers: `now - created_at > ttl`.
pub(crate) fn is_past_ttl(created_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    if ttl.is_zero() {
        return true;
    }

    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now - created_at > ttl,
        // TTL too large to represent: never expires
        Err(_) => false,
    }
}

/// Approximate byte size of a cached value.
///
/// Strings count their UTF-8 bytes, arrays and objects their JSON encoding,
/// anything else its rendered text.
pub fn estimate_size(value: &CacheValue) -> usize {
    match value {
        CacheValue::String(s) => s.len(),
        CacheValue::Array(_) | CacheValue::Object(_) => serde_json::to_vec(value)
            .map(|bytes| bytes.len())
            .unwrap_or(FALLBACK_SIZE_ESTIMATE),
        other => other.to_string().len(),
    }
}
