//! Reasons an entry leaves a tier
//!
//! Both tiers tag every removal with an [`InvalidationReason`] so logs and
//! counters agree on why an entry disappeared.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry outlived its TTL
    Expired,

    /// Evicted to make room (memory: recency order, disk: oldest access)
    LeastRecentlyUsed,

    /// Removed by key
    Manual,

    /// Dropped by a whole-tier clear
    Cleared,

    /// Index entry whose blob file is gone
    MissingBlob,

    /// Blob exists but cannot be read or decoded
    Unreadable { detail: String },
}

impl InvalidationReason {
    /// Whether the removal repaired an inconsistent disk state
    pub fn is_self_healing(&self) -> bool {
        matches!(
            self,
            InvalidationReason::MissingBlob | InvalidationReason::Unreadable { .. }
        )
    }
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::LeastRecentlyUsed => write!(f, "LRU eviction"),
            InvalidationReason::Manual => write!(f, "manual removal"),
            InvalidationReason::Cleared => write!(f, "tier cleared"),
            InvalidationReason::MissingBlob => write!(f, "blob file missing"),
            InvalidationReason::Unreadable { detail } => write!(f, "blob unreadable: {}", detail),
        }
    }
}
