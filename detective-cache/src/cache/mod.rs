//! # AI Response Cache
//!
//! Two-tier cache for language-model responses, keyed by a digest of the
//! prompt, the output-relevant model parameters and the game context.
//!
//! ## Features
//!
//! - **Deterministic Keys**: canonical JSON (sorted keys, floats rounded to
//!   four decimals) hashed with a configurable SHA-2 digest
//! - **Memory Tier**: bounded LRU with lazy and periodic TTL expiry
//! - **Disk Tier**: one blob per key plus an atomically rewritten JSON index,
//!   self-healing on missing or corrupt blobs
//! - **Promotion**: disk hits are copied back into memory
//! - **Fail-Open**: cache malfunctions degrade to misses, never to errors
//! - **Cancellable Sweeper**: periodic cleanup task stopped with the cache
//!
//! ## Example
//!
//! ```rust
//! use detective_cache::cache::{AiCache, CacheConfig};
//! use serde_json::json;
//!
//! let cache = AiCache::new(CacheConfig::memory_only());
//! let params = json!({"temperature": 0.7, "max_tokens": 200});
//! let context = json!({"character": "butler", "scene": 2});
//!
//! cache.put("Where were you last night?", &params, json!("In the pantry."), Some(&context), None);
//!
//! let cached = cache.get("Where were you last night?", &params, Some(&context));
//! assert_eq!(cached, Some(json!("In the pantry.")));
//! ```

pub mod config;
pub mod disk;
pub mod entry;
pub mod integration;
pub mod invalidation;
pub mod keys;
pub mod manager;
pub mod memory;
pub mod sweeper;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder, HashAlgorithm};
pub use disk::{DiskTier, IndexRecord, INDEX_FILE};
pub use entry::CacheEntry;
pub use integration::{cached_response, is_cacheable, CacheRequest};
pub use invalidation::InvalidationReason;
pub use keys::{CacheKeyGenerator, CACHE_RELEVANT_PARAMS};
pub use manager::AiCache;
pub use memory::MemoryTier;
pub use sweeper::{sweep_once, Sweeper};
pub use types::{
    CacheKey, CacheStatistics, CacheStatus, CacheTier, CacheValue, DiskStats, MemoryStats,
    Metadata, SweepReport,
};
