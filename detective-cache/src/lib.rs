//! # Detective Cache (detective-cache)
//!
//! Response caching for the language-model calls of a detective game.
//!
//! ## Features
//!
//! - Deterministic request keys that ignore parameter ordering and float noise
//! - In-memory LRU tier with TTL expiry
//! - Optional persistent disk tier with atomic index writes
//! - Fail-open behaviour: a broken cache costs a model call, never a game turn
//! - One isolated cache per game session through [`SessionRegistry`]
//! - Configuration from code or from `AI_CACHE_*` environment variables
//!
//! ## Wrapping a Model Call
//!
//! ```no_run
//! use detective_cache::{cached_response, AiCache, CacheConfig, CacheRequest};
//! use serde_json::json;
//!
//! # async fn ask_model(_prompt: &str) -> anyhow::Result<serde_json::Value> { Ok(json!("...")) }
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = AiCache::new(CacheConfig::from_env());
//!
//!     let request = CacheRequest::new("Describe the victim's study")
//!         .param("temperature", 0.7)
//!         .param("max_tokens", 300)
//!         .context(json!({"scene": "study", "act": 1}));
//!
//!     let answer = cached_response(&cache, &request, || ask_model(request.prompt())).await?;
//!     println!("{}", answer);
//!     Ok(())
//! }
//! ```
//!
//! ## Sessions
//!
//! ```no_run
//! use detective_cache::{generate_session_id, CacheConfig, SessionRegistry};
//! use serde_json::json;
//!
//! let registry = SessionRegistry::new(CacheConfig::persistent("cache/ai_responses"));
//! let session = generate_session_id();
//!
//! let cache = registry.get_or_create(&session);
//! cache.put("Who found the body?", &json!({}), json!("The cook"), None, None);
//!
//! // Game over: drop the session's in-memory state
//! registry.remove(&session);
//! ```

pub mod cache;
pub mod error;
pub mod session;

// Re-export main types for convenience
pub use cache::{
    cached_response, AiCache, CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey,
    CacheKeyGenerator, CacheRequest, CacheStatistics, CacheStatus, CacheValue, DiskTier,
    HashAlgorithm, InvalidationReason, MemoryTier, Metadata, SweepReport,
};
pub use error::{CacheError, Result};
pub use session::{generate_session_id, SessionRegistry, SessionStats};
