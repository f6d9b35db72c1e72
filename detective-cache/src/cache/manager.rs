//! Two-tier response cache in front of the model client

use crate::cache::{
    config::CacheConfig,
    disk::DiskTier,
    keys::CacheKeyGenerator,
    memory::{short, MemoryTier},
    sweeper::{sweep_once, Sweeper},
    types::{CacheKey, CacheStatistics, CacheStatus, CacheTier, CacheValue, Metadata, SweepReport},
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

/// AI response cache combining a memory tier and an optional disk tier
///
/// Whether the cache is enabled is fixed at construction. A disabled cache
/// builds no tiers, starts no sweeper, and answers every lookup with a miss.
/// No method returns an error: tier failures degrade to misses and no-ops.
///
/// A [retired](Self::retire) cache behaves like a disabled one and no longer
/// touches its disk directory.
pub struct AiCache {
    config: CacheConfig,
    key_generator: CacheKeyGenerator,
    memory: Option<Arc<MemoryTier>>,

    /// Held for the duration of every disk operation; emptied on retire
    disk: RwLock<Option<Arc<DiskTier>>>,
    retired: AtomicBool,
    sweeper: Mutex<Option<Sweeper>>,

    hits: AtomicU64,
    misses: AtomicU64,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    stores: AtomicU64,
}

impl AiCache {
    /// Build the cache described by `config`.
    ///
    /// The background sweeper is spawned on the current tokio runtime if
    /// there is one. A disk tier that cannot be opened is logged and left out.
    pub fn new(config: CacheConfig) -> Self {
        let config = config.normalized();
        let key_generator = CacheKeyGenerator::new(&config);

        if !config.enabled {
            info!("AI cache is disabled, all cache operations will be bypassed");
            return Self::with_tiers(config, key_generator, None, None);
        }

        if let Err(e) = config.validate() {
            warn!("Questionable cache configuration: {}", e);
        }

        let memory = Arc::new(MemoryTier::new(config.max_memory_entries));
        let disk = if config.enable_disk_cache {
            match DiskTier::open(&config.cache_directory, config.max_disk_entries) {
                Ok(disk) => Some(Arc::new(disk)),
                Err(e) => {
                    warn!(
                        "Disk cache unavailable at {}, continuing memory-only: {}",
                        config.cache_directory.display(),
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        let disk_enabled = disk.is_some();
        let sweeper = Sweeper::spawn(Arc::clone(&memory), disk.clone(), &config);
        let cache = Self::with_tiers(config, key_generator, Some(memory), disk);
        *cache.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = sweeper;

        info!(
            "AI cache initialized (memory entries: {}, disk enabled: {}, directory: {})",
            cache.config.max_memory_entries,
            disk_enabled,
            cache.config.cache_directory.display()
        );
        cache
    }

    fn with_tiers(
        config: CacheConfig,
        key_generator: CacheKeyGenerator,
        memory: Option<Arc<MemoryTier>>,
        disk: Option<Arc<DiskTier>>,
    ) -> Self {
        Self {
            config,
            key_generator,
            memory,
            disk: RwLock::new(disk),
            retired: AtomicBool::new(false),
            sweeper: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        }
    }

    /// Look up a cached response.
    ///
    /// Memory is tried first; a disk hit is copied back into memory.
    pub fn get(&self, prompt: &str, params: &Value, context: Option<&Value>) -> Option<CacheValue> {
        let Some(memory) = self.live_memory() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Cache bypass, cache disabled or retired");
            return None;
        };

        if self.prompt_too_long(prompt) {
            return None;
        }

        let key = self.key_for(prompt, params, context);

        if let Some(value) = memory.get(&key, self.config.memory_ttl) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %short(&key), tier = %CacheTier::Memory, "Cache hit");
            return Some(value);
        }

        if let Some(disk) = self.disk_slot().as_deref() {
            if let Some(value) = disk.get(&key, self.config.disk_ttl) {
                memory.put(key.clone(), value.clone(), Metadata::new());
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.disk_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %short(&key), tier = %CacheTier::Disk, "Cache hit, promoted to memory");
                return Some(value);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %short(&key), "Cache miss");
        None
    }

    /// Store a response in memory and, when configured, on disk
    pub fn put(
        &self,
        prompt: &str,
        params: &Value,
        response: CacheValue,
        context: Option<&Value>,
        metadata: Option<Metadata>,
    ) {
        let Some(memory) = self.live_memory() else {
            debug!("Cache store bypassed, cache disabled or retired");
            return;
        };

        if self.prompt_too_long(prompt) {
            return;
        }

        let key = self.key_for(prompt, params, context);
        let metadata = metadata.unwrap_or_default();

        match self.disk_slot().as_deref() {
            Some(disk) => {
                memory.put(key.clone(), response.clone(), metadata.clone());
                disk.put(&key, &response, &metadata);
            }
            None => memory.put(key.clone(), response, metadata),
        }

        self.stores.fetch_add(1, Ordering::Relaxed);
        debug!(key = %short(&key), "Stored in cache");
    }

    /// Clear the memory tier.
    ///
    /// Disk contents are left in place; use [`DiskTier::clear`] to erase them.
    pub fn clear(&self) {
        let Some(memory) = self.live_memory() else {
            debug!("Cache clear bypassed, cache disabled or retired");
            return;
        };

        memory.clear();
        info!("AI cache cleared");
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Counters plus per-tier snapshots
    pub fn get_statistics(&self) -> CacheStatistics {
        let mut stats = CacheStatistics::from_counters(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.memory_hits.load(Ordering::Relaxed),
            self.disk_hits.load(Ordering::Relaxed),
            self.stores.load(Ordering::Relaxed),
            !self.config.enabled,
        );

        stats.memory_cache = self.memory.as_ref().map(|m| m.stats());
        stats.disk_cache = self.disk_slot().as_ref().map(|d| d.stats());
        stats
    }

    /// Debug view of the active configuration
    pub fn status(&self) -> CacheStatus {
        CacheStatus {
            enabled: self.config.enabled,
            memory_cache_enabled: self.memory.is_some(),
            disk_cache_enabled: self.disk_slot().is_some(),
            max_memory_entries: self.config.max_memory_entries,
            memory_ttl_seconds: self.config.memory_ttl.as_secs(),
            enable_disk_cache: self.config.enable_disk_cache,
            cache_directory: self.config.cache_directory.clone(),
        }
    }

    /// Run one expiry pass now, on the calling thread
    pub fn sweep_expired(&self) -> SweepReport {
        match self.live_memory() {
            Some(memory) => sweep_once(
                memory,
                self.config.memory_ttl,
                self.disk_slot().as_deref(),
                self.config.disk_ttl,
            ),
            None => SweepReport::default(),
        }
    }

    /// Stop the background sweeper. Lookups keep working with lazy expiry.
    pub fn shutdown(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(sweeper) = sweeper {
            sweeper.stop();
            debug!("Cache sweeper shut down");
        }
    }

    /// Take this instance out of service for good.
    ///
    /// Stops the sweeper, waits for in-flight disk operations, releases the
    /// disk tier and clears memory. Afterwards every call behaves as on a
    /// disabled cache, so a new instance can own the same directory.
    pub fn retire(&self) {
        if self.retired.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown();

        let disk = self
            .disk
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(memory) = &self.memory {
            memory.clear();
        }

        if let Some(disk) = disk {
            debug!("Cache released disk tier at {}", disk.directory().display());
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn has_sweeper(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Sweeper::is_running)
    }

    /// Key this cache uses for a request
    pub fn key_for(&self, prompt: &str, params: &Value, context: Option<&Value>) -> CacheKey {
        self.key_generator.generate_key(prompt, params, context)
    }

    pub fn memory_tier(&self) -> Option<&MemoryTier> {
        self.memory.as_deref()
    }

    /// The attached disk tier, if any. `None` once retired.
    pub fn disk_tier(&self) -> Option<Arc<DiskTier>> {
        self.disk_slot().as_ref().map(Arc::clone)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn live_memory(&self) -> Option<&MemoryTier> {
        if self.is_retired() {
            return None;
        }
        self.memory.as_deref()
    }

    fn disk_slot(&self) -> RwLockReadGuard<'_, Option<Arc<DiskTier>>> {
        self.disk.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn prompt_too_long(&self, prompt: &str) -> bool {
        let length = prompt.chars().count();
        if length > self.config.max_prompt_length {
            debug!(prompt_length = length, "Skipping cache for long prompt");
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn params() -> Value {
        json!({"temperature": 0.7, "max_tokens": 256})
    }

    #[test]
    fn test_memory_hit() {
        let cache = AiCache::new(CacheConfig::memory_only());
        assert!(cache.get("Who did it?", &params(), None).is_none());

        cache.put("Who did it?", &params(), json!("The butler"), None, None);

        assert_eq!(cache.get("Who did it?", &params(), None), Some(json!("The butler")));
        let stats = cache.get_statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stores, 1);
        assert_eq!(stats.hit_rate_percent, 50.0);
        assert!(stats.disk_cache.is_none());
    }

    #[test]
    fn test_context_separates_entries() {
        let cache = AiCache::new(CacheConfig::memory_only());
        let scene_one = json!({"scene": 1});
        let scene_two = json!({"scene": 2});

        cache.put("Describe the room", &params(), json!("dusty"), Some(&scene_one), None);

        assert!(cache.get("Describe the room", &params(), Some(&scene_one)).is_some());
        assert!(cache.get("Describe the room", &params(), Some(&scene_two)).is_none());

        // Context floats are compared exactly
        cache.put("Is the suspect lying?", &params(), json!("yes"), Some(&json!({"suspicion": 0.50001})), None);
        assert!(cache
            .get("Is the suspect lying?", &params(), Some(&json!({"suspicion": 0.50004})))
            .is_none());
    }

    #[test]
    fn test_disk_promotion() {
        let dir = TempDir::new().unwrap();
        let cache = AiCache::new(CacheConfig::persistent(dir.path()));
        cache.put("p", &params(), json!({"text": "clue"}), None, None);

        let key = cache.key_for("p", &params(), None);
        cache.memory_tier().unwrap().remove(&key);

        assert_eq!(cache.get("p", &params(), None), Some(json!({"text": "clue"})));
        assert!(cache.memory_tier().unwrap().contains(&key));
        assert_eq!(cache.get_statistics().disk_hits, 1);
    }

    #[test]
    fn test_disabled_cache() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::builder()
            .enabled(false)
            .enable_disk_cache(true)
            .cache_directory(dir.path().join("cache"))
            .build();
        let cache = AiCache::new(config);

        cache.put("p", &params(), json!("v"), None, None);
        assert!(cache.get("p", &params(), None).is_none());
        assert!(cache.get("p", &params(), None).is_none());
        cache.clear();

        assert!(!cache.is_enabled());
        assert!(cache.memory_tier().is_none());
        assert!(!dir.path().join("cache").exists());

        let stats = cache.get_statistics();
        assert!(stats.cache_disabled);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.stores, 0);
        assert!(stats.memory_cache.is_none());
    }

    #[test]
    fn test_prompt_length_guard() {
        let config = CacheConfig::builder().max_prompt_length(5).build();
        let cache = AiCache::new(config);

        cache.put("abcdef", &params(), json!("v"), None, None);
        assert!(cache.get("abcdef", &params(), None).is_none());
        assert_eq!(cache.get_statistics().stores, 0);
        assert_eq!(cache.get_statistics().misses, 0);

        // Limit counts characters, not bytes
        cache.put("ééééé", &params(), json!("v"), None, None);
        assert!(cache.get("ééééé", &params(), None).is_some());
    }

    #[test]
    fn test_clear_keeps_disk() {
        let dir = TempDir::new().unwrap();
        let cache = AiCache::new(CacheConfig::persistent(dir.path()));
        cache.put("p", &params(), json!("v"), None, None);

        cache.clear();

        assert!(cache.memory_tier().unwrap().is_empty());
        assert_eq!(cache.disk_tier().unwrap().len(), 1);
        assert_eq!(cache.get("p", &params(), None), Some(json!("v")));
    }

    #[test]
    fn test_unopenable_disk_falls_back_to_memory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, "x").unwrap();

        let cache = AiCache::new(CacheConfig::persistent(&file));
        assert!(cache.disk_tier().is_none());
        assert!(cache.status().memory_cache_enabled);
        assert!(!cache.status().disk_cache_enabled);

        cache.put("p", &params(), json!("v"), None, None);
        assert!(cache.get("p", &params(), None).is_some());
    }

    #[test]
    fn test_status() {
        let status = AiCache::new(CacheConfig::memory_only()).status();
        assert!(status.enabled);
        assert!(status.memory_cache_enabled);
        assert!(!status.disk_cache_enabled);
        assert_eq!(status.max_memory_entries, 1_000);
        assert_eq!(status.memory_ttl_seconds, 3600);
    }

    #[test]
    fn test_sweep_expired() {
        let config = CacheConfig::builder()
            .memory_ttl(Duration::from_millis(20))
            .build();
        let cache = AiCache::new(config);
        cache.put("p", &params(), json!("v"), None, None);

        std::thread::sleep(Duration::from_millis(40));
        let report = cache.sweep_expired();

        assert_eq!(report.expired_memory, 1);
        assert_eq!(report.expired_disk, 0);
        assert!(cache.memory_tier().unwrap().is_empty());
    }

    #[test]
    fn test_no_sweeper_outside_runtime() {
        let cache = AiCache::new(CacheConfig::memory_only());
        assert!(!cache.has_sweeper());
    }

    #[tokio::test]
    async fn test_retire_detaches_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = AiCache::new(CacheConfig::persistent(dir.path()));
        cache.put("p", &params(), json!("v"), None, None);
        assert!(cache.has_sweeper());

        cache.retire();
        cache.retire();

        assert!(cache.is_retired());
        assert!(!cache.has_sweeper());
        assert!(cache.disk_tier().is_none());
        assert!(cache.memory_tier().unwrap().is_empty());
        assert!(!cache.status().disk_cache_enabled);

        cache.put("q", &params(), json!("w"), None, None);
        assert!(cache.get("p", &params(), None).is_none());
        assert!(cache.get("q", &params(), None).is_none());
        assert!(cache.memory_tier().unwrap().is_empty());
        assert_eq!(cache.sweep_expired(), SweepReport::default());

        let stats = cache.get_statistics();
        assert_eq!(stats.stores, 1);
        assert_eq!(stats.misses, 2);
        assert!(stats.disk_cache.is_none());

        // Disk contents written before retiring stay for the next owner
        let disk = DiskTier::open(dir.path(), 10).unwrap();
        assert_eq!(disk.len(), 1);
        assert!(disk.contains(&cache.key_for("p", &params(), None)));
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweeper() {
        let cache = AiCache::new(CacheConfig::memory_only());
        assert!(cache.has_sweeper());

        cache.shutdown();
        assert!(!cache.has_sweeper());

        cache.put("p", &params(), json!("v"), None, None);
        assert!(cache.get("p", &params(), None).is_some());
    }
}
