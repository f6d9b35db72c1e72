//! Per-session cache instances
//!
//! Every game session gets its own [`AiCache`], so one player's cached
//! answers never leak into another player's game. Each session also gets its
//! own disk directory derived from the session id.

use crate::cache::{AiCache, CacheConfig, CacheStatistics};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;
use uuid::Uuid;

const MAX_DIRECTORY_ID_LEN: usize = 48;

/// Statistics for every live session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub sessions: BTreeMap<String, CacheStatistics>,
}

#[derive(Default)]
struct Sessions {
    caches: HashMap<String, Arc<AiCache>>,

    /// Session ids in insertion order
    order: VecDeque<String>,
}

/// Registry owning one cache per session id
///
/// All registry mutations are serialised under one lock, separate from the
/// locks inside each cache.
pub struct SessionRegistry {
    base_config: CacheConfig,
    sessions: Mutex<Sessions>,
}

impl SessionRegistry {
    /// Sessions created by [`get_or_create`](Self::get_or_create) use
    /// `base_config`, rebased onto a per-session directory.
    pub fn new(base_config: CacheConfig) -> Self {
        Self {
            base_config,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    pub fn base_config(&self) -> &CacheConfig {
        &self.base_config
    }

    /// Return the session's cache, creating it on first use
    pub fn get_or_create(&self, session_id: &str) -> Arc<AiCache> {
        let mut sessions = self.lock();

        if let Some(cache) = sessions.caches.get(session_id) {
            return Arc::clone(cache);
        }

        let config = session_config(&self.base_config, session_id);
        let cache = Arc::new(AiCache::new(config));
        sessions.caches.insert(session_id.to_string(), Arc::clone(&cache));
        sessions.order.push_back(session_id.to_string());

        info!("Created cache for session {}", session_id);
        cache
    }

    /// Install a cache with a custom configuration, replacing any existing
    /// one. The cache directory is still rebased per session.
    ///
    /// A replaced cache is retired before the new one opens its directory.
    pub fn initialize(&self, session_id: &str, config: CacheConfig) -> Arc<AiCache> {
        let config = session_config(&config, session_id);
        let mut sessions = self.lock();

        match sessions.caches.remove(session_id) {
            Some(previous) => previous.retire(),
            None => sessions.order.push_back(session_id.to_string()),
        }

        let cache = Arc::new(AiCache::new(config));
        sessions.caches.insert(session_id.to_string(), Arc::clone(&cache));

        info!(
            "Initialized cache for session {} ({})",
            session_id,
            if cache.is_enabled() { "enabled" } else { "disabled" }
        );
        cache
    }

    /// Retire and drop the session's cache. Its disk files stay in place.
    ///
    /// Handles still held by callers become inert.
    pub fn remove(&self, session_id: &str) -> bool {
        let mut sessions = self.lock();
        let removed = remove_locked(&mut sessions, session_id);
        if removed {
            info!("Removed cache for session {}", session_id);
        }
        removed
    }

    /// Clear the session's memory tier, keeping the session registered
    pub fn clear_session(&self, session_id: &str) -> bool {
        let sessions = self.lock();
        match sessions.caches.get(session_id) {
            Some(cache) => {
                cache.clear();
                info!("Cleared cache for session {}", session_id);
                true
            }
            None => false,
        }
    }

    pub fn stats_for_all(&self) -> SessionStats {
        let sessions = self.lock();

        SessionStats {
            total_sessions: sessions.caches.len(),
            sessions: sessions
                .caches
                .iter()
                .map(|(id, cache)| (id.clone(), cache.get_statistics()))
                .collect(),
        }
    }

    /// Remove the oldest-inserted sessions until at most `max_sessions`
    /// remain. Returns the removed ids, oldest first.
    ///
    /// Order is registration order, not last activity.
    pub fn evict_oldest_beyond(&self, max_sessions: usize) -> Vec<String> {
        let mut sessions = self.lock();
        let excess = sessions.order.len().saturating_sub(max_sessions);

        let victims: Vec<String> = sessions.order.iter().take(excess).cloned().collect();
        for id in &victims {
            remove_locked(&mut sessions, id);
        }

        if !victims.is_empty() {
            info!("Evicted {} oldest session caches", victims.len());
        }
        victims
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().caches.contains_key(session_id)
    }

    /// Live session ids in registration order
    pub fn session_ids(&self) -> Vec<String> {
        self.lock().order.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().caches.is_empty()
    }

    /// Disk directory a session's cache uses
    pub fn session_directory(&self, session_id: &str) -> PathBuf {
        session_directory(&self.base_config.cache_directory, session_id)
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_locked(sessions: &mut Sessions, session_id: &str) -> bool {
    let Some(cache) = sessions.caches.remove(session_id) else {
        return false;
    };
    sessions.order.retain(|id| id != session_id);

    cache.retire();
    true
}

fn session_config(config: &CacheConfig, session_id: &str) -> CacheConfig {
    config.with_cache_directory(session_directory(&config.cache_directory, session_id))
}

/// `<base>/session-<sanitised id>-<8 hex digits of sha256(id)>`
///
/// The digest keeps ids that sanitise to the same text apart.
pub fn session_directory(base: &Path, session_id: &str) -> PathBuf {
    let digest = Sha256::digest(session_id.as_bytes());
    base.join(format!(
        "session-{}-{}",
        sanitize(session_id),
        hex::encode(&digest[..4])
    ))
}

fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .take(MAX_DIRECTORY_ID_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Fresh random session id
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(CacheConfig::memory_only())
    }

    #[test]
    fn test_get_or_create_reuses_instance() {
        let registry = registry();
        let a1 = registry.get_or_create("A");
        let a2 = registry.get_or_create("A");

        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_session_isolation() {
        let registry = registry();
        let params = json!({"temperature": 0.5});

        registry
            .get_or_create("A")
            .put("Who has the key?", &params, json!("The maid"), None, None);

        assert!(registry.get_or_create("B").get("Who has the key?", &params, None).is_none());
        assert_eq!(
            registry.get_or_create("A").get("Who has the key?", &params, None),
            Some(json!("The maid"))
        );
    }

    #[test]
    fn test_remove_creates_fresh_instance() {
        let registry = registry();
        let params = json!({});
        let first = registry.get_or_create("A");
        first.put("p", &params, json!("v"), None, None);

        assert!(registry.remove("A"));
        assert!(!registry.remove("A"));
        assert!(!registry.contains("A"));
        assert!(first.memory_tier().unwrap().is_empty());

        let second = registry.get_or_create("A");
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.get("p", &params, None).is_none());
    }

    #[test]
    fn test_clear_session() {
        let registry = registry();
        let params = json!({});
        registry.get_or_create("A").put("p", &params, json!("v"), None, None);

        assert!(registry.clear_session("A"));
        assert!(!registry.clear_session("missing"));
        assert!(registry.contains("A"));
        assert!(registry.get_or_create("A").get("p", &params, None).is_none());
    }

    #[test]
    fn test_evict_oldest_beyond_uses_insertion_order() {
        let registry = registry();
        for id in ["s1", "s2", "s3", "s4"] {
            registry.get_or_create(id);
        }
        // Activity does not protect a session from eviction
        registry.get_or_create("s1").get("p", &json!({}), None);

        let evicted = registry.evict_oldest_beyond(2);

        assert_eq!(evicted, vec!["s1".to_string(), "s2".to_string()]);
        assert_eq!(registry.session_ids(), vec!["s3".to_string(), "s4".to_string()]);
        assert!(registry.evict_oldest_beyond(2).is_empty());
        assert!(registry.evict_oldest_beyond(10).is_empty());
    }

    #[test]
    fn test_stats_for_all() {
        let registry = registry();
        registry.get_or_create("A").get("p", &json!({}), None);
        registry.get_or_create("B");

        let stats = registry.stats_for_all();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.sessions["A"].misses, 1);
        assert_eq!(stats.sessions["B"].total_requests, 0);
    }

    #[test]
    fn test_initialize_custom_config() {
        let registry = registry();
        registry.get_or_create("A");
        registry.get_or_create("B");

        let previous = registry.get_or_create("A");
        previous.put("p", &json!({}), json!("v"), None, None);

        let cache = registry.initialize("A", CacheConfig::disabled());

        assert!(previous.is_retired());
        assert!(previous.memory_tier().unwrap().is_empty());
        assert!(!cache.is_enabled());
        assert!(!registry.get_or_create("A").is_enabled());
        assert_eq!(registry.session_ids(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_sessions_get_distinct_directories() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(CacheConfig::persistent(dir.path()));

        let a = registry.get_or_create("player/one");
        let b = registry.get_or_create("player_one");

        let dir_a = a.disk_tier().unwrap().directory().to_path_buf();
        let dir_b = b.disk_tier().unwrap().directory().to_path_buf();
        assert_ne!(dir_a, dir_b);
        assert!(dir_a.starts_with(dir.path()));
        assert_eq!(dir_a, registry.session_directory("player/one"));

        a.put("p", &json!({}), json!("v"), None, None);
        assert!(b.get("p", &json!({}), None).is_none());
    }

    #[test]
    fn test_session_directory_format() {
        let path = session_directory(Path::new("cache"), "../etc");
        let name = path.file_name().unwrap().to_str().unwrap();

        assert!(name.starts_with("session-___etc-"));
        assert_eq!(name.len(), "session-___etc-".len() + 8);
        assert_eq!(path.parent().unwrap(), Path::new("cache"));
    }

    #[test]
    fn test_generate_session_id() {
        let a = generate_session_id();
        let b = generate_session_id();

        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
