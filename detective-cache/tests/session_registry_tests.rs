//! Integration tests for per-session caches

use detective_cache::{generate_session_id, CacheConfig, DiskTier, SessionRegistry};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_players_do_not_share_answers() {
    let dir = TempDir::new().unwrap();
    let registry = SessionRegistry::new(CacheConfig::persistent(dir.path()));
    let params = json!({"temperature": 0.8});
    let alice = generate_session_id();
    let bob = generate_session_id();

    registry
        .get_or_create(&alice)
        .put("What is in the drawer?", &params, json!("A revolver"), None, None);

    assert!(registry
        .get_or_create(&bob)
        .get("What is in the drawer?", &params, None)
        .is_none());
    assert_eq!(
        registry
            .get_or_create(&alice)
            .get("What is in the drawer?", &params, None),
        Some(json!("A revolver"))
    );
}

#[test]
fn test_removed_session_keeps_disk_files() {
    let dir = TempDir::new().unwrap();
    let registry = SessionRegistry::new(CacheConfig::persistent(dir.path()));
    let params = json!({});

    registry.get_or_create("case-7").put("p", &params, json!("v"), None, None);
    let session_dir = registry.session_directory("case-7");
    assert!(session_dir.join("cache_index.json").exists());

    assert!(registry.remove("case-7"));
    assert!(session_dir.join("cache_index.json").exists());

    // A fresh instance for the same id reads the surviving disk tier
    let cache = registry.get_or_create("case-7");
    assert_eq!(cache.get("p", &params, None), Some(json!("v")));
    assert_eq!(cache.get_statistics().disk_hits, 1);
}

fn blob_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "blob"))
        .count()
}

#[test]
fn test_stale_handle_cannot_clobber_recreated_session() {
    let dir = TempDir::new().unwrap();
    let registry = SessionRegistry::new(CacheConfig::persistent(dir.path()));
    let params = json!({});

    let old = registry.get_or_create("A");
    assert!(registry.remove("A"));
    let fresh = registry.get_or_create("A");

    old.put("x", &params, json!("stale"), None, None);
    fresh.put("y", &params, json!("live"), None, None);

    assert!(old.disk_tier().is_none());
    assert!(old.get("y", &params, None).is_none());

    let session_dir = registry.session_directory("A");
    assert_eq!(blob_count(&session_dir), 1);

    let reopened = DiskTier::open(&session_dir, 10).unwrap();
    assert_eq!(reopened.keys(), vec![fresh.key_for("y", &params, None)]);
}

#[test]
fn test_replaced_session_keeps_disk_consistent() {
    let dir = TempDir::new().unwrap();
    let registry = SessionRegistry::new(CacheConfig::persistent(dir.path()));
    let params = json!({});

    let old = registry.get_or_create("A");
    old.put("x", &params, json!("first"), None, None);

    let fresh = registry.initialize("A", CacheConfig::persistent(dir.path()));
    old.put("z", &params, json!("stale"), None, None);
    fresh.put("y", &params, json!("second"), None, None);

    assert_eq!(fresh.get("x", &params, None), Some(json!("first")));
    let session_dir = registry.session_directory("A");
    assert_eq!(blob_count(&session_dir), 2);
    assert_eq!(DiskTier::open(&session_dir, 10).unwrap().len(), 2);
}

#[test]
fn test_eviction_and_stats() {
    let registry = SessionRegistry::new(CacheConfig::memory_only());
    let ids: Vec<String> = (0..5).map(|i| format!("game-{}", i)).collect();
    for id in &ids {
        registry.get_or_create(id).put("p", &json!({}), json!(id), None, None);
    }

    let evicted = registry.evict_oldest_beyond(3);
    assert_eq!(evicted, ids[..2].to_vec());

    let stats = registry.stats_for_all();
    assert_eq!(stats.total_sessions, 3);
    assert!(stats.sessions.keys().eq(ids[2..].iter()));
    assert!(stats.sessions.values().all(|s| s.stores == 1));
}

#[test]
fn test_registry_shared_across_threads() {
    let registry = Arc::new(SessionRegistry::new(CacheConfig::memory_only()));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let session = format!("session-{}", t % 4);
                let cache = registry.get_or_create(&session);
                cache.put(&format!("q{}", t), &json!({}), json!(t), None, None);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.len(), 4);
    let stats = registry.stats_for_all();
    assert_eq!(stats.sessions.values().map(|s| s.stores).sum::<u64>(), 8);
}

#[tokio::test]
async fn test_remove_stops_sweeper() {
    let registry = SessionRegistry::new(CacheConfig::memory_only());
    let cache = registry.get_or_create("A");
    assert!(cache.has_sweeper());

    registry.remove("A");

    assert!(!cache.has_sweeper());
    assert!(registry.is_empty());
}
