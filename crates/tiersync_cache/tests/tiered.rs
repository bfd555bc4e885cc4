//! Integration tests for the tiered cache.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tiersync_cache::{
    CacheConfig, CacheError, EvictionPolicy, InMemoryBackend, ManualClock, TieredCacheManager,
};
use tiersync_codec::Payload;

fn small_file_cache(path: &std::path::Path) -> TieredCacheManager {
    let config = CacheConfig::new(4)
        .with_eviction_policy(EvictionPolicy::Fifo)
        .with_disk_path(path);
    TieredCacheManager::new(config).unwrap()
}

#[test]
fn demoted_entries_survive_restart() {
    let dir = tempdir().unwrap();

    {
        let cache = small_file_cache(dir.path());
        cache.set("a", Payload::binary(vec![1]), None);
        cache.set("b", Payload::binary(vec![2]), None);
        cache.set("c", Payload::binary(vec![3]), None);
        cache.flush().unwrap();
        assert_eq!(cache.statistics().disk_entry_count, 1);
    }

    let cache = small_file_cache(dir.path());
    assert_eq!(cache.statistics().disk_entry_count, 1);
    assert_eq!(cache.get("a"), Some(Payload::binary(vec![1])));
    // Memory is volatile.
    assert_eq!(cache.get("b"), None);
}

#[test]
fn second_cache_on_same_directory_is_rejected() {
    let dir = tempdir().unwrap();
    let _first = small_file_cache(dir.path());

    let config = CacheConfig::new(4).with_disk_path(dir.path());
    let result = TieredCacheManager::new(config);
    assert!(matches!(result, Err(CacheError::Locked(_))));
}

#[test]
fn expiry_is_preserved_through_demotion() {
    let clock = Arc::new(ManualClock::new(1_000));
    let backend = Arc::new(InMemoryBackend::new());
    let config = CacheConfig::new(4).with_eviction_policy(EvictionPolicy::Fifo);
    let cache = TieredCacheManager::with_disk(config, backend, None)
        .unwrap()
        .with_clock(clock.clone());

    cache.set("a", Payload::text("1"), Some(Duration::from_secs(10)));
    cache.set("b", Payload::text("2"), None);
    cache.set("c", Payload::text("3"), None);

    clock.advance(Duration::from_secs(11));
    assert_eq!(cache.get("a"), None);
    let stats = cache.statistics();
    assert_eq!(stats.miss_count, 1);
    assert_eq!(stats.expired_count, 1);
    assert_eq!(stats.disk_entry_count, 0);
}

#[test]
fn ttl_policy_evicts_soonest_expiry_first() {
    let clock = Arc::new(ManualClock::new(0));
    let config = CacheConfig::new(4).with_eviction_policy(EvictionPolicy::Ttl);
    let cache = TieredCacheManager::new(config)
        .unwrap()
        .with_clock(clock);

    cache.set("a", Payload::binary(vec![1]), Some(Duration::from_secs(60)));
    cache.set("b", Payload::binary(vec![2]), Some(Duration::from_secs(5)));
    cache.set("c", Payload::binary(vec![3]), Some(Duration::from_secs(30)));

    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(cache.contains("c"));
}

#[test]
fn lfu_keeps_frequently_read_entries() {
    let config = CacheConfig::new(4).with_eviction_policy(EvictionPolicy::Lfu);
    let cache = TieredCacheManager::new(config).unwrap();

    cache.set("a", Payload::binary(vec![1]), None);
    cache.set("b", Payload::binary(vec![2]), None);
    for _ in 0..3 {
        cache.get("a");
    }
    cache.set("c", Payload::binary(vec![3]), None);

    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
}

#[derive(Debug, Clone)]
enum Op {
    Set(u8, u8),
    Get(u8),
    Remove(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..6u8, any::<u8>()).prop_map(|(k, v)| Op::Set(k, v)),
        (0..6u8).prop_map(Op::Get),
        (0..6u8).prop_map(Op::Remove),
    ]
}

proptest! {
    /// With a disk tier large enough to hold everything, evictions never
    /// lose data: the cache behaves like a plain map.
    #[test]
    fn tiered_cache_matches_a_map(
        ops in prop::collection::vec(op(), 1..60),
        policy in prop_oneof![
            Just(EvictionPolicy::Lru),
            Just(EvictionPolicy::Lfu),
            Just(EvictionPolicy::Fifo),
            Just(EvictionPolicy::Ttl),
        ],
    ) {
        let backend = Arc::new(InMemoryBackend::new());
        let config = CacheConfig::new(6)
            .with_disk_capacity(1024)
            .with_eviction_policy(policy);
        let cache = TieredCacheManager::with_disk(config, backend, None).unwrap();
        let mut model: HashMap<String, Payload> = HashMap::new();

        for op in ops {
            match op {
                Op::Set(k, v) => {
                    let key = format!("k{k}");
                    cache.set(key.clone(), Payload::binary(vec![v]), None);
                    model.insert(key, Payload::binary(vec![v]));
                }
                Op::Get(k) => {
                    let key = format!("k{k}");
                    prop_assert_eq!(cache.get(&key), model.get(&key).cloned());
                }
                Op::Remove(k) => {
                    let key = format!("k{k}");
                    prop_assert_eq!(cache.remove(&key), model.remove(&key).is_some());
                }
            }
            prop_assert!(cache.statistics().memory_size_bytes <= 6);
        }

        prop_assert_eq!(cache.len(), model.len());
    }
}
