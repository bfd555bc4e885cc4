//! Tier orchestration.

use crate::backend::DiskBackend;
use crate::cipher::RecordCipher;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::disk::DiskTier;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::file::FileBackend;
use crate::journal::WriteJournal;
use crate::stats::{CacheCounters, CacheStatistics};
use crate::store::{EntryStore, Lookup};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tiersync_codec::Payload;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
enum Tier {
    Memory,
    Disk,
}

/// A two-tier cache: memory (L1) in front of an optional disk tier (L2).
///
/// Writes land in memory. When memory goes over budget, the configured
/// eviction policy picks a batch of victims, which are demoted to disk rather
/// than discarded. Lookups that miss memory fall through to disk and promote
/// what they find.
///
/// Explicit writes can be journaled for a sync layer with
/// [`track_writes`](Self::track_writes). Evictions, disk drops and expiry
/// are never journaled.
///
/// Disk problems never surface through [`get`](Self::get) or
/// [`set`](Self::set): they are logged, counted in [`CacheStatistics`], and
/// the memory tier keeps answering.
///
/// # Thread Safety
///
/// All methods take `&self`. Memory hits only touch the entry store lock;
/// anything that moves entries between tiers is serialized by a second lock,
/// so an entry is never lost or resurrected by a concurrent tier move.
///
/// # Example
///
/// ```rust
/// use tiersync_cache::{CacheConfig, TieredCacheManager};
/// use tiersync_codec::Payload;
///
/// let cache = TieredCacheManager::new(CacheConfig::new(1024)).unwrap();
/// cache.set("greeting", Payload::text("hello"), None);
/// assert_eq!(cache.get("greeting"), Some(Payload::text("hello")));
/// ```
pub struct TieredCacheManager {
    config: CacheConfig,
    store: EntryStore,
    disk: Option<DiskTier>,
    counters: CacheCounters,
    clock: Arc<dyn Clock>,
    journal: WriteJournal,
    tier_lock: Mutex<()>,
}

impl TieredCacheManager {
    /// Creates a cache from `config`.
    ///
    /// If `config.disk_path` is set, a file-backed disk tier is opened there.
    ///
    /// # Errors
    ///
    /// Returns an error if the disk directory cannot be opened or is locked
    /// by another cache.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        let disk = match &config.disk_path {
            Some(path) => {
                let backend = Arc::new(FileBackend::open(path)?);
                Some(DiskTier::open(backend, None, config.disk_capacity_bytes)?)
            }
            None => None,
        };
        Ok(Self::assemble(config, disk))
    }

    /// Creates a cache over a caller-supplied disk backend, optionally
    /// sealing records with `cipher`. `config.disk_path` is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend's existing records cannot be listed.
    pub fn with_disk(
        config: CacheConfig,
        backend: Arc<dyn DiskBackend>,
        cipher: Option<Arc<dyn RecordCipher>>,
    ) -> CacheResult<Self> {
        let disk = DiskTier::open(backend, cipher, config.disk_capacity_bytes)?;
        Ok(Self::assemble(config, Some(disk)))
    }

    fn assemble(config: CacheConfig, disk: Option<DiskTier>) -> Self {
        Self {
            config,
            store: EntryStore::new(),
            disk,
            counters: CacheCounters::default(),
            clock: Arc::new(SystemClock),
            journal: WriteJournal::new(),
            tier_lock: Mutex::new(()),
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the current time according to the cache's clock.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Writes a value into memory.
    ///
    /// `ttl = None` applies the configured default TTL. Any stale disk copy
    /// of the key is discarded. If memory goes over budget, victims are
    /// demoted to disk.
    pub fn set(&self, key: impl Into<String>, value: Payload, ttl: Option<Duration>) {
        self.write(key.into(), value, ttl, true);
    }

    /// Like [`set`](Self::set), but never journaled. For applying changes
    /// that came from another device.
    pub fn set_untracked(&self, key: impl Into<String>, value: Payload, ttl: Option<Duration>) {
        self.write(key.into(), value, ttl, false);
    }

    fn write(&self, key: String, value: Payload, ttl: Option<Duration>, tracked: bool) {
        let ttl = ttl.or(self.config.default_ttl);
        let _tiers = self.tier_lock.lock();

        if tracked {
            self.journal.record_set(&key, &value);
        }
        if let Some(disk) = &self.disk {
            disk.remove(&key);
        }
        let evicted = self.store.set_and_evict(
            key,
            value,
            ttl,
            self.clock.now_millis(),
            self.config.eviction_policy,
            self.config.memory_capacity_bytes,
        );
        self.demote(evicted);
    }

    /// Reads a value, checking memory first and then disk.
    ///
    /// A disk hit is promoted back into memory (which may demote other
    /// entries). Returns `None` on a miss in both tiers.
    pub fn get(&self, key: &str) -> Option<Payload> {
        let now = self.clock.now_millis();
        match self.store.get(key, now) {
            Lookup::Hit(value) => {
                self.counters.record_hit();
                return Some(value);
            }
            Lookup::Expired => self.counters.record_expirations(1),
            Lookup::Miss => {}
        }

        match self.get_from_disk(key, now) {
            Some((value, Tier::Memory)) => {
                self.counters.record_hit();
                Some(value)
            }
            Some((value, Tier::Disk)) => {
                self.counters.record_disk_hit();
                Some(value)
            }
            None => {
                self.counters.record_miss();
                None
            }
        }
    }

    fn get_from_disk(&self, key: &str, now: u64) -> Option<(Payload, Tier)> {
        let disk = self.disk.as_ref()?;
        let _tiers = self.tier_lock.lock();

        // Another caller may have promoted or rewritten the key meanwhile.
        if let Lookup::Hit(value) = self.store.get(key, now) {
            return Some((value, Tier::Memory));
        }

        let entry = match disk.get(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "disk read failed, dropping record");
                disk.remove(key);
                return None;
            }
        };
        disk.remove(key);

        if entry.is_expired(now) {
            self.counters.record_expirations(1);
            return None;
        }

        let value = entry.value.clone();
        let evicted = self.store.promote(
            entry,
            now,
            self.config.eviction_policy,
            self.config.memory_capacity_bytes,
        );
        self.demote(evicted);
        Some((value, Tier::Disk))
    }

    /// Moves evicted entries to disk. Must be called with the tier lock held.
    fn demote(&self, evicted: Vec<CacheEntry>) {
        if evicted.is_empty() {
            return;
        }
        self.counters.record_evictions(evicted.len() as u64);
        debug!(count = evicted.len(), policy = %self.config.eviction_policy, "evicted from memory");

        let Some(disk) = &self.disk else {
            return;
        };
        let now = self.clock.now_millis();
        for entry in evicted {
            if entry.is_expired(now) {
                self.counters.record_expirations(1);
                continue;
            }
            let key = entry.key.clone();
            match disk.set(entry) {
                Ok(dropped) if !dropped.is_empty() => {
                    self.counters.record_disk_drops(dropped.len() as u64);
                    warn!(
                        key = %key,
                        dropped = dropped.len(),
                        "disk tier full, dropped oldest records"
                    );
                }
                Ok(_) => {}
                Err(CacheError::CapacityExceeded { needed, capacity }) => {
                    self.counters.record_disk_drops(1);
                    warn!(key = %key, needed, capacity, "entry larger than disk tier, discarded");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "demotion to disk failed, entry discarded");
                }
            }
        }
    }

    /// Removes a key from both tiers. Returns true if either held it.
    ///
    /// The removal is journaled even if the key had already been evicted.
    pub fn remove(&self, key: &str) -> bool {
        self.delete(key, true)
    }

    /// Like [`remove`](Self::remove), but never journaled.
    pub fn remove_untracked(&self, key: &str) -> bool {
        self.delete(key, false)
    }

    fn delete(&self, key: &str, tracked: bool) -> bool {
        let _tiers = self.tier_lock.lock();
        if tracked {
            self.journal.record_remove(key);
        }
        let in_memory = self.store.remove(key);
        let on_disk = self.disk.as_ref().is_some_and(|disk| disk.remove(key));
        in_memory || on_disk
    }

    /// Returns true if a live value exists for `key`, without recording an
    /// access.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        if let Some(entry) = self.store.peek(key) {
            return !entry.is_expired(now);
        }
        self.disk
            .as_ref()
            .is_some_and(|disk| disk.contains_live(key, now))
    }

    /// Removes expired entries from both tiers. Returns how many were removed.
    ///
    /// Meant to be called periodically by the application; the cache never
    /// sweeps on its own.
    pub fn clean_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let _tiers = self.tier_lock.lock();
        let mut removed = self.store.remove_expired(now).len();
        if let Some(disk) = &self.disk {
            removed += disk.remove_expired(now).len();
        }
        self.counters.record_expirations(removed as u64);
        removed
    }

    /// Returns every live key and value across both tiers.
    ///
    /// Does not count as an access and does not promote anything.
    pub fn snapshot(&self) -> BTreeMap<String, Payload> {
        let now = self.clock.now_millis();
        let _tiers = self.tier_lock.lock();

        let mut values: BTreeMap<String, Payload> = self
            .store
            .entries()
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect();

        if let Some(disk) = &self.disk {
            for key in disk.keys() {
                if values.contains_key(&key) {
                    continue;
                }
                match disk.get(&key) {
                    Ok(Some(entry)) if !entry.is_expired(now) => {
                        values.insert(key, entry.value);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(key = %key, error = %e, "skipping unreadable disk record"),
                }
            }
        }
        values
    }

    /// Returns a statistics snapshot.
    pub fn statistics(&self) -> CacheStatistics {
        let mut stats = self.counters.snapshot();
        stats.memory_entry_count = self.store.len() as u64;
        stats.memory_size_bytes = self.store.size_bytes();
        if let Some(disk) = &self.disk {
            stats.disk_entry_count = disk.len() as u64;
            stats.disk_size_bytes = disk.size_bytes();
            stats.disk_write_failures = disk.write_failure_count();
        }
        stats
    }

    /// Number of entries across both tiers (expired ones included until
    /// they are discovered).
    pub fn len(&self) -> usize {
        self.store.len() + self.disk.as_ref().map_or(0, DiskTier::len)
    }

    /// Returns true if both tiers are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a disk tier is configured.
    pub fn has_disk_tier(&self) -> bool {
        self.disk.is_some()
    }

    /// Removes everything from both tiers. Journals a removal for every key
    /// held.
    pub fn clear(&self) {
        let _tiers = self.tier_lock.lock();
        if self.journal.is_enabled() {
            for entry in self.store.entries().iter() {
                self.journal.record_remove(&entry.key);
            }
            for key in self.disk.iter().flat_map(DiskTier::keys) {
                self.journal.record_remove(&key);
            }
        }
        self.store.clear();
        if let Some(disk) = &self.disk {
            disk.clear();
        }
    }

    /// Starts journaling explicit writes. Idempotent.
    pub fn track_writes(&self) {
        self.journal.enable();
    }

    /// Drains the writes journaled since the last call, latest change per
    /// key (`None` for a removal).
    pub fn take_writes(&self) -> BTreeMap<String, Option<Payload>> {
        self.journal.take()
    }

    /// Blocks until queued disk writes have been attempted. A durability
    /// barrier, e.g. before the process is suspended.
    ///
    /// # Errors
    ///
    /// Returns an error if the disk writer has stopped.
    pub fn flush(&self) -> CacheResult<()> {
        match &self.disk {
            Some(disk) => disk.flush(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for TieredCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCacheManager")
            .field("config", &self.config)
            .field("memory_entries", &self.store.len())
            .field("disk", &self.disk)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::InMemoryBackend;
    use crate::policy::EvictionPolicy;

    fn num(n: u8) -> Payload {
        Payload::binary(vec![n])
    }

    /// Memory holds exactly two one-letter keys with one-byte values.
    fn two_entry_config(policy: EvictionPolicy) -> CacheConfig {
        CacheConfig::new(4).with_eviction_policy(policy)
    }

    fn with_memory_disk(config: CacheConfig) -> (Arc<InMemoryBackend>, TieredCacheManager) {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = TieredCacheManager::with_disk(config, backend.clone(), None).unwrap();
        (backend, cache)
    }

    #[test]
    fn read_after_write() {
        let cache = TieredCacheManager::new(CacheConfig::new(1024)).unwrap();
        cache.set("k", Payload::text("v"), None);
        assert_eq!(cache.get("k"), Some(Payload::text("v")));
        assert_eq!(cache.get("k"), Some(Payload::text("v")));
    }

    #[test]
    fn fifo_eviction_without_disk() {
        let cache = TieredCacheManager::new(two_entry_config(EvictionPolicy::Fifo)).unwrap();
        cache.set("a", num(1), None);
        cache.set("b", num(2), None);
        cache.set("c", num(3), None);

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(num(2)));
        assert_eq!(cache.get("c"), Some(num(3)));
        assert_eq!(cache.statistics().eviction_count, 1);
    }

    #[test]
    fn lazy_expiry_counts_one_miss() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = TieredCacheManager::new(CacheConfig::new(1024))
            .unwrap()
            .with_clock(clock.clone());

        cache.set("x", Payload::text("v1"), Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(2));

        let before = cache.statistics().miss_count;
        assert_eq!(cache.get("x"), None);
        assert_eq!(cache.statistics().miss_count, before + 1);
        assert_eq!(cache.statistics().expired_count, 1);
    }

    #[test]
    fn default_ttl_applies_when_none_given() {
        let clock = Arc::new(ManualClock::new(0));
        let config = CacheConfig::new(1024).with_default_ttl(Duration::from_millis(100));
        let cache = TieredCacheManager::new(config)
            .unwrap()
            .with_clock(clock.clone());

        cache.set("k", Payload::text("v"), None);
        clock.advance(Duration::from_millis(99));
        assert!(cache.get("k").is_some());
        clock.advance(Duration::from_millis(1));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn evicted_entries_are_demoted_and_promoted_back() {
        let (backend, cache) = with_memory_disk(two_entry_config(EvictionPolicy::Lru));
        cache.set("a", num(1), None);
        cache.set("b", num(2), None);
        cache.set("c", num(3), None);
        cache.flush().unwrap();

        assert!(backend.contains("a"));
        assert_eq!(cache.get("a"), Some(num(1)));

        let stats = cache.statistics();
        assert_eq!(stats.disk_hit_count, 1);
        assert_eq!(stats.miss_count, 0);
        // Promoting "a" pushed another entry down.
        assert_eq!(stats.memory_entry_count, 2);
        assert_eq!(stats.disk_entry_count, 1);
    }

    #[test]
    fn failed_demotion_still_serves_the_entry() {
        let (backend, cache) = with_memory_disk(two_entry_config(EvictionPolicy::Fifo));
        backend.fail_writes(true);

        cache.set("a", num(1), None);
        cache.set("b", num(2), None);
        cache.set("c", num(3), None);
        cache.flush().unwrap();

        assert_eq!(cache.get("a"), Some(num(1)));
        assert_eq!(cache.statistics().miss_count, 0);
        assert!(cache.statistics().disk_write_failures >= 1);
    }

    #[test]
    fn disk_capacity_drops_oldest_regardless_of_memory_policy() {
        let config = two_entry_config(EvictionPolicy::Lru).with_disk_capacity(2);
        let (_backend, cache) = with_memory_disk(config);

        cache.set("a", num(1), None);
        cache.set("b", num(2), None);
        cache.set("c", num(3), None); // demotes a
        cache.set("d", num(4), None); // demotes b, dropping a from disk

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(num(2)));
        assert_eq!(cache.statistics().disk_capacity_drops, 1);
    }

    #[test]
    fn set_discards_stale_disk_copy() {
        let (_backend, cache) = with_memory_disk(two_entry_config(EvictionPolicy::Fifo));
        cache.set("a", num(1), None);
        cache.set("b", num(2), None);
        cache.set("c", num(3), None); // a now on disk

        cache.set("a", num(9), None);
        assert_eq!(cache.get("a"), Some(num(9)));
        assert_eq!(cache.snapshot().get("a"), Some(&num(9)));
    }

    #[test]
    fn remove_clears_both_tiers() {
        let (_backend, cache) = with_memory_disk(two_entry_config(EvictionPolicy::Fifo));
        cache.set("a", num(1), None);
        cache.set("b", num(2), None);
        cache.set("c", num(3), None);

        assert!(cache.remove("a"));
        assert!(cache.remove("b"));
        assert!(!cache.remove("zzz"));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clean_expired_sweeps_both_tiers() {
        let clock = Arc::new(ManualClock::new(0));
        let (_backend, cache) = with_memory_disk(two_entry_config(EvictionPolicy::Fifo));
        let cache = cache.with_clock(clock.clone());

        cache.set("a", num(1), Some(Duration::from_secs(1)));
        cache.set("b", num(2), Some(Duration::from_secs(1)));
        cache.set("c", num(3), None); // a demoted with its TTL

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.clean_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("c"));
    }

    #[test]
    fn contains_ignores_expired_disk_records() {
        let clock = Arc::new(ManualClock::new(0));
        let (_backend, cache) = with_memory_disk(two_entry_config(EvictionPolicy::Fifo));
        let cache = cache.with_clock(clock.clone());

        cache.set("a", num(1), Some(Duration::from_secs(1)));
        cache.set("b", num(2), None);
        cache.set("c", num(3), None); // a demoted with its TTL
        assert!(cache.contains("a"));

        clock.advance(Duration::from_secs(2));
        assert!(!cache.contains("a"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn journal_records_writes_but_not_capacity_churn() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = TieredCacheManager::new(two_entry_config(EvictionPolicy::Fifo))
            .unwrap()
            .with_clock(clock.clone());
        cache.set("e", num(0), None);
        cache.track_writes();

        cache.set("a", num(1), None);
        cache.set("b", num(2), None); // evicts e, no disk tier
        cache.set("c", num(3), Some(Duration::from_secs(1))); // evicts a
        cache.remove("e");
        cache.set_untracked("d", num(4), None); // evicts b
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get("c"), None);

        let writes = cache.take_writes();
        assert_eq!(
            writes,
            BTreeMap::from([
                ("a".to_string(), Some(num(1))),
                ("b".to_string(), Some(num(2))),
                ("c".to_string(), Some(num(3))),
                ("e".to_string(), None),
            ])
        );
        assert!(cache.take_writes().is_empty());

        cache.remove_untracked("d");
        assert!(cache.take_writes().is_empty());
        cache.set_untracked("f", num(5), None);
        cache.clear();
        let cleared: Vec<String> = cache.take_writes().into_keys().collect();
        assert_eq!(cleared, ["f"]);
    }

    #[test]
    fn snapshot_spans_tiers_without_touching_stats() {
        let (_backend, cache) = with_memory_disk(two_entry_config(EvictionPolicy::Fifo));
        cache.set("a", num(1), None);
        cache.set("b", num(2), None);
        cache.set("c", num(3), None);

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["a"], num(1));
        assert_eq!(cache.statistics().hit_count, 0);
    }

    #[test]
    fn hit_rate_tracks_lookups() {
        let cache = TieredCacheManager::new(CacheConfig::new(1024)).unwrap();
        assert_eq!(cache.statistics().hit_rate(), 0.0);

        cache.set("k", num(1), None);
        cache.get("k");
        cache.get("missing");
        assert_eq!(cache.statistics().hit_rate(), 0.5);
    }

    #[test]
    fn concurrent_set_and_get() {
        let cache = Arc::new(TieredCacheManager::new(CacheConfig::new(64)).unwrap());
        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..50u8 {
                        let key = format!("{t}:{i}");
                        cache.set(key.clone(), num(i), None);
                        let _ = cache.get(&key);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.statistics().memory_size_bytes <= 64);
    }
}
