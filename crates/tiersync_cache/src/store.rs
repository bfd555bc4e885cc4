//! In-memory entry table (the L1 tier).

use crate::entry::CacheEntry;
use crate::policy::EvictionPolicy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tiersync_codec::Payload;

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The key is present and live.
    Hit(Payload),
    /// The key was present but had expired; it has been removed.
    Expired,
    /// The key is not present.
    Miss,
}

impl Lookup {
    /// Returns the payload on a hit.
    pub fn into_value(self) -> Option<Payload> {
        match self {
            Lookup::Hit(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Table {
    entries: HashMap<String, CacheEntry>,
    next_sequence: u64,
    size_bytes: u64,
}

impl Table {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.size_bytes -= entry.size_bytes;
        Some(entry)
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.size_bytes += entry.size_bytes;
        if let Some(old) = self.entries.insert(entry.key.clone(), entry) {
            self.size_bytes -= old.size_bytes;
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    fn evict(&mut self, policy: EvictionPolicy, capacity: u64) -> Vec<CacheEntry> {
        if self.size_bytes <= capacity {
            return Vec::new();
        }
        let excess = self.size_bytes - capacity;
        let victims: Vec<String> = policy
            .select_victims(self.entries.values(), excess)
            .into_iter()
            .map(str::to_owned)
            .collect();
        victims
            .iter()
            .filter_map(|key| self.remove(key))
            .collect()
    }
}

/// A point-in-time copy of the store's entries.
///
/// The snapshot is finite and can be iterated any number of times; later
/// writes to the store do not show up in it.
#[derive(Debug, Clone, Default)]
pub struct EntrySnapshot {
    entries: Arc<[CacheEntry]>,
}

impl EntrySnapshot {
    /// Iterates over the captured entries.
    pub fn iter(&self) -> std::slice::Iter<'_, CacheEntry> {
        self.entries.iter()
    }

    /// Number of captured entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a EntrySnapshot {
    type Item = &'a CacheEntry;
    type IntoIter = std::slice::Iter<'a, CacheEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Thread-safe key/value table holding cache entries and their metadata.
///
/// All operations take a single lock for a short, non-blocking critical
/// section. Expired entries are only discovered when touched (or by an
/// explicit [`EntryStore::remove_expired`] sweep).
#[derive(Debug, Default)]
pub struct EntryStore {
    table: Mutex<Table>,
}

impl EntryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a value.
    ///
    /// Overwriting keeps the entry's insertion sequence and access history.
    pub fn set(&self, key: impl Into<String>, value: Payload, ttl: Option<Duration>, now: u64) {
        let key = key.into();
        let mut table = self.table.lock();
        Self::upsert(&mut table, key, value, ttl, now);
    }

    fn upsert(table: &mut Table, key: String, value: Payload, ttl: Option<Duration>, now: u64) {
        let entry = match table.remove(&key) {
            Some(mut existing) => {
                existing.overwrite(value, ttl, now);
                existing
            }
            None => {
                let seq = table.next_sequence();
                CacheEntry::new(key, value, ttl, now, seq)
            }
        };
        table.insert(entry);
    }

    /// Writes a value and, if the store is now above `capacity` bytes,
    /// evicts a batch chosen by `policy` in the same critical section.
    ///
    /// Returns the evicted entries in eviction order.
    pub fn set_and_evict(
        &self,
        key: impl Into<String>,
        value: Payload,
        ttl: Option<Duration>,
        now: u64,
        policy: EvictionPolicy,
        capacity: u64,
    ) -> Vec<CacheEntry> {
        let key = key.into();
        let mut table = self.table.lock();
        Self::upsert(&mut table, key, value, ttl, now);
        table.evict(policy, capacity)
    }

    /// Re-admits an entry that came from another tier, recording the access
    /// at `now` and assigning it a fresh insertion sequence.
    ///
    /// Returns the entries evicted to stay under `capacity`.
    pub fn promote(
        &self,
        mut entry: CacheEntry,
        now: u64,
        policy: EvictionPolicy,
        capacity: u64,
    ) -> Vec<CacheEntry> {
        let mut table = self.table.lock();
        entry.insertion_sequence = table.next_sequence();
        entry.touch(now);
        table.remove(&entry.key);
        table.insert(entry);
        table.evict(policy, capacity)
    }

    /// Reads a value, recording the access.
    ///
    /// An expired entry is removed and reported as [`Lookup::Expired`].
    pub fn get(&self, key: &str, now: u64) -> Lookup {
        let mut table = self.table.lock();
        match table.entries.get_mut(key) {
            None => return Lookup::Miss,
            Some(entry) if !entry.is_expired(now) => {
                entry.touch(now);
                return Lookup::Hit(entry.value.clone());
            }
            Some(_) => {}
        }
        table.remove(key);
        Lookup::Expired
    }

    /// Returns a copy of the entry without recording an access.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.table.lock().entries.get(key).cloned()
    }

    /// Removes a key. Returns true if it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.table.lock().remove(key).is_some()
    }

    /// Removes every entry that has expired at `now`, returning their keys.
    pub fn remove_expired(&self, now: u64) -> Vec<String> {
        let mut table = self.table.lock();
        let expired: Vec<String> = table
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key.clone())
            .collect();
        for key in &expired {
            table.remove(key);
        }
        expired
    }

    /// Captures all entries as they are now.
    pub fn entries(&self) -> EntrySnapshot {
        let table = self.table.lock();
        EntrySnapshot {
            entries: table.entries.values().cloned().collect(),
        }
    }

    /// Total bytes charged by the stored entries.
    pub fn size_bytes(&self) -> u64 {
        self.table.lock().size_bytes
    }

    /// Number of stored entries, including not-yet-discovered expired ones.
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes everything.
    pub fn clear(&self) {
        let mut table = self.table.lock();
        table.entries.clear();
        table.size_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Payload {
        Payload::text(s)
    }

    #[test]
    fn set_then_get() {
        let store = EntryStore::new();
        store.set("a", text("1"), None, 0);
        assert_eq!(store.get("a", 1), Lookup::Hit(text("1")));
        assert_eq!(store.get("missing", 1), Lookup::Miss);
    }

    #[test]
    fn expired_entries_are_removed_on_access() {
        let store = EntryStore::new();
        store.set("x", text("v1"), Some(Duration::from_secs(1)), 0);

        assert_eq!(store.get("x", 2_000), Lookup::Expired);
        assert_eq!(store.len(), 0);
        assert_eq!(store.get("x", 2_000), Lookup::Miss);
    }

    #[test]
    fn get_updates_access_metadata() {
        let store = EntryStore::new();
        store.set("a", text("1"), None, 10);
        store.get("a", 20);
        store.get("a", 30);

        let entry = store.peek("a").unwrap();
        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.last_accessed_at, 30);
    }

    #[test]
    fn overwrite_replaces_value_and_adjusts_size() {
        let store = EntryStore::new();
        store.set("k", text("short"), None, 0);
        let seq = store.peek("k").unwrap().insertion_sequence;
        store.set("k", text("much longer"), None, 5);

        let entry = store.peek("k").unwrap();
        assert_eq!(entry.value, text("much longer"));
        assert_eq!(entry.insertion_sequence, seq);
        assert_eq!(entry.created_at, 5);
        assert_eq!(store.size_bytes(), 1 + 11);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let store = EntryStore::new();
        store.set("a", text("1"), None, 0);
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert_eq!(store.size_bytes(), 0);
    }

    #[test]
    fn snapshot_is_stable_and_restartable() {
        let store = EntryStore::new();
        store.set("a", text("1"), None, 0);
        store.set("b", text("2"), None, 0);

        let snapshot = store.entries();
        store.set("c", text("3"), None, 0);
        store.remove("a");

        assert_eq!(snapshot.len(), 2);
        let first: Vec<_> = snapshot.iter().map(|e| e.key.clone()).collect();
        let second: Vec<_> = snapshot.iter().map(|e| e.key.clone()).collect();
        assert_eq!(first, second);
        assert!(first.contains(&"a".to_string()));
    }

    #[test]
    fn set_and_evict_uses_policy() {
        let store = EntryStore::new();
        // Each entry charges 2 bytes.
        store.set_and_evict("a", text("1"), None, 0, EvictionPolicy::Fifo, 4);
        store.set_and_evict("b", text("2"), None, 1, EvictionPolicy::Fifo, 4);
        let evicted = store.set_and_evict("c", text("3"), None, 2, EvictionPolicy::Fifo, 4);

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, "a");
        assert_eq!(store.size_bytes(), 4);
    }

    #[test]
    fn promote_assigns_fresh_sequence() {
        let store = EntryStore::new();
        store.set("a", text("1"), None, 0);
        let outsider = CacheEntry::new("z", text("9"), None, 0, 0);

        store.promote(outsider, 50, EvictionPolicy::Lru, u64::MAX);
        let promoted = store.peek("z").unwrap();
        assert_eq!(promoted.insertion_sequence, 1);
        assert_eq!(promoted.access_count, 1);
        assert_eq!(promoted.last_accessed_at, 50);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let store = EntryStore::new();
        store.set("short", text("1"), Some(Duration::from_millis(10)), 0);
        store.set("long", text("2"), Some(Duration::from_secs(10)), 0);
        store.set("forever", text("3"), None, 0);

        let removed = store.remove_expired(100);
        assert_eq!(removed, vec!["short".to_string()]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn concurrent_writers() {
        let store = Arc::new(EntryStore::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.set(format!("{t}-{i}"), Payload::binary(vec![0u8; 8]), None, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 400);
    }
}
