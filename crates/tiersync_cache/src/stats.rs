//! Cache statistics.
//!
//! Counters are owned by the [`crate::TieredCacheManager`] and only move
//! forward. Callers get read-only [`CacheStatistics`] snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated by the manager.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    disk_capacity_drops: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disk_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_disk_drops(&self, count: u64) {
        self.disk_capacity_drops.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStatistics {
        CacheStatistics {
            hit_count: self.hits.load(Ordering::Relaxed),
            disk_hit_count: self.disk_hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            eviction_count: self.evictions.load(Ordering::Relaxed),
            expired_count: self.expirations.load(Ordering::Relaxed),
            disk_capacity_drops: self.disk_capacity_drops.load(Ordering::Relaxed),
            ..CacheStatistics::default()
        }
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheStatistics {
    /// Lookups answered from either tier.
    pub hit_count: u64,
    /// Lookups answered from the disk tier (included in `hit_count`).
    pub disk_hit_count: u64,
    /// Lookups answered by neither tier.
    pub miss_count: u64,
    /// Entries pushed out of memory by the eviction policy.
    pub eviction_count: u64,
    /// Entries removed because their TTL passed.
    pub expired_count: u64,
    /// Entries currently in memory.
    pub memory_entry_count: u64,
    /// Bytes currently charged in memory.
    pub memory_size_bytes: u64,
    /// Entries currently held by the disk tier.
    pub disk_entry_count: u64,
    /// Bytes currently charged on disk.
    pub disk_size_bytes: u64,
    /// Disk writes that failed since startup.
    pub disk_write_failures: u64,
    /// Records dropped from disk to respect its capacity.
    pub disk_capacity_drops: u64,
}

impl CacheStatistics {
    /// `hit_count / (hit_count + miss_count)`, or `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_zero_without_lookups() {
        assert_eq!(CacheStatistics::default().hit_rate(), 0.0);
    }

    #[test]
    fn hit_rate() {
        let counters = CacheCounters::default();
        counters.record_hit();
        counters.record_disk_hit();
        counters.record_hit();
        counters.record_miss();

        let stats = counters.snapshot();
        assert_eq!(stats.hit_count, 3);
        assert_eq!(stats.disk_hit_count, 1);
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let counters = Arc::new(CacheCounters::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..100 {
                        c.record_hit();
                        c.record_miss();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = counters.snapshot();
        assert_eq!(stats.hit_count, 800);
        assert_eq!(stats.miss_count, 800);
    }
}
