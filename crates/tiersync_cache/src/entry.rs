//! Cache entries and their bookkeeping metadata.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tiersync_codec::Payload;

/// A cached value with the metadata eviction policies rank on.
///
/// # Invariants
///
/// - `expires_at` is `None` or `>= created_at`
/// - `access_count` never decreases
/// - `insertion_sequence` is unique within one store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The entry key.
    pub key: String,
    /// The cached payload.
    pub value: Payload,
    /// When the value was last written (ms).
    pub created_at: u64,
    /// When the value expires (ms). `None` means never.
    pub expires_at: Option<u64>,
    /// When the value was last read or written (ms).
    pub last_accessed_at: u64,
    /// Number of reads served for this entry.
    pub access_count: u64,
    /// Order of first insertion, used by FIFO.
    pub insertion_sequence: u64,
    /// Bytes charged against capacity.
    pub size_bytes: u64,
}

impl CacheEntry {
    /// Creates a fresh entry written at `now`.
    pub fn new(
        key: impl Into<String>,
        value: Payload,
        ttl: Option<Duration>,
        now: u64,
        insertion_sequence: u64,
    ) -> Self {
        let key = key.into();
        let size_bytes = Self::charge(&key, &value);
        Self {
            key,
            value,
            created_at: now,
            expires_at: ttl.map(|ttl| now.saturating_add(ttl.as_millis() as u64)),
            last_accessed_at: now,
            access_count: 0,
            insertion_sequence,
            size_bytes,
        }
    }

    /// Bytes a key/value pair is charged for.
    pub fn charge(key: &str, value: &Payload) -> u64 {
        (key.len() + value.len()) as u64
    }

    /// Returns true if the entry has expired at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Replaces the value in place, keeping the insertion sequence and
    /// access history.
    pub fn overwrite(&mut self, value: Payload, ttl: Option<Duration>, now: u64) {
        self.size_bytes = Self::charge(&self.key, &value);
        self.value = value;
        self.created_at = now;
        self.expires_at = ttl.map(|ttl| now.saturating_add(ttl.as_millis() as u64));
        self.last_accessed_at = now;
    }

    /// Records a read at `now`.
    pub fn touch(&mut self, now: u64) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = now.max(self.last_accessed_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_window() {
        let entry = CacheEntry::new(
            "k",
            Payload::text("v"),
            Some(Duration::from_secs(1)),
            1_000,
            0,
        );
        assert_eq!(entry.expires_at, Some(2_000));
        assert!(!entry.is_expired(1_999));
        assert!(entry.is_expired(2_000));
    }

    #[test]
    fn no_ttl_never_expires() {
        let entry = CacheEntry::new("k", Payload::text("v"), None, 0, 0);
        assert!(!entry.is_expired(u64::MAX));
    }

    #[test]
    fn overwrite_keeps_sequence_and_history() {
        let mut entry = CacheEntry::new("key", Payload::text("old"), None, 10, 7);
        entry.touch(20);
        entry.overwrite(Payload::text("newer"), Some(Duration::from_millis(5)), 30);

        assert_eq!(entry.insertion_sequence, 7);
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.created_at, 30);
        assert_eq!(entry.expires_at, Some(35));
        assert_eq!(entry.size_bytes, 3 + 5);
    }
}
