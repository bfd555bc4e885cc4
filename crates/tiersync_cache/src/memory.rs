//! In-memory disk backend for testing.

use crate::backend::DiskBackend;
use crate::error::{CacheError, CacheResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A disk backend that keeps records in a map.
///
/// This backend is suitable for:
/// - Unit tests
/// - Simulating disk failures (see [`InMemoryBackend::fail_writes`])
/// - Ephemeral caches that don't need restart durability
///
/// # Example
///
/// ```rust
/// use tiersync_cache::{DiskBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.write("k", b"record").unwrap();
/// assert_eq!(backend.read("k").unwrap(), Some(b"record".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    records: RwLock<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with an I/O error (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns true if a record is stored for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.records.read().contains_key(key)
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl DiskBackend for InMemoryBackend {
    fn write(&self, key: &str, record: &[u8]) -> CacheResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        self.records.write().insert(key.to_string(), record.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        self.records.write().remove(key);
        Ok(())
    }

    fn load_all(&self) -> CacheResult<Vec<Vec<u8>>> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn clear(&self) -> CacheResult<()> {
        self.records.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_delete() {
        let backend = InMemoryBackend::new();
        backend.write("a", b"one").unwrap();
        assert_eq!(backend.read("a").unwrap(), Some(b"one".to_vec()));

        backend.write("a", b"two").unwrap();
        assert_eq!(backend.read("a").unwrap(), Some(b"two".to_vec()));

        backend.delete("a").unwrap();
        assert_eq!(backend.read("a").unwrap(), None);
        // Deleting again is fine.
        backend.delete("a").unwrap();
    }

    #[test]
    fn injected_failures() {
        let backend = InMemoryBackend::new();
        backend.fail_writes(true);
        assert!(matches!(backend.write("a", b"x"), Err(CacheError::Io(_))));
        assert!(!backend.contains("a"));

        backend.fail_writes(false);
        backend.write("a", b"x").unwrap();
        assert_eq!(backend.write_count(), 1);
    }

    #[test]
    fn load_and_clear() {
        let backend = InMemoryBackend::new();
        backend.write("a", b"1").unwrap();
        backend.write("b", b"2").unwrap();
        assert_eq!(backend.load_all().unwrap().len(), 2);

        backend.clear().unwrap();
        assert!(backend.is_empty());
    }
}
