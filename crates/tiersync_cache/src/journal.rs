//! Journal of committed writes.
//!
//! The sync layer needs to know what the application wrote, not what the
//! cache currently holds. Residency changes for capacity reasons (memory
//! eviction without a disk tier, disk FIFO drops, TTL expiry), and none of
//! that should reach peers as a deletion. The journal records only explicit
//! `set`, `remove` and `clear` calls.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tiersync_codec::Payload;

/// Coalesced log of explicit writes, keyed by cache key.
///
/// Each key keeps only its latest change: `Some(value)` for a write,
/// `None` for a removal. Nothing is kept until [`enable`](Self::enable) is
/// called, so a cache nobody syncs does not grow a log.
#[derive(Debug, Default)]
pub struct WriteJournal {
    enabled: AtomicBool,
    pending: Mutex<BTreeMap<String, Option<Payload>>>,
}

impl WriteJournal {
    /// Creates a disabled journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts recording.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Returns true once recording has started.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Records a write of `value` to `key`.
    pub fn record_set(&self, key: &str, value: &Payload) {
        if self.is_enabled() {
            self.pending
                .lock()
                .insert(key.to_string(), Some(value.clone()));
        }
    }

    /// Records a removal of `key`.
    pub fn record_remove(&self, key: &str) {
        if self.is_enabled() {
            self.pending.lock().insert(key.to_string(), None);
        }
    }

    /// Drains the recorded changes.
    pub fn take(&self) -> BTreeMap<String, Option<Payload>> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Number of keys with a recorded change.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
