//! Versioned snapshots of synchronized state.

use crate::delta::Delta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tiersync_codec::Payload;

/// A point-in-time mapping of every key to its value, plus the version it
/// was reached at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    version: u64,
    entries: BTreeMap<String, Payload>,
}

impl Snapshot {
    /// Creates an empty snapshot at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a version-0 snapshot holding `entries`.
    pub fn from_entries(entries: BTreeMap<String, Payload>) -> Self {
        Self {
            version: 0,
            entries,
        }
    }

    /// Returns a copy with the version set.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// The snapshot version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All entries in key order.
    pub fn entries(&self) -> &BTreeMap<String, Payload> {
        &self.entries
    }

    /// Consumes the snapshot, returning its entries.
    pub fn into_entries(self) -> BTreeMap<String, Payload> {
        self.entries
    }

    /// Looks up one key.
    pub fn get(&self, key: &str) -> Option<&Payload> {
        self.entries.get(key)
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Sets a single key without changing the version.
    pub fn insert(&mut self, key: impl Into<String>, value: Payload) {
        self.entries.insert(key.into(), value);
    }

    /// Removes a single key without changing the version.
    pub fn remove(&mut self, key: &str) -> Option<Payload> {
        self.entries.remove(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the snapshot holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies a delta.
    ///
    /// Added and modified keys are written, deleted keys removed, and the
    /// version moves to at least `base_version + 1`. Applying the same delta
    /// again leaves the snapshot unchanged.
    pub fn apply(&mut self, delta: &Delta) {
        for (key, change) in delta.changes() {
            match change {
                Some(value) => {
                    self.entries.insert(key.to_string(), value.clone());
                }
                None => {
                    self.entries.remove(key);
                }
            }
        }
        self.version = self.version.max(delta.base_version() + 1);
    }
}
