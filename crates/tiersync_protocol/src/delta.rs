//! Deltas and delta computation.

use crate::device::DeviceId;
use crate::error::{ProtocolError, ProtocolResult};
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tiersync_codec::{from_cbor, to_cbor, Payload};

/// A structural diff between two snapshots.
///
/// # Invariants
///
/// - A key appears in at most one of `added`, `modified` and `deleted`.
///   The mutators keep this true; [`Delta::decode`] rejects input that
///   breaks it.
/// - `base_version` is the version of the snapshot the delta was computed
///   against. Applying it yields version `base_version + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    added: BTreeMap<String, Payload>,
    modified: BTreeMap<String, Payload>,
    deleted: BTreeSet<String>,
    base_version: u64,
    timestamp: u64,
    origin: DeviceId,
}

impl Delta {
    /// Creates an empty delta.
    pub fn new(origin: DeviceId, base_version: u64, timestamp: u64) -> Self {
        Self {
            added: BTreeMap::new(),
            modified: BTreeMap::new(),
            deleted: BTreeSet::new(),
            base_version,
            timestamp,
            origin,
        }
    }

    /// Records `key` as newly added.
    pub fn add(&mut self, key: impl Into<String>, value: Payload) {
        let key = key.into();
        self.forget(&key);
        self.added.insert(key, value);
    }

    /// Records `key` as changed.
    pub fn modify(&mut self, key: impl Into<String>, value: Payload) {
        let key = key.into();
        self.forget(&key);
        self.modified.insert(key, value);
    }

    /// Records `key` as deleted.
    pub fn delete(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.forget(&key);
        self.deleted.insert(key);
    }

    /// Drops every change recorded for `key`.
    pub fn forget(&mut self, key: &str) {
        self.added.remove(key);
        self.modified.remove(key);
        self.deleted.remove(key);
    }

    /// Keys added by this delta.
    pub fn added(&self) -> &BTreeMap<String, Payload> {
        &self.added
    }

    /// Keys whose value changed.
    pub fn modified(&self) -> &BTreeMap<String, Payload> {
        &self.modified
    }

    /// Keys removed by this delta.
    pub fn deleted(&self) -> &BTreeSet<String> {
        &self.deleted
    }

    /// The snapshot version this delta was computed against.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Unix milliseconds at which the delta was computed.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The device that produced the delta.
    pub fn origin(&self) -> DeviceId {
        self.origin
    }

    /// Returns what the delta does to `key`: `Some(Some(value))` if it sets
    /// the key, `Some(None)` if it deletes it, `None` if it leaves it alone.
    pub fn change_for(&self, key: &str) -> Option<Option<&Payload>> {
        if let Some(value) = self.added.get(key).or_else(|| self.modified.get(key)) {
            return Some(Some(value));
        }
        self.deleted.contains(key).then_some(None)
    }

    /// Iterates every change in key order. `None` marks a deletion.
    pub fn changes(&self) -> impl Iterator<Item = (&str, Option<&Payload>)> {
        let mut all: Vec<(&str, Option<&Payload>)> = self
            .added
            .iter()
            .chain(&self.modified)
            .map(|(k, v)| (k.as_str(), Some(v)))
            .chain(self.deleted.iter().map(|k| (k.as_str(), None)))
            .collect();
        all.sort_unstable_by(|a, b| a.0.cmp(b.0));
        all.into_iter()
    }

    /// Number of keys touched.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// Returns true if the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks the disjointness invariant.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::OverlappingKey`] naming the first key found
    /// in two change sets.
    pub fn validate(&self) -> ProtocolResult<()> {
        let overlap = |key: &String, first, second| ProtocolError::OverlappingKey {
            key: key.clone(),
            first,
            second,
        };
        for key in self.added.keys() {
            if self.modified.contains_key(key) {
                return Err(overlap(key, "added", "modified"));
            }
            if self.deleted.contains(key) {
                return Err(overlap(key, "added", "deleted"));
            }
        }
        for key in self.modified.keys() {
            if self.deleted.contains(key) {
                return Err(overlap(key, "modified", "deleted"));
            }
        }
        Ok(())
    }

    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    /// Decodes from CBOR and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a delta or the delta breaks
    /// the disjointness invariant.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let delta: Self = from_cbor(bytes)?;
        delta.validate()?;
        Ok(delta)
    }
}

/// Computes deltas between snapshots on behalf of one device.
#[derive(Debug, Clone, Copy)]
pub struct DeltaCalculator {
    origin: DeviceId,
}

impl DeltaCalculator {
    /// Creates a calculator stamping deltas with `origin`.
    pub fn new(origin: DeviceId) -> Self {
        Self { origin }
    }

    /// Diffs `old` against `new`.
    ///
    /// Values are compared byte for byte. The result has
    /// `base_version = old.version()`.
    pub fn compute(&self, old: &Snapshot, new: &Snapshot, timestamp: u64) -> Delta {
        let mut delta = Delta::new(self.origin, old.version(), timestamp);

        for (key, value) in new.entries() {
            match old.get(key) {
                None => {
                    delta.added.insert(key.clone(), value.clone());
                }
                Some(previous) if previous != value => {
                    delta.modified.insert(key.clone(), value.clone());
                }
                Some(_) => {}
            }
        }
        for key in old.entries().keys() {
            if !new.contains(key) {
                delta.deleted.insert(key.clone());
            }
        }
        delta
    }

    /// Builds the delta that takes `base` through `writes`.
    ///
    /// Each write is the latest change to its key (`None` removes it).
    /// Writes that leave `base` unchanged are left out.
    pub fn compute_writes(
        &self,
        base: &Snapshot,
        writes: &BTreeMap<String, Option<Payload>>,
        timestamp: u64,
    ) -> Delta {
        let mut delta = Delta::new(self.origin, base.version(), timestamp);

        for (key, write) in writes {
            match (base.get(key), write) {
                (None, Some(value)) => {
                    delta.added.insert(key.clone(), value.clone());
                }
                (Some(previous), Some(value)) if previous != value => {
                    delta.modified.insert(key.clone(), value.clone());
                }
                (Some(_), None) => {
                    delta.deleted.insert(key.clone());
                }
                _ => {}
            }
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn device() -> DeviceId {
        DeviceId::from_bytes([7; 16])
    }

    fn snapshot(pairs: &[(&str, &str)]) -> Snapshot {
        Snapshot::from_entries(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Payload::text(*v)))
                .collect(),
        )
    }

    #[test]
    fn compute_classifies_changes() {
        let old = snapshot(&[("keep", "1"), ("change", "1"), ("drop", "1")]);
        let new = snapshot(&[("keep", "1"), ("change", "2"), ("fresh", "1")]);

        let delta = DeltaCalculator::new(device()).compute(&old, &new, 42);

        assert_eq!(delta.added().keys().collect::<Vec<_>>(), ["fresh"]);
        assert_eq!(delta.modified()["change"], Payload::text("2"));
        assert!(delta.deleted().contains("drop"));
        assert_eq!(delta.len(), 3);
        assert_eq!(delta.timestamp(), 42);
        assert_eq!(delta.origin(), device());
    }

    #[test]
    fn kind_change_counts_as_modification() {
        let old = Snapshot::from_entries([("k".to_string(), Payload::text("1"))].into());
        let new = Snapshot::from_entries([("k".to_string(), Payload::binary(b"1".to_vec()))].into());
        let delta = DeltaCalculator::new(device()).compute(&old, &new, 0);
        assert!(delta.modified().contains_key("k"));
    }

    #[test]
    fn compute_writes_skips_no_ops() {
        let base = snapshot(&[("same", "1"), ("change", "1"), ("drop", "1")]);
        let writes: BTreeMap<String, Option<Payload>> = [
            ("same".to_string(), Some(Payload::text("1"))),
            ("change".to_string(), Some(Payload::text("2"))),
            ("drop".to_string(), None),
            ("fresh".to_string(), Some(Payload::text("1"))),
            ("never_held".to_string(), None),
        ]
        .into();

        let delta = DeltaCalculator::new(device()).compute_writes(&base, &writes, 7);

        assert_eq!(delta.added().keys().collect::<Vec<_>>(), ["fresh"]);
        assert_eq!(delta.modified().keys().collect::<Vec<_>>(), ["change"]);
        assert_eq!(delta.deleted().iter().collect::<Vec<_>>(), ["drop"]);
        assert_eq!(delta.base_version(), base.version());
    }

    #[test]
    fn mutators_keep_sets_disjoint() {
        let mut delta = Delta::new(device(), 0, 0);
        delta.add("k", Payload::text("a"));
        delta.modify("k", Payload::text("b"));
        delta.delete("k");

        assert!(delta.added().is_empty());
        assert!(delta.modified().is_empty());
        assert_eq!(delta.change_for("k"), Some(None));
        assert!(delta.validate().is_ok());
    }

    #[test]
    fn decode_rejects_overlap() {
        let mut delta = Delta::new(device(), 3, 9);
        delta.add("k", Payload::text("a"));
        delta.deleted.insert("k".into());

        let bytes = delta.encode().unwrap();
        assert!(matches!(
            Delta::decode(&bytes),
            Err(ProtocolError::OverlappingKey { .. })
        ));
    }

    #[test]
    fn encode_decode() {
        let mut delta = Delta::new(device(), 3, 9);
        delta.add("a", Payload::text("1"));
        delta.modify("m", Payload::binary(vec![1, 2]));
        delta.delete("d");

        let decoded = Delta::decode(&delta.encode().unwrap()).unwrap();
        assert_eq!(decoded, delta);
    }

    #[test]
    fn changes_are_sorted() {
        let mut delta = Delta::new(device(), 0, 0);
        delta.delete("c");
        delta.modify("b", Payload::text("2"));
        delta.add("a", Payload::text("1"));

        let keys: Vec<&str> = delta.changes().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
        prop::collection::btree_map("[a-e]", prop::collection::vec(any::<u8>(), 0..4), 0..6)
            .prop_map(|map| {
                Snapshot::from_entries(
                    map.into_iter()
                        .map(|(k, v)| (k, Payload::binary(v)))
                        .collect(),
                )
            })
    }

    proptest! {
        #[test]
        fn no_op_delta_is_empty(s in arb_snapshot()) {
            let delta = DeltaCalculator::new(device()).compute(&s, &s, 0);
            prop_assert!(delta.is_empty());
        }

        #[test]
        fn applying_computed_delta_reaches_target(old in arb_snapshot(), new in arb_snapshot()) {
            let delta = DeltaCalculator::new(device()).compute(&old, &new, 0);
            prop_assert!(delta.validate().is_ok());

            let mut applied = old.clone();
            applied.apply(&delta);
            prop_assert_eq!(applied.entries(), new.entries());
        }
    }
}
