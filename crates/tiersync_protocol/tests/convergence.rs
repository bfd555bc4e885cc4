//! Two replicas exchanging deltas end up with the same state.

use proptest::prelude::*;
use std::collections::BTreeMap;
use tiersync_codec::Payload;
use tiersync_protocol::{
    ConflictDetector, ConflictResolver, Delta, DeltaCalculator, DeviceId, Resolution,
    ResolutionStrategy, Snapshot,
};

/// Applies `remote` on top of a replica that produced `local`, letting the
/// resolver settle the keys both touched.
fn reconcile(
    current: &Snapshot,
    local: &Delta,
    remote: &Delta,
    resolver: &ConflictResolver,
) -> Snapshot {
    let conflicts = ConflictDetector::new().detect(local, remote);
    let values = match resolver.resolve(&conflicts) {
        Resolution::Resolved { values, .. } => values,
        Resolution::Pending(_) => panic!("strategy must not defer"),
    };

    let mut next = current.clone();
    for (key, change) in remote.changes() {
        if values.contains_key(key) {
            continue;
        }
        match change {
            Some(value) => next.insert(key, value.clone()),
            None => {
                next.remove(key);
            }
        }
    }
    for (key, value) in values {
        match value {
            Some(value) => next.insert(key, value),
            None => {
                next.remove(&key);
            }
        }
    }
    next
}

fn edit(base: &Snapshot, edits: &BTreeMap<String, Option<Vec<u8>>>) -> Snapshot {
    let mut next = base.clone();
    for (key, value) in edits {
        match value {
            Some(bytes) => next.insert(key.clone(), Payload::binary(bytes.clone())),
            None => {
                next.remove(key);
            }
        }
    }
    next
}

#[test]
fn wire_roundtrip_preserves_conflict_outcome() {
    let a = DeviceId::random();
    let b = DeviceId::random();
    let base = Snapshot::from_entries([("k".to_string(), Payload::text("start"))].into());

    let mut on_a = base.clone();
    on_a.insert("k", Payload::text("A"));
    let mut on_b = base.clone();
    on_b.insert("k", Payload::text("B"));

    let delta_a = DeltaCalculator::new(a).compute(&base, &on_a, 10);
    let delta_b = DeltaCalculator::new(b).compute(&base, &on_b, 20);
    let received_b = Delta::decode(&delta_b.encode().unwrap()).unwrap();

    let resolver = ConflictResolver::default();
    let result = reconcile(&on_a, &delta_a, &received_b, &resolver);
    assert_eq!(result.get("k"), Some(&Payload::text("B")));
}

fn arb_edits() -> impl Strategy<Value = BTreeMap<String, Option<Vec<u8>>>> {
    prop::collection::btree_map(
        "[a-d]",
        prop::option::of(prop::collection::vec(any::<u8>(), 0..3)),
        0..4,
    )
}

proptest! {
    #[test]
    fn replicas_converge(
        base in prop::collection::btree_map("[a-d]", prop::collection::vec(any::<u8>(), 0..3), 0..4),
        edits_a in arb_edits(),
        edits_b in arb_edits(),
        ts_a in 0..3u64,
        ts_b in 0..3u64,
        merge in any::<bool>(),
    ) {
        let a = DeviceId::from_bytes([1; 16]);
        let b = DeviceId::from_bytes([2; 16]);
        let base = Snapshot::from_entries(
            base.into_iter().map(|(k, v)| (k, Payload::binary(v))).collect(),
        );
        let on_a = edit(&base, &edits_a);
        let on_b = edit(&base, &edits_b);

        let delta_a = DeltaCalculator::new(a).compute(&base, &on_a, ts_a);
        let delta_b = DeltaCalculator::new(b).compute(&base, &on_b, ts_b);

        let strategy = if merge { ResolutionStrategy::Merge } else { ResolutionStrategy::LastWriteWins };
        let resolver = ConflictResolver::new(strategy);

        let final_a = reconcile(&on_a, &delta_a, &delta_b, &resolver);
        let final_b = reconcile(&on_b, &delta_b, &delta_a, &resolver);
        prop_assert_eq!(final_a.entries(), final_b.entries());
    }
}
