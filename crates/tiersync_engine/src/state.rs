//! Coordinator phases, per-device sync state and statistics.

use crate::error::{SyncError, SyncResult};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::time::Instant;
use tiersync_protocol::{Delta, DeviceId};

/// Phase of the coordinator's state machine.
///
/// ```text
/// Idle -> Syncing -> Reconciling -> Idle
///         Syncing -> Retrying -> Syncing
///                    Retrying -> Idle            (retries exhausted)
///         Reconciling -> ConflictPending -> Reconciling
///                        ConflictPending -> Syncing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// No sync in progress.
    Idle,
    /// Sending or receiving a delta.
    Syncing,
    /// Waiting out a backoff delay before the next attempt.
    Retrying,
    /// Applying a delta and settling conflicts.
    Reconciling,
    /// Manual conflicts wait for the caller.
    ConflictPending,
}

impl SyncPhase {
    /// Returns true if `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: SyncPhase) -> bool {
        use SyncPhase::*;
        matches!(
            (self, to),
            (Idle, Syncing)
                | (Syncing, Reconciling)
                | (Syncing, Retrying)
                | (Syncing, Idle)
                | (Syncing, ConflictPending)
                | (Retrying, Syncing)
                | (Retrying, Idle)
                | (Retrying, ConflictPending)
                | (Reconciling, Idle)
                | (Reconciling, ConflictPending)
                | (ConflictPending, Reconciling)
                | (ConflictPending, Syncing)
        )
    }

    /// Returns true if a new sync may start from this phase.
    pub fn can_start_sync(self) -> bool {
        matches!(self, SyncPhase::Idle | SyncPhase::ConflictPending)
    }

    /// Moves to `to`, or reports an illegal transition.
    pub(crate) fn transition(&mut self, to: SyncPhase) -> SyncResult<()> {
        if !self.can_transition_to(to) {
            return Err(SyncError::InvalidStateTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the coordinator tracks for one device.
///
/// For the local device, `pending_outbound_deltas` holds recorded deltas
/// that have not been sent yet and `last_synced_version` counts the ones
/// that have. For a peer, `last_synced_version` is the version reconciled
/// from it so far and `queued_inbound` holds deltas that arrived early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// The device.
    pub device_id: DeviceId,
    /// Version reconciled (peer) or acknowledged by the transport (local).
    pub last_synced_version: u64,
    /// Deltas waiting to be sent, oldest first.
    pub pending_outbound_deltas: VecDeque<Delta>,
    /// Keys with an unresolved manual conflict involving this device.
    pub pending_inbound_conflicts: BTreeSet<String>,
    /// Early deltas by base version, waiting for their predecessors.
    pub queued_inbound: BTreeMap<u64, Delta>,
}

impl SyncState {
    /// Creates the state for a newly registered device.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            last_synced_version: 0,
            pending_outbound_deltas: VecDeque::new(),
            pending_inbound_conflicts: BTreeSet::new(),
            queued_inbound: BTreeMap::new(),
        }
    }

    /// Returns true if nothing is queued in either direction and no
    /// conflict is pending.
    pub fn is_settled(&self) -> bool {
        self.pending_outbound_deltas.is_empty()
            && self.pending_inbound_conflicts.is_empty()
            && self.queued_inbound.is_empty()
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Sync cycles that completed (one per delta sent or reconciled).
    pub cycles_completed: u64,
    /// Deltas delivered by the transport.
    pub deltas_sent: u64,
    /// Remote deltas reconciled.
    pub deltas_received: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Conflicts handed to the caller under the manual strategy.
    pub conflicts_deferred: u64,
    /// Custom resolver failures.
    pub resolution_failures: u64,
    /// Inbound deltas that arrived ahead of their predecessors.
    pub ordering_violations: u64,
    /// Retries performed.
    pub retries: u64,
    /// Last completed cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Summary of one inbound reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Deltas applied, including queued ones unblocked by this delta.
    pub deltas_applied: usize,
    /// Keys written to or removed from the cache.
    pub keys_changed: usize,
    /// Conflicts detected.
    pub conflicts: usize,
    /// Conflicts deferred to the caller.
    pub deferred: usize,
}

impl ReconcileReport {
    pub(crate) fn absorb(&mut self, other: ReconcileReport) {
        self.deltas_applied += other.deltas_applied;
        self.keys_changed += other.keys_changed;
        self.conflicts += other.conflicts;
        self.deferred += other.deferred;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut phase = SyncPhase::Idle;
        phase.transition(SyncPhase::Syncing).unwrap();
        phase.transition(SyncPhase::Reconciling).unwrap();
        phase.transition(SyncPhase::Idle).unwrap();
        assert_eq!(phase, SyncPhase::Idle);
    }

    #[test]
    fn retry_loop_transitions() {
        let mut phase = SyncPhase::Syncing;
        phase.transition(SyncPhase::Retrying).unwrap();
        phase.transition(SyncPhase::Syncing).unwrap();
        phase.transition(SyncPhase::Retrying).unwrap();
        phase.transition(SyncPhase::Idle).unwrap();
    }

    #[test]
    fn manual_conflict_transitions() {
        let mut phase = SyncPhase::Reconciling;
        phase.transition(SyncPhase::ConflictPending).unwrap();
        assert!(phase.can_start_sync());
        phase.transition(SyncPhase::Reconciling).unwrap();
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut phase = SyncPhase::Idle;
        let err = phase.transition(SyncPhase::Reconciling).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidStateTransition {
                from: SyncPhase::Idle,
                to: SyncPhase::Reconciling
            }
        ));
        assert_eq!(phase, SyncPhase::Idle);
        assert!(!SyncPhase::Retrying.can_transition_to(SyncPhase::Reconciling));
        assert!(!SyncPhase::Syncing.can_start_sync());
    }

    #[test]
    fn new_state_is_settled() {
        let state = SyncState::new(DeviceId::from_bytes([1; 16]));
        assert_eq!(state.last_synced_version, 0);
        assert!(state.is_settled());
    }
}
