//! The sync coordinator.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::pipeline::OutboundPipeline;
use crate::state::{ReconcileReport, SyncPhase, SyncState, SyncStats};
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tiersync_cache::TieredCacheManager;
use tiersync_codec::Payload;
use tiersync_protocol::{
    Conflict, ConflictDetector, ConflictResolver, Delta, DeltaCalculator, DeviceId, Resolution,
    ResolutionFailure, Snapshot,
};
use tokio::sync::{mpsc, Notify};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

struct Inner {
    phase: SyncPhase,
    /// What peers will know about local state once every pending outbound
    /// delta is delivered.
    baseline: Snapshot,
    devices: HashMap<DeviceId, SyncState>,
    /// Local writes not yet recorded in a delta, latest change per key.
    unrecorded: BTreeMap<String, Option<Payload>>,
    /// Manual conflicts awaiting the caller, by key.
    conflicts: BTreeMap<String, Conflict>,
    /// Who wrote the value currently held for each key, and when.
    stamps: HashMap<String, Stamp>,
    /// Newest timestamp seen from any device.
    observed: u64,
}

type Stamp = (u64, DeviceId);

impl Inner {
    fn rest_phase(&self) -> SyncPhase {
        if self.conflicts.is_empty() {
            SyncPhase::Idle
        } else {
            SyncPhase::ConflictPending
        }
    }

    /// Timestamp for a local change: wall clock, but never behind anything
    /// already observed.
    fn next_timestamp(&self, now: u64) -> u64 {
        now.max(self.observed.saturating_add(1))
    }

    fn is_stale(&self, key: &str, stamp: Stamp) -> bool {
        self.stamps.get(key).is_some_and(|held| *held > stamp)
    }

    /// Queues `key = value` for the next recorded delta, which skips it if
    /// peers already hold that value.
    fn reannounce(&mut self, key: &str, value: Option<Payload>) {
        self.unrecorded.insert(key.to_string(), value);
    }

    fn forget_outbound(&mut self, local: DeviceId, key: &str) {
        if let Some(state) = self.devices.get_mut(&local) {
            for delta in state.pending_outbound_deltas.iter_mut() {
                delta.forget(key);
            }
        }
    }
}

fn newest(conflict: &Conflict) -> Stamp {
    let local = (conflict.local_timestamp, conflict.local_origin);
    let remote = (conflict.remote_timestamp, conflict.remote_origin);
    local.max(remote)
}

fn set_baseline(baseline: &mut Snapshot, key: &str, value: Option<&Payload>) {
    match value {
        Some(value) => baseline.insert(key, value.clone()),
        None => {
            baseline.remove(key);
        }
    }
}

/// Drives delta sync between this device's cache and its peers.
///
/// Local writes go straight to the [`TieredCacheManager`], which journals
/// them. The coordinator turns the journaled writes into a delta against
/// what it has already announced
/// ([`record_local_changes`](Self::record_local_changes)), queues it, and
/// sends queued deltas in order
/// ([`push_pending`](Self::push_pending)). Remote deltas come in through
/// [`receive`](Self::receive) or the [`run`](Self::run) loop, are checked
/// against local changes the peer has not seen, and the outcome is written
/// back into the cache.
///
/// # Ordering
///
/// Deltas from each peer must arrive contiguously: a delta's
/// `base_version` must equal the version already reconciled from that
/// peer. A delta from the future is queued and applied once the gap fills;
/// a replayed one is ignored. A peer that has synced before this
/// coordinator knew it is registered with
/// [`register_device_at`](Self::register_device_at).
///
/// Only explicit writes are synced. Entries the cache evicts or lets
/// expire stay on peers.
///
/// Every key remembers the timestamp and device of the value it holds.
/// A remote change older than that is stale and dropped, so deltas that
/// cross in flight still converge. Local timestamps never fall behind the
/// newest one observed.
///
/// # Ownership
///
/// A coordinator assumes it is the only sync writer of its cache. Two
/// coordinators must not share one `TieredCacheManager` unless the
/// application serializes them externally; nothing checks this at runtime.
///
/// # Concurrency
///
/// Sends and reconciles are serialized by an async gate, so one sync step
/// runs at a time. Recording local changes, reading state and submitting
/// manual resolutions never wait on the transport.
pub struct SyncCoordinator<T: SyncTransport> {
    config: SyncConfig,
    cache: Arc<TieredCacheManager>,
    transport: T,
    calculator: DeltaCalculator,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    pipeline: OutboundPipeline,
    inner: Mutex<Inner>,
    gate: tokio::sync::Mutex<()>,
    stats: RwLock<SyncStats>,
    shutdown: Notify,
    stopped: AtomicBool,
}

impl<T: SyncTransport> SyncCoordinator<T> {
    /// Creates a coordinator for the local device named in `config`.
    ///
    /// Turns on write journaling in `cache`. Writes made before this call
    /// are not announced.
    pub fn new(config: SyncConfig, cache: Arc<TieredCacheManager>, transport: T) -> Self {
        let local = config.device_id;
        cache.track_writes();
        let mut devices = HashMap::new();
        devices.insert(local, SyncState::new(local));

        Self {
            calculator: DeltaCalculator::new(local),
            detector: ConflictDetector::new(),
            resolver: ConflictResolver::new(config.strategy.clone()),
            pipeline: OutboundPipeline::new(),
            inner: Mutex::new(Inner {
                phase: SyncPhase::Idle,
                baseline: Snapshot::new(),
                devices,
                unrecorded: BTreeMap::new(),
                conflicts: BTreeMap::new(),
                stamps: HashMap::new(),
                observed: 0,
            }),
            gate: tokio::sync::Mutex::new(()),
            stats: RwLock::new(SyncStats::default()),
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
            config,
            cache,
            transport,
        }
    }

    /// Sets the transforms applied to every outbound delta.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: OutboundPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// The local device id.
    pub fn local_device(&self) -> DeviceId {
        self.config.device_id
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The cache this coordinator syncs.
    pub fn cache(&self) -> &Arc<TieredCacheManager> {
        &self.cache
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.inner.lock().phase
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Starts tracking a peer from its first delta. Returns false if it was
    /// already registered.
    pub fn register_device(&self, device: DeviceId) -> bool {
        self.register_device_at(device, 0)
    }

    /// Starts tracking a peer whose deltas up to `version` were already
    /// reconciled, e.g. the `last_synced_version` returned by
    /// [`unregister_device`](Self::unregister_device). The next delta
    /// accepted from it has `base_version == version`.
    ///
    /// Returns false if the device was already registered.
    pub fn register_device_at(&self, device: DeviceId, version: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.devices.contains_key(&device) {
            return false;
        }
        let mut state = SyncState::new(device);
        state.last_synced_version = version;
        inner.devices.insert(device, state);
        info!(device = %device, version, "device registered");
        true
    }

    /// Stops tracking a peer and returns its final state.
    ///
    /// Manual conflicts raised by the peer are dropped, keeping the local
    /// value. The local device cannot be unregistered.
    pub fn unregister_device(&self, device: DeviceId) -> Option<SyncState> {
        if device == self.config.device_id {
            return None;
        }
        let mut inner = self.inner.lock();
        let state = inner.devices.remove(&device)?;
        let dropped: Vec<Conflict> = inner
            .conflicts
            .values()
            .filter(|conflict| conflict.remote_origin == device)
            .cloned()
            .collect();
        for conflict in dropped {
            inner.conflicts.remove(&conflict.key);
            inner
                .unrecorded
                .entry(conflict.key)
                .or_insert(conflict.local_value);
        }
        let Inner {
            devices, conflicts, ..
        } = &mut *inner;
        for state in devices.values_mut() {
            state
                .pending_inbound_conflicts
                .retain(|key| conflicts.contains_key(key));
        }
        if inner.phase == SyncPhase::ConflictPending && inner.conflicts.is_empty() {
            // ConflictPending -> Reconciling -> Idle is always legal.
            let _ = inner.phase.transition(SyncPhase::Reconciling);
            let _ = inner.phase.transition(SyncPhase::Idle);
        }
        info!(device = %device, "device unregistered");
        Some(state)
    }

    /// Returns a copy of the state tracked for `device`.
    pub fn sync_state(&self, device: DeviceId) -> Option<SyncState> {
        self.inner.lock().devices.get(&device).cloned()
    }

    /// Returns copies of every tracked device's state.
    pub fn sync_states(&self) -> Vec<SyncState> {
        let mut states: Vec<SyncState> = self.inner.lock().devices.values().cloned().collect();
        states.sort_by_key(|state| state.device_id);
        states
    }

    /// Manual conflicts waiting for [`submit_resolution`](Self::submit_resolution).
    pub fn pending_conflicts(&self) -> Vec<Conflict> {
        self.inner.lock().conflicts.values().cloned().collect()
    }

    fn ensure_running(&self) -> SyncResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SyncError::Shutdown);
        }
        Ok(())
    }

    fn transition(&self, to: SyncPhase) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        let from = inner.phase;
        inner.phase.transition(to)?;
        debug!(from = %from, to = %to, "sync phase changed");
        Ok(())
    }

    /// Returns to `Idle`, or `ConflictPending` if manual conflicts remain.
    fn settle(&self) -> SyncResult<()> {
        let rest = self.inner.lock().rest_phase();
        if self.phase() == rest {
            return Ok(());
        }
        self.transition(rest)
    }

    fn record_error(&self, error: &SyncError) {
        self.stats.write().last_error = Some(error.to_string());
    }

    fn record_cycle(&self, update: impl FnOnce(&mut SyncStats)) {
        let mut stats = self.stats.write();
        update(&mut stats);
        stats.cycles_completed += 1;
        stats.last_sync_time = Some(Instant::now());
    }

    /// Collects the writes the cache journaled since the last call and
    /// queues them as a delta for sending.
    ///
    /// Writes that leave a key as peers already know it are dropped. Keys
    /// with a pending manual conflict are held back until it is resolved.
    /// Returns the queued delta, or `None` if nothing changed. Never waits
    /// on a sync in progress.
    pub fn record_local_changes(&self) -> SyncResult<Option<Delta>> {
        self.ensure_running()?;
        let now = self.cache.now_millis();
        let local = self.config.device_id;

        let mut inner = self.inner.lock();
        self.absorb_writes(&mut inner);
        let timestamp = inner.next_timestamp(now);
        let mut delta =
            self.calculator
                .compute_writes(&inner.baseline, &inner.unrecorded, timestamp);
        let Inner {
            unrecorded,
            conflicts,
            ..
        } = &mut *inner;
        unrecorded.retain(|key, _| conflicts.contains_key(key));
        for key in conflicts.keys() {
            delta.forget(key);
        }
        if delta.is_empty() {
            return Ok(None);
        }

        inner.baseline.apply(&delta);
        for (key, _) in delta.changes() {
            inner.stamps.insert(key.to_string(), (timestamp, local));
        }
        inner.observed = inner.observed.max(timestamp);
        let state = inner
            .devices
            .get_mut(&local)
            .ok_or(SyncError::UnknownDevice(local))?;
        state.pending_outbound_deltas.push_back(delta.clone());
        debug!(
            base_version = delta.base_version(),
            keys = delta.len(),
            queued = state.pending_outbound_deltas.len(),
            "local changes recorded"
        );
        Ok(Some(delta))
    }

    /// Sends queued deltas in order.
    ///
    /// Each send gets the configured timeout and retry schedule. Returns how
    /// many deltas were delivered.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::RetriesExhausted`] once retries run out, or the
    /// first non-retryable error. The undelivered delta stays queued.
    pub async fn push_pending(&self) -> SyncResult<usize> {
        self.ensure_running()?;
        let _gate = self.gate.lock().await;
        let local = self.config.device_id;
        let mut sent = 0;

        loop {
            let delta = {
                let inner = self.inner.lock();
                match inner
                    .devices
                    .get(&local)
                    .and_then(|state| state.pending_outbound_deltas.front())
                {
                    Some(delta) => delta.clone(),
                    None => break,
                }
            };

            self.transition(SyncPhase::Syncing)?;
            if let Err(e) = self.send_with_retry(&delta).await {
                warn!(base_version = delta.base_version(), error = %e, "delta not delivered");
                self.record_error(&e);
                self.settle()?;
                return Err(e);
            }

            self.transition(SyncPhase::Reconciling)?;
            {
                let mut inner = self.inner.lock();
                if let Some(state) = inner.devices.get_mut(&local) {
                    state.pending_outbound_deltas.pop_front();
                    state.last_synced_version = delta.base_version() + 1;
                }
            }
            self.record_cycle(|stats| stats.deltas_sent += 1);
            self.settle()?;
            sent += 1;
        }

        if sent > 0 {
            debug!(sent, "outbound queue drained");
        }
        Ok(sent)
    }

    async fn send_with_retry(&self, delta: &Delta) -> SyncResult<()> {
        let outgoing = self.pipeline.apply(delta.clone())?;
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let mut last = SyncError::Timeout;

        for attempt in 1..=attempts {
            let result =
                match tokio::time::timeout(self.config.timeout, self.transport.send(&outgoing)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout),
                };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    self.transition(SyncPhase::Retrying)?;
                    debug!(attempt, error = %e, "send failed");
                    last = e;
                    if attempt < attempts {
                        let delay = retry.delay_for_attempt(attempt);
                        warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying delta send");
                        tokio::time::sleep(delay).await;
                        self.stats.write().retries += 1;
                        self.transition(SyncPhase::Syncing)?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(SyncError::RetriesExhausted {
            attempts,
            last: Box::new(last),
        })
    }

    /// Records local changes, then sends everything queued.
    ///
    /// # Errors
    ///
    /// See [`push_pending`](Self::push_pending).
    pub async fn sync_local(&self) -> SyncResult<usize> {
        self.record_local_changes()?;
        self.push_pending().await
    }

    /// Reconciles a delta from a peer.
    ///
    /// If this delta fills a gap, queued successors are applied too.
    ///
    /// # Errors
    ///
    /// - [`SyncError::UnknownDevice`] if the origin is not registered
    /// - [`SyncError::OrderingViolation`] if predecessors are missing; the
    ///   delta is queued, not dropped
    /// - [`SyncError::ConflictResolution`] if a custom resolver failed; the
    ///   delta was still applied, with last-write-wins for the failed keys
    pub async fn receive(&self, delta: Delta) -> SyncResult<ReconcileReport> {
        self.ensure_running()?;
        delta.validate()?;
        let _gate = self.gate.lock().await;

        let origin = delta.origin();
        if origin == self.config.device_id {
            debug!("ignoring own delta");
            return Ok(ReconcileReport::default());
        }

        {
            let mut inner = self.inner.lock();
            let state = inner
                .devices
                .get_mut(&origin)
                .ok_or(SyncError::UnknownDevice(origin))?;
            let expected = state.last_synced_version;
            let base_version = delta.base_version();

            if base_version < expected {
                debug!(device = %origin, base_version, expected, "ignoring replayed delta");
                return Ok(ReconcileReport::default());
            }
            if base_version > expected {
                if state.queued_inbound.len() < self.config.max_queued_inbound
                    || state.queued_inbound.contains_key(&base_version)
                {
                    warn!(device = %origin, base_version, expected, "delta arrived early, queued");
                    state.queued_inbound.insert(base_version, delta);
                } else {
                    warn!(
                        device = %origin,
                        base_version,
                        expected,
                        limit = self.config.max_queued_inbound,
                        "inbound queue full, early delta dropped"
                    );
                }
                drop(inner);
                self.stats.write().ordering_violations += 1;
                return Err(SyncError::OrderingViolation {
                    device: origin,
                    base_version,
                    expected,
                });
            }
        }

        let mut report = ReconcileReport::default();
        let mut first_failure: Option<ResolutionFailure> = None;
        let mut next = Some(delta);

        while let Some(delta) = next {
            match self.reconcile(&delta) {
                Ok((applied, failure)) => {
                    report.absorb(applied);
                    if first_failure.is_none() {
                        first_failure = failure;
                    }
                }
                Err(e) => {
                    self.record_error(&e);
                    return Err(e);
                }
            }

            let mut inner = self.inner.lock();
            next = inner.devices.get_mut(&origin).and_then(|state| {
                let version = state.last_synced_version;
                state.queued_inbound.retain(|base, _| *base >= version);
                state.queued_inbound.remove(&version)
            });
        }

        if let Some(failure) = first_failure {
            self.stats.write().resolution_failures += 1;
            let err = SyncError::from(failure);
            self.record_error(&err);
            return Err(err);
        }
        Ok(report)
    }

    fn absorb_writes(&self, inner: &mut Inner) {
        inner.unrecorded.extend(self.cache.take_writes());
    }

    /// Net local changes the peers have not seen: queued deltas plus
    /// anything not yet recorded.
    fn local_changes(&self, inner: &Inner, now: u64) -> Delta {
        let local = self.config.device_id;
        let now = inner.next_timestamp(now);
        let unrecorded = self
            .calculator
            .compute_writes(&inner.baseline, &inner.unrecorded, now);
        let pending = inner
            .devices
            .get(&local)
            .map(|state| &state.pending_outbound_deltas);

        let timestamp = if !unrecorded.is_empty() {
            now
        } else {
            pending
                .and_then(|deltas| deltas.back())
                .map_or(now, Delta::timestamp)
        };

        let mut changes = Delta::new(local, inner.baseline.version(), timestamp);
        let queued = pending.into_iter().flatten();
        for delta in queued.chain(std::iter::once(&unrecorded)) {
            for (key, change) in delta.changes() {
                match change {
                    Some(value) => changes.modify(key, value.clone()),
                    None => changes.delete(key),
                }
            }
        }
        changes
    }

    /// Writes a sync outcome into the cache without journaling it.
    fn write_cache(&self, key: &str, value: Option<&Payload>) {
        match value {
            Some(value) => self.cache.set_untracked(key, value.clone(), None),
            None => {
                self.cache.remove_untracked(key);
            }
        }
    }

    fn reconcile(
        &self,
        remote: &Delta,
    ) -> SyncResult<(ReconcileReport, Option<ResolutionFailure>)> {
        self.transition(SyncPhase::Syncing)?;
        self.transition(SyncPhase::Reconciling)?;

        let now = self.cache.now_millis();
        let local = self.config.device_id;
        let origin = remote.origin();
        let stamp: Stamp = (remote.timestamp(), origin);
        let mut report = ReconcileReport {
            deltas_applied: 1,
            ..ReconcileReport::default()
        };

        let failure = {
            let mut inner = self.inner.lock();
            self.absorb_writes(&mut inner);
            let mut incoming = remote.clone();

            // Keys already waiting on the caller absorb the new remote side.
            let waiting: Vec<String> = remote
                .changes()
                .filter(|(key, _)| inner.conflicts.contains_key(*key))
                .map(|(key, _)| key.to_string())
                .collect();
            for key in &waiting {
                let change = remote.change_for(key).flatten().cloned();
                set_baseline(&mut inner.baseline, key, change.as_ref());
                if let Some(conflict) = inner.conflicts.get_mut(key) {
                    conflict.remote_value = change;
                    conflict.remote_timestamp = remote.timestamp();
                    conflict.remote_origin = origin;
                }
                let held = inner.stamps.get(key).copied();
                inner.stamps.insert(key.clone(), held.map_or(stamp, |h| h.max(stamp)));
                if let Some(state) = inner.devices.get_mut(&origin) {
                    state.pending_inbound_conflicts.insert(key.clone());
                }
                incoming.forget(key);
                report.deferred += 1;
            }

            let local_changes = self.local_changes(&inner, now);
            let conflicts = self.detector.detect(&local_changes, &incoming);
            report.conflicts = conflicts.len();
            let conflicted: BTreeSet<&str> = conflicts.iter().map(|c| c.key.as_str()).collect();

            for (key, change) in incoming.changes() {
                if conflicted.contains(key) {
                    continue;
                }
                if inner.is_stale(key, stamp) {
                    debug!(key = %key, device = %origin, "stale remote change dropped");
                    continue;
                }
                self.write_cache(key, change);
                set_baseline(&mut inner.baseline, key, change);
                inner.unrecorded.remove(key);
                inner.stamps.insert(key.to_string(), stamp);
                report.keys_changed += 1;
            }

            let (failure, deferred) = match self.resolver.resolve(&conflicts) {
                Resolution::Resolved { values, failure } => {
                    for conflict in &conflicts {
                        let Some(value) = values.get(&conflict.key) else {
                            continue;
                        };
                        let key = conflict.key.as_str();
                        self.write_cache(key, value.as_ref());
                        set_baseline(&mut inner.baseline, key, conflict.remote_value.as_ref());
                        inner.forget_outbound(local, key);
                        inner.reannounce(key, value.clone());
                        inner.stamps.insert(key.to_string(), newest(conflict));
                        report.keys_changed += 1;
                    }
                    (failure, Vec::new())
                }
                Resolution::Pending(deferred) => (None, deferred),
            };

            for conflict in deferred {
                let key = conflict.key.clone();
                set_baseline(&mut inner.baseline, &key, conflict.remote_value.as_ref());
                inner.forget_outbound(local, &key);
                inner.stamps.insert(key.clone(), newest(&conflict));
                if let Some(state) = inner.devices.get_mut(&origin) {
                    state.pending_inbound_conflicts.insert(key.clone());
                }
                info!(key = %key, device = %origin, "conflict deferred to caller");
                inner.conflicts.insert(key, conflict);
                report.deferred += 1;
            }

            if let Some(state) = inner.devices.get_mut(&origin) {
                state.last_synced_version = remote.base_version() + 1;
            }
            inner.observed = inner.observed.max(remote.timestamp());
            failure
        };

        debug!(
            device = %origin,
            base_version = remote.base_version(),
            keys_changed = report.keys_changed,
            conflicts = report.conflicts,
            "remote delta reconciled"
        );
        self.record_cycle(|stats| {
            stats.deltas_received += 1;
            stats.conflicts_detected += report.conflicts as u64;
            stats.conflicts_deferred += report.deferred as u64;
        });
        self.settle()?;
        Ok((report, failure))
    }

    /// Settles a manual conflict with `value` (`None` deletes the key).
    ///
    /// The value is written to the cache and announced to peers by the next
    /// [`record_local_changes`](Self::record_local_changes).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownConflict`] if no conflict is pending for
    /// `key`.
    pub fn submit_resolution(&self, key: &str, value: Option<Payload>) -> SyncResult<()> {
        self.ensure_running()?;
        let mut inner = self.inner.lock();
        if inner.conflicts.remove(key).is_none() {
            return Err(SyncError::UnknownConflict(key.to_string()));
        }
        self.write_cache(key, value.as_ref());
        inner.reannounce(key, value);
        for state in inner.devices.values_mut() {
            state.pending_inbound_conflicts.remove(key);
        }

        if inner.phase == SyncPhase::ConflictPending {
            inner.phase.transition(SyncPhase::Reconciling)?;
            let rest = inner.rest_phase();
            inner.phase.transition(rest)?;
        }
        info!(key = %key, remaining = inner.conflicts.len(), "manual conflict resolved");
        Ok(())
    }

    /// Processes inbound deltas until [`shutdown`](Self::shutdown) is called
    /// or the channel closes.
    ///
    /// With a `sync_interval` configured, local changes are also pushed on
    /// that cadence. Errors are logged and recorded in [`SyncStats`]; they
    /// do not stop the loop.
    pub async fn run(&self, mut inbound: mpsc::Receiver<Delta>) {
        let mut ticker = self.config.sync_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        info!(device = %self.config.device_id, "sync coordinator running");

        while !self.stopped.load(Ordering::SeqCst) {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                message = inbound.recv() => match message {
                    Some(delta) => {
                        if let Err(e) = self.receive(delta).await {
                            warn!(error = %e, "inbound delta not fully applied");
                        }
                    }
                    None => {
                        debug!("inbound channel closed");
                        break;
                    }
                },
                _ = next_tick(&mut ticker) => {
                    if let Err(e) = self.sync_local().await {
                        warn!(error = %e, "periodic sync failed");
                    }
                }
            }
        }
        info!(device = %self.config.device_id, "sync coordinator stopped");
    }

    /// Stops the coordinator. [`run`](Self::run) returns and every later
    /// call fails with [`SyncError::Shutdown`].
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
        info!(device = %self.config.device_id, "sync coordinator shutting down");
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<T: SyncTransport> std::fmt::Debug for SyncCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("device", &self.config.device_id)
            .field("phase", &self.phase())
            .field("strategy", self.resolver.strategy())
            .finish()
    }
}
