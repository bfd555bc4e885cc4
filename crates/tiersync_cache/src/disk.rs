//! The disk tier (L2): best-effort durable overflow for evicted entries.
//!
//! Writes never block the caller. [`DiskTier::set`] records the entry in an
//! in-memory slot table and queues the actual write for a dedicated worker
//! thread. Until the worker has persisted it, the slot keeps the entry so
//! reads still see it. If the write fails, the slot keeps the entry
//! (memory-only) and the next [`DiskTier::flush`] retries it.

use crate::backend::DiskBackend;
use crate::cipher::RecordCipher;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tiersync_codec::{from_cbor, to_cbor};
use tracing::{debug, warn};

/// What actually goes to the backend for one key.
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    entry: CacheEntry,
    disk_sequence: u64,
}

#[derive(Debug)]
enum SlotState {
    /// Queued for the worker.
    Pending { entry: CacheEntry, generation: u64 },
    /// The last write attempt failed; held in memory until retried.
    Failed { entry: CacheEntry, generation: u64 },
    /// Persisted by the backend.
    Durable,
}

#[derive(Debug)]
struct Slot {
    size_bytes: u64,
    disk_sequence: u64,
    expires_at: Option<u64>,
    state: SlotState,
}

#[derive(Debug, Default)]
struct Index {
    slots: HashMap<String, Slot>,
    /// disk_sequence -> key, oldest first.
    order: BTreeMap<u64, String>,
    size_bytes: u64,
    next_sequence: u64,
    next_generation: u64,
}

impl Index {
    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.disk_sequence);
        self.size_bytes -= slot.size_bytes;
        Some(slot)
    }

    fn insert(&mut self, key: String, slot: Slot) {
        self.size_bytes += slot.size_bytes;
        self.order.insert(slot.disk_sequence, key.clone());
        self.slots.insert(key, slot);
    }

    fn oldest_key(&self) -> Option<String> {
        self.order.values().next().cloned()
    }

    fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }
}

enum Command {
    Write { key: String, generation: u64 },
    Remove { key: String },
    Clear,
    Flush(Sender<()>),
    Shutdown,
}

struct Shared {
    backend: Arc<dyn DiskBackend>,
    cipher: Option<Arc<dyn RecordCipher>>,
    index: Mutex<Index>,
    write_failures: AtomicU64,
}

impl Shared {
    fn encode(&self, record: &DiskRecord) -> CacheResult<Vec<u8>> {
        let bytes = to_cbor(record)?;
        match &self.cipher {
            Some(cipher) => cipher.seal(&bytes),
            None => Ok(bytes),
        }
    }

    fn decode(&self, bytes: &[u8]) -> CacheResult<DiskRecord> {
        let plain = match &self.cipher {
            Some(cipher) => cipher.open(bytes)?,
            None => bytes.to_vec(),
        };
        Ok(from_cbor(&plain)?)
    }

    fn write(&self, key: &str, generation: u64) {
        let record = {
            let index = self.index.lock();
            match index.slots.get(key) {
                Some(Slot {
                    disk_sequence,
                    state: SlotState::Pending { entry, generation: g },
                    ..
                }) if *g == generation => DiskRecord {
                    entry: entry.clone(),
                    disk_sequence: *disk_sequence,
                },
                // Superseded, removed or dropped since it was queued.
                _ => return,
            }
        };

        let result = self
            .encode(&record)
            .and_then(|bytes| self.backend.write(key, &bytes));

        let mut index = self.index.lock();
        let Some(slot) = index.slots.get_mut(key) else {
            return;
        };
        if !matches!(slot.state, SlotState::Pending { generation: g, .. } if g == generation) {
            return;
        }
        match result {
            Ok(()) => slot.state = SlotState::Durable,
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "disk write failed, entry kept in memory");
                slot.state = SlotState::Failed {
                    entry: record.entry,
                    generation,
                };
            }
        }
    }

    fn run(&self, commands: Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            match command {
                Command::Write { key, generation } => self.write(&key, generation),
                Command::Remove { key } => {
                    if let Err(e) = self.backend.delete(&key) {
                        warn!(key = %key, error = %e, "disk delete failed");
                    }
                }
                Command::Clear => {
                    if let Err(e) = self.backend.clear() {
                        warn!(error = %e, "disk clear failed");
                    }
                }
                Command::Flush(done) => {
                    let _ = done.send(());
                }
                Command::Shutdown => break,
            }
        }
        debug!("disk writer stopped");
    }
}

/// Persistent secondary store keyed like the memory tier.
///
/// The tier owns serialized copies of its entries; nothing is shared with
/// the memory tier. Capacity is enforced in bytes: admitting a record first
/// drops the oldest records (FIFO by admission order) until it fits.
pub struct DiskTier {
    shared: Arc<Shared>,
    capacity_bytes: u64,
    commands: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiskTier {
    /// Opens a disk tier over `backend`, rebuilding the index from the
    /// records already stored there.
    ///
    /// Unreadable records are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be enumerated or the worker
    /// thread cannot be started.
    pub fn open(
        backend: Arc<dyn DiskBackend>,
        cipher: Option<Arc<dyn RecordCipher>>,
        capacity_bytes: u64,
    ) -> CacheResult<Self> {
        let shared = Arc::new(Shared {
            backend,
            cipher,
            index: Mutex::new(Index::default()),
            write_failures: AtomicU64::new(0),
        });

        {
            let mut index = shared.index.lock();
            for bytes in shared.backend.load_all()? {
                let record = match shared.decode(&bytes) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable disk record");
                        continue;
                    }
                };
                index.next_sequence = index.next_sequence.max(record.disk_sequence + 1);
                let key = record.entry.key.clone();
                index.insert(
                    key,
                    Slot {
                        size_bytes: record.entry.size_bytes,
                        disk_sequence: record.disk_sequence,
                        expires_at: record.entry.expires_at,
                        state: SlotState::Durable,
                    },
                );
            }
            debug!(records = index.slots.len(), "disk tier opened");
        }

        let (commands, receiver) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("tiersync-disk".to_string())
            .spawn(move || worker_shared.run(receiver))?;

        Ok(Self {
            shared,
            capacity_bytes,
            commands,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, command: Command) -> CacheResult<()> {
        self.commands
            .send(command)
            .map_err(|_| CacheError::WriterStopped)
    }

    /// Admits an entry and queues its write.
    ///
    /// Returns the keys of older records dropped to make room.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CapacityExceeded`] if the entry alone is larger
    /// than the disk capacity, or [`CacheError::WriterStopped`] if the worker
    /// is gone.
    pub fn set(&self, entry: CacheEntry) -> CacheResult<Vec<String>> {
        if entry.size_bytes > self.capacity_bytes {
            return Err(CacheError::CapacityExceeded {
                needed: entry.size_bytes,
                capacity: self.capacity_bytes,
            });
        }

        let key = entry.key.clone();
        let mut dropped = Vec::new();
        let generation = {
            let mut index = self.shared.index.lock();
            index.remove(&key);

            while index.size_bytes + entry.size_bytes > self.capacity_bytes {
                let Some(oldest) = index.oldest_key() else {
                    break;
                };
                index.remove(&oldest);
                dropped.push(oldest);
            }

            let generation = index.next_generation();
            let disk_sequence = index.next_sequence;
            index.next_sequence += 1;
            index.insert(
                key.clone(),
                Slot {
                    size_bytes: entry.size_bytes,
                    disk_sequence,
                    expires_at: entry.expires_at,
                    state: SlotState::Pending { entry, generation },
                },
            );
            generation
        };

        for old in &dropped {
            self.send(Command::Remove { key: old.clone() })?;
        }
        self.send(Command::Write { key, generation })?;
        Ok(dropped)
    }

    /// Reads an entry.
    ///
    /// Entries still queued, or whose write failed, are served from the
    /// tier's in-memory slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored record cannot be read or decoded.
    pub fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        {
            let index = self.shared.index.lock();
            match index.slots.get(key).map(|slot| &slot.state) {
                None => return Ok(None),
                Some(SlotState::Pending { entry, .. }) | Some(SlotState::Failed { entry, .. }) => {
                    return Ok(Some(entry.clone()));
                }
                Some(SlotState::Durable) => {}
            }
        }

        let Some(bytes) = self.shared.backend.read(key)? else {
            return Ok(None);
        };
        let record = self.shared.decode(&bytes)?;
        if record.entry.key != key {
            return Err(CacheError::Corrupted(format!(
                "record for {key:?} holds key {:?}",
                record.entry.key
            )));
        }
        Ok(Some(record.entry))
    }

    /// Returns true if the tier holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.shared.index.lock().slots.contains_key(key)
    }

    /// Returns true if the tier holds `key` and it has not expired at `now`.
    pub fn contains_live(&self, key: &str, now: u64) -> bool {
        self.shared
            .index
            .lock()
            .slots
            .get(key)
            .is_some_and(|slot| !slot.expires_at.is_some_and(|at| now >= at))
    }

    /// Removes a key. Returns true if it was present.
    pub fn remove(&self, key: &str) -> bool {
        let existed = self.shared.index.lock().remove(key).is_some();
        if existed {
            if let Err(e) = self.send(Command::Remove {
                key: key.to_string(),
            }) {
                warn!(key = %key, error = %e, "could not queue disk delete");
            }
        }
        existed
    }

    /// Removes every record whose expiry has passed at `now`.
    pub fn remove_expired(&self, now: u64) -> Vec<String> {
        let expired: Vec<String> = {
            let mut index = self.shared.index.lock();
            let keys: Vec<String> = index
                .slots
                .iter()
                .filter(|(_, slot)| slot.expires_at.is_some_and(|at| now >= at))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                index.remove(key);
            }
            keys
        };
        for key in &expired {
            if let Err(e) = self.send(Command::Remove { key: key.clone() }) {
                warn!(key = %key, error = %e, "could not queue disk delete");
            }
        }
        expired
    }

    /// Returns the keys currently held.
    pub fn keys(&self) -> Vec<String> {
        self.shared.index.lock().slots.keys().cloned().collect()
    }

    /// Bytes charged by the records held (durable, queued or failed).
    pub fn size_bytes(&self) -> u64 {
        self.shared.index.lock().size_bytes
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.shared.index.lock().slots.len()
    }

    /// Returns true if no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Number of records whose last write failed.
    pub fn failed_writes(&self) -> usize {
        self.shared
            .index
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot.state, SlotState::Failed { .. }))
            .count()
    }

    /// Total write failures since the tier was opened.
    pub fn write_failure_count(&self) -> u64 {
        self.shared.write_failures.load(Ordering::Relaxed)
    }

    /// Removes every record.
    pub fn clear(&self) {
        {
            let mut index = self.shared.index.lock();
            index.slots.clear();
            index.order.clear();
            index.size_bytes = 0;
        }
        if let Err(e) = self.send(Command::Clear) {
            warn!(error = %e, "could not queue disk clear");
        }
    }

    /// Blocks until every queued write has been attempted.
    ///
    /// Records whose earlier write failed are re-queued first, so a
    /// successful flush leaves only records that failed again.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WriterStopped`] if the worker is gone.
    pub fn flush(&self) -> CacheResult<()> {
        let retries: Vec<(String, u64)> = {
            let mut index = self.shared.index.lock();
            let failed: Vec<String> = index
                .slots
                .iter()
                .filter(|(_, slot)| matches!(slot.state, SlotState::Failed { .. }))
                .map(|(key, _)| key.clone())
                .collect();
            let mut retries = Vec::with_capacity(failed.len());
            for key in failed {
                let generation = index.next_generation();
                if let Some(slot) = index.slots.get_mut(&key) {
                    let state = std::mem::replace(&mut slot.state, SlotState::Durable);
                    if let SlotState::Failed { entry, .. } = state {
                        slot.state = SlotState::Pending { entry, generation };
                        retries.push((key, generation));
                    }
                }
            }
            retries
        };
        for (key, generation) in retries {
            self.send(Command::Write { key, generation })?;
        }

        let (done, wait) = mpsc::channel();
        self.send(Command::Flush(done))?;
        wait.recv().map_err(|_| CacheError::WriterStopped)
    }
}

impl Drop for DiskTier {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for DiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskTier")
            .field("capacity_bytes", &self.capacity_bytes)
            .field("size_bytes", &self.size_bytes())
            .field("len", &self.len())
            .finish()
    }
}
