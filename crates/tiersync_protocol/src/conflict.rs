//! Conflict detection.

use crate::delta::Delta;
use crate::device::DeviceId;
use tiersync_codec::Payload;

/// A key changed differently by two deltas.
///
/// A value of `None` means that side deleted the key. Conflicts are
/// transient: produced by [`ConflictDetector`], consumed by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The conflicting key.
    pub key: String,
    /// Local value, `None` if deleted locally.
    pub local_value: Option<Payload>,
    /// Remote value, `None` if deleted remotely.
    pub remote_value: Option<Payload>,
    /// Timestamp of the local change.
    pub local_timestamp: u64,
    /// Timestamp of the remote change.
    pub remote_timestamp: u64,
    /// Device that made the local change.
    pub local_origin: DeviceId,
    /// Device that made the remote change.
    pub remote_origin: DeviceId,
}

impl Conflict {
    /// Returns true if both sides wrote a value.
    pub fn is_update_conflict(&self) -> bool {
        self.local_value.is_some() && self.remote_value.is_some()
    }

    /// Returns true if one side deleted the key and the other wrote it.
    pub fn is_update_delete_conflict(&self) -> bool {
        self.local_value.is_some() != self.remote_value.is_some()
    }

    /// Returns the same conflict seen from the other device.
    #[must_use]
    pub fn swapped(&self) -> Self {
        Self {
            key: self.key.clone(),
            local_value: self.remote_value.clone(),
            remote_value: self.local_value.clone(),
            local_timestamp: self.remote_timestamp,
            remote_timestamp: self.local_timestamp,
            local_origin: self.remote_origin,
            remote_origin: self.local_origin,
        }
    }
}

/// Finds the keys two deltas disagree on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    /// Creates a detector.
    pub fn new() -> Self {
        Self
    }

    /// Compares a local and a remote delta.
    ///
    /// A key conflicts when both deltas set it to different values, or when
    /// one deletes it and the other sets it. Two deletions agree. Conflicts
    /// come back in key order.
    pub fn detect(&self, local: &Delta, remote: &Delta) -> Vec<Conflict> {
        local
            .changes()
            .filter_map(|(key, local_value)| {
                let remote_value = remote.change_for(key)?;
                if local_value == remote_value {
                    return None;
                }
                Some(Conflict {
                    key: key.to_string(),
                    local_value: local_value.cloned(),
                    remote_value: remote_value.cloned(),
                    local_timestamp: local.timestamp(),
                    remote_timestamp: remote.timestamp(),
                    local_origin: local.origin(),
                    remote_origin: remote.origin(),
                })
            })
            .collect()
    }
}
