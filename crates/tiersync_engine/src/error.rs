//! Error types for the sync engine.

use crate::state::SyncPhase;
use thiserror::Error;
use tiersync_cache::CacheError;
use tiersync_protocol::{DeviceId, ProtocolError, ResolutionFailure};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A transport send did not complete within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// Every retry failed. The delta stays queued.
    #[error("sync failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last: Box<SyncError>,
    },

    /// A custom resolver failed; the listed keys were settled by
    /// last-write-wins instead.
    #[error("conflict resolution failed for {keys:?}: {message}")]
    ConflictResolution {
        /// Keys that fell back to last-write-wins.
        keys: Vec<String>,
        /// What the resolver reported.
        message: String,
    },

    /// An inbound delta arrived ahead of its predecessors. It is queued
    /// and applied once the gap is filled.
    #[error("delta from {device} is based on version {base_version}, expected {expected}; queued")]
    OrderingViolation {
        /// Origin of the delta.
        device: DeviceId,
        /// The delta's base version.
        base_version: u64,
        /// The version the coordinator has reconciled up to.
        expected: u64,
    },

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current phase.
        from: SyncPhase,
        /// Attempted target phase.
        to: SyncPhase,
    },

    /// The device is not registered with the coordinator.
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// No pending conflict exists for the key.
    #[error("no pending conflict for key {0:?}")]
    UnknownConflict(String),

    /// An outbound transform rejected a delta.
    #[error("outbound transform failed: {0}")]
    Transform(String),

    /// The coordinator has been shut down.
    #[error("coordinator is shut down")]
    Shutdown,

    /// Protocol error (invalid delta, codec failure).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Cache error.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}

impl From<ResolutionFailure> for SyncError {
    fn from(failure: ResolutionFailure) -> Self {
        Self::ConflictResolution {
            keys: failure.keys,
            message: failure.message,
        }
    }
}
