//! Error types for cache operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tiersync_codec::CodecError;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by the disk tier and its backends.
///
/// None of these reach callers of [`crate::TieredCacheManager::get`] or
/// [`crate::TieredCacheManager::set`]; the manager logs them and keeps
/// serving from memory.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A record does not fit in the disk tier even after dropping older records.
    #[error("disk capacity exceeded: record needs {needed} bytes, capacity is {capacity}")]
    CapacityExceeded {
        /// Size of the record being admitted.
        needed: u64,
        /// Configured disk capacity.
        capacity: u64,
    },

    /// Another cache instance owns this directory.
    #[error("disk directory is locked by another cache: {0}")]
    Locked(PathBuf),

    /// A stored record is unreadable.
    #[error("record corrupted: {0}")]
    Corrupted(String),

    /// Sealing or opening a record failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// The background writer is gone.
    #[error("disk writer has stopped")]
    WriterStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CacheError::CapacityExceeded {
            needed: 10,
            capacity: 4,
        };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("4"));

        let err: CacheError = io::Error::new(io::ErrorKind::Other, "disk gone").into();
        assert!(err.to_string().contains("disk gone"));
    }
}
