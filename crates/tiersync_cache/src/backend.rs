//! Disk backend trait definition.

use crate::error::CacheResult;

/// A keyed byte store underneath the disk tier.
///
/// Backends are **opaque record stores**: they persist whatever bytes the
/// disk tier hands them and know nothing about entries, expiry or capacity.
///
/// # Invariants
///
/// - `read` returns exactly the bytes last written for that key
/// - `write` replaces any previous record for the key
/// - `delete` of a missing key is not an error
/// - Backends must be `Send + Sync`; the disk tier reads from caller threads
///   while its worker thread writes
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait DiskBackend: Send + Sync {
    /// Stores a record, replacing any previous one for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    fn write(&self, key: &str, record: &[u8]) -> CacheResult<()>;

    /// Reads the record for `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    fn read(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Deletes the record for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing record cannot be removed.
    fn delete(&self, key: &str) -> CacheResult<()>;

    /// Reads every stored record. Used to rebuild the index on open.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn load_all(&self) -> CacheResult<Vec<Vec<u8>>>;

    /// Deletes every stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if any record cannot be removed.
    fn clear(&self) -> CacheResult<()>;
}
