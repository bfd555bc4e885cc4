//! # tiersync cache
//!
//! A two-tier cache: a bounded memory tier (L1) backed by an optional,
//! bounded disk tier (L2).
//!
//! ## Design Principles
//!
//! - Memory is authoritative for what it holds; disk only receives what
//!   memory evicts
//! - An entry lives in at most one tier at a time
//! - Disk failures degrade the cache, they never fail `get` or `set`
//! - Expiry is lazy: expired entries are discovered on access or swept by
//!   [`TieredCacheManager::clean_expired`]
//!
//! ## Tiers
//!
//! - [`EntryStore`] - the memory tier, with batch eviction under one lock
//! - [`DiskTier`] - the disk tier, writing through a background worker
//! - [`DiskBackend`] - where disk records go: [`FileBackend`] or
//!   [`InMemoryBackend`]
//!
//! ## Example
//!
//! ```rust
//! use tiersync_cache::{CacheConfig, EvictionPolicy, TieredCacheManager};
//! use tiersync_codec::Payload;
//!
//! let config = CacheConfig::new(4).with_eviction_policy(EvictionPolicy::Fifo);
//! let cache = TieredCacheManager::new(config).unwrap();
//!
//! cache.set("a", Payload::binary(vec![1]), None);
//! cache.set("b", Payload::binary(vec![2]), None);
//! cache.set("c", Payload::binary(vec![3]), None);
//!
//! assert_eq!(cache.get("a"), None);
//! assert_eq!(cache.statistics().eviction_count, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cipher;
mod clock;
mod config;
mod disk;
mod entry;
mod error;
mod file;
mod journal;
mod manager;
mod memory;
mod policy;
mod stats;
mod store;

pub use backend::DiskBackend;
pub use cipher::RecordCipher;
#[cfg(feature = "encryption")]
pub use cipher::{AesGcmCipher, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use disk::DiskTier;
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
pub use file::FileBackend;
pub use journal::WriteJournal;
pub use manager::TieredCacheManager;
pub use memory::InMemoryBackend;
pub use policy::{EvictionPolicy, UnknownPolicy};
pub use stats::CacheStatistics;
pub use store::{EntrySnapshot, EntryStore, Lookup};
