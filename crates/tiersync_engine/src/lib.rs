//! # tiersync engine
//!
//! Sync coordinator for tiersync.
//!
//! This crate provides:
//! - Sync state machine (idle → syncing → reconciling → idle)
//! - Per-device sync state with in-order delta delivery
//! - Conflict detection and resolution on inbound deltas
//! - Retry with exponential backoff and per-send timeouts
//! - Transport abstraction with channel and mock transports
//! - Outbound delta transform pipelines
//!
//! ## Architecture
//!
//! Applications read and write a [`tiersync_cache::TieredCacheManager`]
//! directly. A [`SyncCoordinator`] sits beside it:
//! 1. Turn the writes the cache journaled into a delta against what peers
//!    already know, and queue it
//! 2. Send queued deltas in order through a [`SyncTransport`]
//! 3. Reconcile inbound deltas against local changes peers have not seen
//!
//! ## Key Invariants
//!
//! - Deltas from one device are applied in version order
//! - Replayed deltas are ignored
//! - Every device picks the same winner for an automatic conflict
//! - Evictions and expiry never reach peers; only explicit writes do
//! - One coordinator per cache
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tiersync_cache::{CacheConfig, TieredCacheManager};
//! use tiersync_codec::Payload;
//! use tiersync_engine::{MockTransport, SyncConfig, SyncCoordinator};
//! use tiersync_protocol::DeviceId;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let cache = Arc::new(TieredCacheManager::new(CacheConfig::new(1 << 20)).unwrap());
//! let transport = Arc::new(MockTransport::new());
//! let coordinator = SyncCoordinator::new(
//!     SyncConfig::new(DeviceId::random()),
//!     Arc::clone(&cache),
//!     Arc::clone(&transport),
//! );
//!
//! cache.set("greeting", Payload::text("hello"), None);
//! assert_eq!(coordinator.sync_local().await.unwrap(), 1);
//! assert_eq!(transport.sent().len(), 1);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod pipeline;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use coordinator::SyncCoordinator;
pub use error::{SyncError, SyncResult};
pub use pipeline::{DeltaTransform, OutboundPipeline};
pub use state::{ReconcileReport, SyncPhase, SyncState, SyncStats};
pub use transport::{ChannelTransport, MockTransport, SyncTransport};
