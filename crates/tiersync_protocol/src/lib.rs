//! # tiersync protocol
//!
//! Pure data types and algorithms for delta-based sync. No I/O happens here.
//!
//! This crate provides:
//! - [`Snapshot`] - a versioned key/value mapping
//! - [`Delta`] and [`DeltaCalculator`] - structural diffs between snapshots
//! - [`ConflictDetector`] - finds keys two deltas disagree on
//! - [`ConflictResolver`] - settles conflicts by a [`ResolutionStrategy`]
//! - CBOR encoding of deltas for transports
//!
//! ## Example
//!
//! ```rust
//! use tiersync_codec::Payload;
//! use tiersync_protocol::{
//!     ConflictDetector, ConflictResolver, Delta, DeviceId, Resolution,
//! };
//!
//! let mut local = Delta::new(DeviceId::random(), 0, 10);
//! local.modify("k", Payload::text("A"));
//! let mut remote = Delta::new(DeviceId::random(), 0, 20);
//! remote.modify("k", Payload::text("B"));
//!
//! let conflicts = ConflictDetector::new().detect(&local, &remote);
//! assert_eq!(conflicts.len(), 1);
//!
//! match ConflictResolver::default().resolve(&conflicts) {
//!     Resolution::Resolved { values, .. } => {
//!         assert_eq!(values["k"], Some(Payload::text("B")));
//!     }
//!     Resolution::Pending(_) => unreachable!(),
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod delta;
mod device;
mod error;
mod resolver;
mod snapshot;

pub use conflict::{Conflict, ConflictDetector};
pub use delta::{Delta, DeltaCalculator};
pub use device::DeviceId;
pub use error::{ProtocolError, ProtocolResult};
pub use resolver::{
    last_write_wins, merge, ConflictResolver, CustomResolveFn, Resolution, ResolutionFailure,
    ResolutionStrategy, ResolvedValues,
};
pub use snapshot::Snapshot;
