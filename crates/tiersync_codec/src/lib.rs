//! # tiersync codec
//!
//! Tagged payloads and CBOR helpers shared by the cache and sync crates.
//!
//! Cached values are opaque to the rest of the workspace: a [`Payload`] is a
//! byte buffer plus a [`PayloadKind`] tag. Only CBOR maps are ever looked
//! into, and only to merge them field by field during conflict resolution.
//!
//! ## Usage
//!
//! ```
//! use tiersync_codec::{Payload, PayloadKind};
//! use std::collections::BTreeMap;
//!
//! let mut profile = BTreeMap::new();
//! profile.insert("name", "ada");
//!
//! let payload = Payload::from_value(&profile).unwrap();
//! assert_eq!(payload.kind(), PayloadKind::Cbor);
//! assert!(payload.is_structured());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod payload;

pub use cbor::{canonicalize, from_cbor, to_cbor};
pub use ciborium::Value;
pub use error::{CodecError, CodecResult};
pub use payload::{Payload, PayloadKind};
