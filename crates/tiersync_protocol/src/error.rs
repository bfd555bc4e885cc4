//! Error types for the protocol crate.

use thiserror::Error;
use tiersync_codec::CodecError;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building, encoding or decoding protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A decoded delta lists the same key in more than one change set.
    #[error("key {key:?} appears in both {first} and {second}")]
    OverlappingKey {
        /// The offending key.
        key: String,
        /// First change set holding the key.
        first: &'static str,
        /// Second change set holding the key.
        second: &'static str,
    },

    /// A device id string could not be parsed.
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),
}
