//! Tagged cache payloads.

use crate::cbor::{canonicalize, from_cbor, to_cbor};
use crate::error::{CodecError, CodecResult};
use bytes::Bytes;
use ciborium::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the bytes of a [`Payload`] should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PayloadKind {
    /// Raw bytes with no structure.
    Binary,
    /// UTF-8 text.
    Text,
    /// A CBOR document. Maps of this kind can be merged field by field.
    Cbor,
}

impl PayloadKind {
    /// Returns a short name for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            PayloadKind::Binary => "binary",
            PayloadKind::Text => "text",
            PayloadKind::Cbor => "cbor",
        }
    }
}

/// An opaque cached value: bytes plus a type tag.
///
/// The cache and sync layers never look inside a payload except to merge
/// CBOR maps. Two payloads are equal when both the tag and the bytes are
/// equal.
///
/// # Example
///
/// ```
/// use tiersync_codec::Payload;
///
/// let greeting = Payload::text("hello");
/// assert_eq!(greeting.as_text().unwrap(), "hello");
/// assert_eq!(greeting.len(), 5);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Payload {
    kind: PayloadKind,
    bytes: Bytes,
}

impl Payload {
    /// Creates a payload from raw parts.
    pub fn new(kind: PayloadKind, bytes: impl Into<Bytes>) -> Self {
        Self {
            kind,
            bytes: bytes.into(),
        }
    }

    /// Creates an untyped binary payload.
    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Self::new(PayloadKind::Binary, bytes)
    }

    /// Creates a text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(PayloadKind::Text, text.into().into_bytes())
    }

    /// Serializes `value` into a CBOR payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> CodecResult<Self> {
        Ok(Self::new(PayloadKind::Cbor, to_cbor(value)?))
    }

    /// Builds a CBOR payload from map entries.
    ///
    /// Entries are put into canonical order first, so the same pairs always
    /// produce the same bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the map cannot be encoded.
    pub fn from_map(pairs: Vec<(Value, Value)>) -> CodecResult<Self> {
        let value = canonicalize(Value::Map(pairs));
        Ok(Self::new(PayloadKind::Cbor, to_cbor(&value)?))
    }

    /// Returns the payload kind.
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns a cheap clone of the underlying buffer.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Returns the payload size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the payload has no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Views a text payload as `&str`.
    ///
    /// # Errors
    ///
    /// Fails if the payload is not [`PayloadKind::Text`] or holds invalid UTF-8.
    pub fn as_text(&self) -> CodecResult<&str> {
        if self.kind != PayloadKind::Text {
            return Err(CodecError::KindMismatch {
                expected: PayloadKind::Text.name(),
                actual: self.kind.name(),
            });
        }
        std::str::from_utf8(&self.bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Decodes a CBOR payload into `T`.
    ///
    /// # Errors
    ///
    /// Fails if the payload is not [`PayloadKind::Cbor`] or does not decode as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> CodecResult<T> {
        if self.kind != PayloadKind::Cbor {
            return Err(CodecError::KindMismatch {
                expected: PayloadKind::Cbor.name(),
                actual: self.kind.name(),
            });
        }
        from_cbor(&self.bytes)
    }

    /// Returns the map entries if this is a CBOR payload holding a map.
    ///
    /// Any other payload, including undecodable CBOR, yields `None`.
    pub fn as_map(&self) -> Option<Vec<(Value, Value)>> {
        if self.kind != PayloadKind::Cbor {
            return None;
        }
        match from_cbor::<Value>(&self.bytes) {
            Ok(Value::Map(pairs)) => Some(pairs),
            _ => None,
        }
    }

    /// Returns true if this payload is a CBOR map.
    pub fn is_structured(&self) -> bool {
        self.as_map().is_some()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Ok(text) => write!(f, "Payload::Text({text:?})"),
            Err(_) => write!(f, "Payload::{:?}({} bytes)", self.kind, self.bytes.len()),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::binary(bytes)
    }
}
