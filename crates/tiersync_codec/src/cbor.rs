//! Thin CBOR helpers over `ciborium`.

use crate::error::{CodecError, CodecResult};
use ciborium::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes `value` to CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serde rejects the value.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Deserializes a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not valid CBOR
/// for `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Sorts map entries by the CBOR encoding of their keys, recursively.
///
/// Two maps holding the same pairs in different orders encode to the same
/// bytes after this pass.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Map(pairs) => {
            let mut keyed: Vec<(Vec<u8>, Value, Value)> = pairs
                .into_iter()
                .map(|(k, v)| {
                    let sort_key = to_cbor(&k).unwrap_or_default();
                    (sort_key, canonicalize(k), canonicalize(v))
                })
                .collect();
            keyed.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));
            Value::Map(keyed.into_iter().map(|(_, k, v)| (k, v)).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Tag(tag, inner) => Value::Tag(tag, Box::new(canonicalize(*inner))),
        other => other,
    }
}
