//! Lenient snapshot decoding shared by the entity adapters.
//!
//! Snapshots outlive the code that wrote them, so decoding accepts older
//! shapes: user ids that were not UUIDs, free-form data written as a nested
//! value instead of an encoded string, and fields that did not exist yet.

use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use verso_core::VersoResult;

/// Serialize a snapshot document.
pub(crate) fn to_snapshot<T: Serialize>(snapshot: &T) -> VersoResult<String> {
    Ok(serde_json::to_string(snapshot)?)
}

/// Decode a snapshot document, yielding `None` for anything unreadable.
pub(crate) fn from_snapshot<T: DeserializeOwned>(entity_type: &str, json: &str) -> Option<T> {
    if json.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(json) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            debug!(entity_type, error = %e, "Snapshot could not be decoded");
            None
        }
    }
}

/// Optional user id; values that are not UUIDs decode as `None`.
pub(crate) fn lenient_user_id<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Uuid::parse_str(&s).ok(),
        _ => None,
    })
}

/// Write free-form JSON as an encoded JSON string.
///
/// The encoded form is always a string, so [`embedded_json`] can tell it apart
/// from a nested value and decode it back to exactly what was written.
pub(crate) fn encoded_json<S>(value: &Option<Value>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(value) => {
            let encoded = serde_json::to_string(value).map_err(S::Error::custom)?;
            serializer.serialize_some(&encoded)
        }
        None => serializer.serialize_none(),
    }
}

/// Read free-form JSON written by [`encoded_json`].
///
/// A string is decoded as JSON and kept verbatim when it does not parse.
/// Nested values from older snapshots are accepted as they are.
pub(crate) fn embedded_json<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Null) | None => None,
        Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Null) => None,
            Ok(decoded) => Some(decoded),
            Err(_) => Some(Value::String(s)),
        },
        Some(other) => Some(other),
    })
}
