//! Payload encoding for cache entries.
//!
//! Values are stored as a JSON envelope `{"type": "json", "data": ..., "timestamp": ...}`.
//! Decoding also accepts bare JSON written by other producers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::error::CacheError;

const ENVELOPE_KIND: &str = "json";

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a Value,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    data: Value,
}

/// Encode `value` into the stored byte form.
///
/// Fails with [`CacheError::Serialization`] for shapes JSON cannot carry,
/// such as maps keyed by non-string values.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CacheError> {
    let data = serde_json::to_value(value)?;
    let envelope = EnvelopeRef {
        kind: ENVELOPE_KIND,
        data: &data,
        timestamp: OffsetDateTime::now_utc(),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decode stored bytes back into `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    let raw: Value = serde_json::from_slice(bytes)?;
    let data = match raw {
        Value::Object(ref map) if map.contains_key("type") && map.contains_key("data") => {
            let envelope: Envelope = serde_json::from_value(raw)?;
            if envelope.kind != ENVELOPE_KIND {
                return Err(serde::de::Error::custom(format!(
                    "unsupported cache envelope `{}`",
                    envelope.kind
                )));
            }
            envelope.data
        }
        other => other,
    };
    serde_json::from_value(data)
}
