//! Wire value codec.
//!
//! Values travel as JSON text. Encoding failures and decoding failures are
//! returned as values so callers decide how to surface them.

use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("value is not serializable: {reason}")]
pub struct NotSerializable {
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("payload is not valid JSON: {reason}")]
pub struct DecodeFailure {
    pub raw: String,
    pub reason: String,
}

/// A body as handed over by the transport: raw text, or JSON a lower layer
/// already parsed.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Text(String),
    Json(Value),
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<String, NotSerializable> {
    serde_json::to_string(value).map_err(|err| NotSerializable {
        reason: err.to_string(),
    })
}

pub fn deserialize(payload: impl Into<Payload>) -> Result<Value, DecodeFailure> {
    match payload.into() {
        Payload::Json(value) => Ok(value),
        Payload::Text(text) if text.is_empty() => Ok(Value::String(String::new())),
        Payload::Text(text) => serde_json::from_str(&text).map_err(|err| DecodeFailure {
            reason: err.to_string(),
            raw: text,
        }),
    }
}

/// Decodes `payload`, surfacing the raw text as a string value instead of
/// failing when `raw_fallback` is set.
pub fn decode_with_policy(
    payload: impl Into<Payload>,
    raw_fallback: bool,
) -> Result<Value, DecodeFailure> {
    match deserialize(payload) {
        Ok(value) => Ok(value),
        Err(failure) if raw_fallback => {
            tracing::warn!(reason = %failure.reason, "payload is not JSON; returning raw text");
            Ok(Value::String(failure.raw))
        }
        Err(failure) => Err(failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn serialize_then_deserialize_nested_value_expected_equal() {
        let value = json!({"coins": 10, "items": ["sword", {"level": 3}], "flag": null});
        let encoded = serialize(&value).expect("value should serialize");
        assert_eq!(deserialize(encoded).expect("payload should decode"), value);
    }

    #[test]
    fn serialize_non_string_map_keys_expected_not_serializable() {
        let mut map = BTreeMap::new();
        map.insert((1, 2), "pair");
        let error = serialize(&map).expect_err("tuple keys cannot become JSON keys");
        assert!(error.reason.contains("key must be a string"));
    }

    #[test]
    fn serialize_failing_impl_expected_not_serializable() {
        struct Refuses;
        impl Serialize for Refuses {
            fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("cyclic structure"))
            }
        }
        let error = serialize(&Refuses).expect_err("custom failure should surface");
        assert_eq!(error.reason, "cyclic structure");
    }

    #[test]
    fn deserialize_empty_string_expected_empty_string_value() {
        assert_eq!(deserialize(""), Ok(Value::String(String::new())));
    }

    #[test]
    fn deserialize_parsed_json_expected_passthrough() {
        let value = json!({"already": "parsed"});
        assert_eq!(deserialize(value.clone()), Ok(value));
    }

    #[test]
    fn deserialize_garbage_expected_failure_with_raw_payload() {
        let failure = deserialize("{not json").expect_err("garbage should not decode");
        assert_eq!(failure.raw, "{not json");
    }

    #[test]
    fn decode_with_policy_fallback_expected_raw_string() {
        assert_eq!(
            decode_with_policy("plain words", true),
            Ok(Value::String("plain words".to_string()))
        );
        assert!(decode_with_policy("plain words", false).is_err());
    }
}
