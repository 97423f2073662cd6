use crate::codec::Payload;
use crate::errors::{DataStoreError, DataStoreResult, map_http_status};
use crate::types::{KeyInfo, KeyRecord, SortedEntry, StoreRecord, VersionRecord};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const HEADER_ETAG: &str = "etag";
pub const HEADER_USN: &str = "roblox-usn";
pub const HEADER_CREATED_TIME: &str = "roblox-object-created-time";
pub const HEADER_VERSION_CREATED_TIME: &str = "roblox-object-version-created-time";
pub const HEADER_ATTRIBUTES: &str = "roblox-object-attributes";
pub const HEADER_USER_IDS: &str = "roblox-object-userids";

/// A response as seen by the engine. Header names are lowercase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WireResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The services answer a missing key with either 404 or 204.
    pub fn is_absent(&self) -> bool {
        self.status == 404 || self.status == 204
    }
}

pub fn expect_success(response: WireResponse) -> DataStoreResult<WireResponse> {
    if response.is_success() {
        return Ok(response);
    }
    Err(map_http_status(response.status, &response.text()))
}

pub fn json_body(response: &WireResponse) -> DataStoreResult<Value> {
    serde_json::from_slice(&response.body)
        .map_err(|err| DataStoreError::CannotParseResponse(format!("response is not JSON: {err}")))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(millis) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => parse_timestamp(raw),
        Value::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn required_header<'a>(response: &'a WireResponse, name: &str) -> DataStoreResult<&'a str> {
    response
        .header(name)
        .ok_or_else(|| DataStoreError::MalformedResponse(format!("missing header '{name}'")))
}

fn required_timestamp_header(
    response: &WireResponse,
    name: &str,
) -> DataStoreResult<DateTime<Utc>> {
    let raw = required_header(response, name)?;
    parse_timestamp(raw)
        .ok_or_else(|| DataStoreError::MalformedResponse(format!("header '{name}' is not a timestamp: {raw}")))
}

pub fn required_str<'a>(payload: &'a Value, field: &str) -> DataStoreResult<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| DataStoreError::MalformedResponse(format!("missing or invalid field '{field}'")))
}

fn required_timestamp(payload: &Value, field: &str) -> DataStoreResult<DateTime<Utc>> {
    payload
        .get(field)
        .and_then(timestamp_value)
        .ok_or_else(|| DataStoreError::MalformedResponse(format!("missing or invalid field '{field}'")))
}

pub fn parse_user_ids(raw: &str) -> DataStoreResult<Vec<i64>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: Value = serde_json::from_str(raw).map_err(|err| {
        DataStoreError::AttributeShapeInvalid(format!("user ids are not JSON: {err}"))
    })?;
    let items = parsed.as_array().ok_or_else(|| {
        DataStoreError::AttributeShapeInvalid("user ids must be a JSON array".to_string())
    })?;
    items
        .iter()
        .map(|item| {
            item.as_i64().ok_or_else(|| {
                DataStoreError::AttributeShapeInvalid(format!("user id must be an integer: {item}"))
            })
        })
        .collect()
}

pub fn parse_attributes(raw: &str) -> DataStoreResult<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(DataStoreError::AttributeShapeInvalid(format!(
            "metadata must be a JSON object: {other}"
        ))),
        Err(err) => Err(DataStoreError::AttributeShapeInvalid(format!(
            "metadata is not JSON: {err}"
        ))),
    }
}

/// Key info carried on V2 object reads, increments and deletes.
pub fn key_info_from_headers(response: &WireResponse) -> DataStoreResult<KeyInfo> {
    Ok(KeyInfo {
        version: required_header(response, HEADER_ETAG)?.to_string(),
        created_at: required_timestamp_header(response, HEADER_CREATED_TIME)?,
        version_created_at: required_timestamp_header(response, HEADER_VERSION_CREATED_TIME)?,
        user_ids: parse_user_ids(response.header(HEADER_USER_IDS).unwrap_or_default())?,
        metadata: parse_attributes(response.header(HEADER_ATTRIBUTES).unwrap_or_default())?,
    })
}

/// Key info for a V2 write, from the `{version, createdTime,
/// objectCreatedTime}` body plus the attributes that were sent.
pub fn key_info_from_write(
    body: &Value,
    user_ids: Vec<i64>,
    metadata: Map<String, Value>,
) -> DataStoreResult<KeyInfo> {
    let version_created_at = required_timestamp(body, "createdTime")?;
    Ok(KeyInfo {
        version: required_str(body, "version")?.to_string(),
        created_at: body
            .get("objectCreatedTime")
            .and_then(timestamp_value)
            .unwrap_or(version_created_at),
        version_created_at,
        user_ids,
        metadata,
    })
}

pub fn parse_version_record(item: &Value) -> DataStoreResult<VersionRecord> {
    Ok(VersionRecord {
        version: required_str(item, "version")?.to_string(),
        created_at: required_timestamp(item, "createdTime")?,
        object_created_at: item.get("objectCreatedTime").and_then(timestamp_value),
        is_deleted: item.get("deleted").and_then(Value::as_bool).unwrap_or(false),
        content_length: item.get("contentLength").and_then(Value::as_u64),
    })
}

pub fn parse_key_record(item: &Value) -> DataStoreResult<KeyRecord> {
    Ok(KeyRecord {
        key: required_str(item, "key")?.to_string(),
    })
}

pub fn parse_store_record(item: &Value) -> DataStoreResult<StoreRecord> {
    Ok(StoreRecord {
        name: required_str(item, "name")?.to_string(),
        created_at: item.get("createdTime").and_then(timestamp_value),
    })
}

/// Ordered entries come as `{key, value}` (V1) or `{Target, Value}` (legacy).
pub fn parse_sorted_entry(item: &Value) -> DataStoreResult<SortedEntry> {
    let key = item
        .get("key")
        .or_else(|| item.get("Target"))
        .and_then(Value::as_str)
        .ok_or_else(|| DataStoreError::MalformedResponse("sorted entry has no key".to_string()))?;
    let value = item
        .get("value")
        .or_else(|| item.get("Value"))
        .filter(|value| value.is_number())
        .cloned()
        .ok_or_else(|| {
            DataStoreError::MalformedResponse(format!("sorted entry '{key}' has no numeric value"))
        })?;
    Ok(SortedEntry {
        key: key.to_string(),
        value,
    })
}

pub fn legacy_data(body: &Value) -> DataStoreResult<&Value> {
    body.get("data")
        .ok_or_else(|| DataStoreError::MalformedResponse("missing field 'data'".to_string()))
}

/// A stored payload embedded in a JSON envelope: serialized text, or a value
/// the service already expanded.
pub fn embedded_payload(value: &Value) -> Option<Payload> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(Payload::Text(text.clone())),
        other => Some(Payload::Json(other.clone())),
    }
}

/// The first value of a legacy `getV2` answer.
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyEntry {
    pub payload: Payload,
    /// The stored text exactly as the service sent it; echoed back as
    /// `expectedValue`.
    pub raw: String,
}

#[derive(Deserialize)]
struct LegacyReadEnvelope<'a> {
    #[serde(borrow)]
    data: Vec<LegacyReadEntry<'a>>,
}

#[derive(Deserialize)]
struct LegacyReadEntry<'a> {
    #[serde(rename = "Value", borrow)]
    value: &'a RawValue,
}

/// The first value from a legacy `getV2` answer, read from the body bytes so
/// an expanded JSON value keeps its original text.
pub fn legacy_read_payload(body: &[u8]) -> DataStoreResult<Option<LegacyEntry>> {
    let envelope: LegacyReadEnvelope<'_> = serde_json::from_slice(body).map_err(|err| {
        if err.is_data() {
            DataStoreError::MalformedResponse(format!("unexpected legacy read shape: {err}"))
        } else {
            DataStoreError::CannotParseResponse(format!("response is not JSON: {err}"))
        }
    })?;
    let Some(first) = envelope.data.first() else {
        return Ok(None);
    };
    let text = first.value.get();
    let value: Value = serde_json::from_str(text)
        .map_err(|err| DataStoreError::CannotParseResponse(err.to_string()))?;
    Ok(match value {
        Value::Null => None,
        Value::String(stored) => Some(LegacyEntry {
            payload: Payload::Text(stored.clone()),
            raw: stored,
        }),
        other => Some(LegacyEntry {
            payload: Payload::Json(other),
            raw: text.to_string(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object_response() -> WireResponse {
        WireResponse::new(200)
            .with_header("ETag", "v-1")
            .with_header(HEADER_CREATED_TIME, "2026-01-02T03:04:05Z")
            .with_header(HEADER_VERSION_CREATED_TIME, "1767323045000")
            .with_header(HEADER_USER_IDS, "[1, 2]")
            .with_header(HEADER_ATTRIBUTES, r#"{"tier":"gold"}"#)
            .with_body(r#"{"coins":10}"#)
    }

    #[test]
    fn key_info_from_headers_expected_all_fields() {
        let info = key_info_from_headers(&object_response()).expect("headers should parse");
        assert_eq!(info.version, "v-1");
        assert_eq!(info.created_at.to_rfc3339(), "2026-01-02T03:04:05+00:00");
        assert_eq!(info.version_created_at, info.created_at);
        assert_eq!(info.user_ids, vec![1, 2]);
        assert_eq!(info.metadata.get("tier"), Some(&json!("gold")));
    }

    #[test]
    fn key_info_from_headers_missing_etag_expected_malformed() {
        let mut response = object_response();
        response.headers.remove(HEADER_ETAG);
        let error = key_info_from_headers(&response).expect_err("etag is required");
        assert_eq!(error.code(), 504);
    }

    #[test]
    fn key_info_from_headers_bad_user_ids_expected_attribute_shape_invalid() {
        let response = object_response().with_header(HEADER_USER_IDS, r#"["alice"]"#);
        let error = key_info_from_headers(&response).expect_err("user ids must be integers");
        assert!(matches!(error, DataStoreError::AttributeShapeInvalid(_)));
    }

    #[test]
    fn parse_attributes_array_expected_attribute_shape_invalid() {
        assert!(matches!(
            parse_attributes("[1]"),
            Err(DataStoreError::AttributeShapeInvalid(_))
        ));
        assert_eq!(parse_attributes("").expect("empty is allowed"), Map::new());
    }

    #[test]
    fn json_body_garbage_expected_cannot_parse_response() {
        let response = WireResponse::new(200).with_body("<html>");
        assert_eq!(json_body(&response).expect_err("html is not json").code(), 501);
    }

    #[test]
    fn legacy_read_payload_empty_data_expected_none() {
        assert_eq!(
            legacy_read_payload(br#"{"data": []}"#).expect("empty data is valid"),
            None
        );
        assert_eq!(
            legacy_read_payload(br#"{"data": [{"Key": {}, "Value": "5"}]}"#)
                .expect("entry should parse"),
            Some(LegacyEntry {
                payload: Payload::Text("5".to_string()),
                raw: "5".to_string(),
            })
        );
    }

    #[test]
    fn legacy_read_payload_expanded_value_expected_raw_text_kept() {
        let entry = legacy_read_payload(br#"{"data":[{"Value":{"b":1,"a":2}}]}"#)
            .expect("entry should parse")
            .expect("entry should exist");
        assert_eq!(entry.raw, r#"{"b":1,"a":2}"#);
        assert_eq!(entry.payload, Payload::Json(json!({"a": 2, "b": 1})));
    }

    #[test]
    fn legacy_read_payload_missing_data_expected_malformed() {
        let error = legacy_read_payload(br#"{"oops": true}"#).expect_err("data is required");
        assert!(matches!(error, DataStoreError::MalformedResponse(_)));
        let error = legacy_read_payload(b"<html>").expect_err("html is not json");
        assert!(matches!(error, DataStoreError::CannotParseResponse(_)));
    }

    #[test]
    fn parse_sorted_entry_accepts_both_layouts() {
        let v1 = parse_sorted_entry(&json!({"key": "a", "value": 1})).expect("v1 layout");
        let legacy = parse_sorted_entry(&json!({"Target": "a", "Value": 1})).expect("legacy layout");
        assert_eq!(v1, legacy);
        assert!(parse_sorted_entry(&json!({"key": "a", "value": "1"})).is_err());
    }

    #[test]
    fn parse_version_record_epoch_millis_expected_timestamp() {
        let record = parse_version_record(&json!({
            "version": "v-2",
            "deleted": true,
            "contentLength": 12,
            "createdTime": 1_700_000_000_000_i64,
        }))
        .expect("record should parse");
        assert!(record.is_deleted);
        assert_eq!(record.content_length, Some(12));
        assert_eq!(record.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(record.object_created_at, None);
    }
}
