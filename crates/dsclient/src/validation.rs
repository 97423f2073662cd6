//! Checks run before any request is built.

use crate::config::DataStoreConfig;
use crate::errors::{DataStoreError, DataStoreResult};
use crate::types::{ProtocolGeneration, ResolvedKey, StoreIdentity};
use serde_json::{Map, Value};

pub fn ensure_access(config: &DataStoreConfig) -> DataStoreResult<()> {
    if config.api_access_enabled {
        Ok(())
    } else {
        Err(DataStoreError::ApiAccessDisabled)
    }
}

pub fn validate_store_name(config: &DataStoreConfig, name: &str) -> DataStoreResult<()> {
    if name.is_empty() {
        return Err(DataStoreError::InvalidArgument(
            "data store name can't be empty".to_string(),
        ));
    }
    if name.chars().count() > config.max_name_length {
        return Err(DataStoreError::InvalidArgument(format!(
            "data store name exceeds the {} character limit",
            config.max_name_length
        )));
    }
    Ok(())
}

pub fn validate_scope(config: &DataStoreConfig, scope: &str) -> DataStoreResult<()> {
    if scope.is_empty() {
        return Err(DataStoreError::InvalidArgument("scope can't be empty".to_string()));
    }
    if scope.contains('/') {
        return Err(DataStoreError::InvalidArgument(format!(
            "scope can't contain '/': {scope}"
        )));
    }
    if scope.chars().count() > config.max_scope_length {
        return Err(DataStoreError::InvalidArgument(format!(
            "scope exceeds the {} character limit",
            config.max_scope_length
        )));
    }
    Ok(())
}

fn validate_key_name(config: &DataStoreConfig, key: &str) -> DataStoreResult<()> {
    if key.is_empty() {
        return Err(DataStoreError::KeyNameEmpty);
    }
    if key.chars().count() > config.max_key_length {
        return Err(DataStoreError::KeyNameTooLong {
            limit: config.max_key_length,
        });
    }
    Ok(())
}

/// Splits `key` into scope and name. All-scopes stores expect `scope/key`;
/// other stores use their own scope.
pub fn resolve_key(
    config: &DataStoreConfig,
    identity: &StoreIdentity,
    key: &str,
) -> DataStoreResult<ResolvedKey> {
    if !identity.all_scopes() {
        validate_key_name(config, key)?;
        return Ok(ResolvedKey {
            scope: identity.scope().to_string(),
            key: key.to_string(),
        });
    }

    if key.is_empty() {
        return Err(DataStoreError::KeyNameEmpty);
    }
    let Some((scope, name)) = key.split_once('/') else {
        return Err(DataStoreError::InvalidArgument(format!(
            "all-scopes keys must look like 'scope/key': {key}"
        )));
    };
    validate_scope(config, scope)?;
    validate_key_name(config, name)?;
    Ok(ResolvedKey {
        scope: scope.to_string(),
        key: name.to_string(),
    })
}

pub fn ensure_value_allowed(identity: &StoreIdentity, value: &Value) -> DataStoreResult<()> {
    if value.is_null() {
        return Err(DataStoreError::CannotStoreValue("null".to_string()));
    }
    if identity.is_ordered() && !value.is_number() {
        return Err(DataStoreError::ValueNotAllowed(format!(
            "ordered data stores only accept numbers, got {}",
            value_type_name(value)
        )));
    }
    Ok(())
}

pub fn ensure_value_size(
    config: &DataStoreConfig,
    generation: ProtocolGeneration,
    serialized: &str,
) -> DataStoreResult<()> {
    let limit = config.value_limit(generation);
    if serialized.len() > limit {
        return Err(DataStoreError::ValueTooLarge {
            size: serialized.len(),
            limit,
        });
    }
    Ok(())
}

pub fn ensure_user_ids(config: &DataStoreConfig, user_ids: &[i64]) -> DataStoreResult<()> {
    if user_ids.len() > config.max_user_ids {
        return Err(DataStoreError::UserIdsTooLarge {
            count: user_ids.len(),
            limit: config.max_user_ids,
        });
    }
    Ok(())
}

pub fn ensure_metadata(
    config: &DataStoreConfig,
    metadata: &Map<String, Value>,
) -> DataStoreResult<()> {
    let size = Value::Object(metadata.clone()).to_string().len();
    if size > config.max_metadata_bytes {
        return Err(DataStoreError::MetadataTooLarge {
            size,
            limit: config.max_metadata_bytes,
        });
    }
    Ok(())
}

pub fn ensure_page_size(config: &DataStoreConfig, size: usize) -> DataStoreResult<()> {
    if size < config.min_page_size || size > config.max_page_size {
        return Err(DataStoreError::PageSizeOutOfRange {
            size,
            min: config.min_page_size,
            max: config.max_page_size,
        });
    }
    Ok(())
}

/// Range bounds of ordered listings must be whole numbers.
pub fn integer_bound(bound: Option<f64>) -> DataStoreResult<Option<i64>> {
    match bound {
        None => Ok(None),
        Some(value)
            if value.is_finite()
                && value.fract() == 0.0
                && value >= i64::MIN as f64
                && value < i64::MAX as f64 =>
        {
            Ok(Some(value as i64))
        }
        Some(_) => Err(DataStoreError::BoundsNotIntegers),
    }
}

pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
