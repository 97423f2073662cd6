use crate::codec::{self, Payload};
use crate::config::DataStoreConfig;
use crate::errors::{DataStoreError, DataStoreResult};
use crate::events::{UpdateEvent, UpdateNotifier, UpdateSubscription};
use crate::pages::{PageLayout, Pages};
use crate::request::{Precondition, RequestBuilder, SortedQuery, VersionQuery, WireRequest};
use crate::response::{
    HEADER_USN, WireResponse, embedded_payload, expect_success, json_body, key_info_from_headers,
    key_info_from_write, legacy_data, legacy_read_payload, parse_key_record, parse_sorted_entry,
    parse_version_record,
};
use crate::transport::DataStoreTransport;
use crate::types::{
    KeyInfo, KeyRecord, ProtocolGeneration, ResolvedKey, SortDirection, SortedEntry,
    StoreIdentity, StoredValue, UpdateOutcome, VersionRecord, WriteOptions,
};
use crate::update;
use crate::validation;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// What a read observed: the current entry, if any, and the precondition a
/// follow-up conditional write has to carry.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Observed {
    pub stored: Option<StoredValue>,
    pub precondition: Precondition,
}

/// Shared machinery behind both store facades.
pub(crate) struct StoreCore {
    identity: StoreIdentity,
    config: Arc<DataStoreConfig>,
    builder: RequestBuilder,
    transport: Arc<dyn DataStoreTransport>,
    notifier: Arc<UpdateNotifier>,
}

impl StoreCore {
    pub(crate) fn new(
        identity: StoreIdentity,
        config: Arc<DataStoreConfig>,
        builder: RequestBuilder,
        transport: Arc<dyn DataStoreTransport>,
    ) -> Self {
        Self {
            identity,
            config,
            builder,
            transport,
            notifier: UpdateNotifier::new(),
        }
    }

    pub(crate) fn identity(&self) -> &StoreIdentity {
        &self.identity
    }

    pub(crate) fn resolve(&self, key: &str) -> DataStoreResult<ResolvedKey> {
        validation::ensure_access(&self.config)?;
        validation::resolve_key(&self.config, &self.identity, key)
    }

    fn generation(&self) -> ProtocolGeneration {
        self.identity.wire_generation()
    }

    async fn execute(&self, request: WireRequest) -> DataStoreResult<WireResponse> {
        let method = request.method.clone();
        let url = request.url.clone();
        let response = self.transport.execute(request).await.map_err(|err| {
            tracing::debug!(%method, %url, error = %err, "data store request failed");
            DataStoreError::from(err)
        })?;
        tracing::debug!(%method, %url, status = response.status, "data store request");
        Ok(response)
    }

    fn decode(&self, payload: Payload) -> DataStoreResult<Value> {
        codec::decode_with_policy(payload, self.config.raw_payload_fallback).map_err(|failure| {
            DataStoreError::CannotParseResponse(format!("stored value is not JSON: {}", failure.reason))
        })
    }

    fn usn(response: &WireResponse) -> Option<String> {
        response
            .header(HEADER_USN)
            .filter(|usn| !usn.is_empty())
            .map(ToOwned::to_owned)
    }

    fn notify(&self, key: &str, value: Option<Value>, version: Option<&str>) {
        self.notifier.emit(UpdateEvent {
            key: key.to_string(),
            value,
            version: version.map(ToOwned::to_owned),
        });
    }

    pub(crate) fn subscribe(&self, key: &str) -> DataStoreResult<UpdateSubscription> {
        self.resolve(key)?;
        Ok(self.notifier.subscribe(key))
    }

    pub(crate) async fn read(&self, key: &ResolvedKey) -> DataStoreResult<Observed> {
        let response = self.execute(self.builder.get(&self.identity, key)?).await?;
        let absent = Observed {
            stored: None,
            precondition: Precondition::Absent,
        };

        match self.generation() {
            ProtocolGeneration::Legacy => {
                let response = expect_success(response)?;
                let Some(entry) = legacy_read_payload(&response.body)? else {
                    return Ok(absent);
                };
                Ok(Observed {
                    stored: Some(StoredValue {
                        value: self.decode(entry.payload)?,
                        info: None,
                        usn: None,
                    }),
                    precondition: Precondition::Token(entry.raw),
                })
            }
            ProtocolGeneration::V1 => {
                if response.is_absent() {
                    return Ok(absent);
                }
                let response = expect_success(response)?;
                let usn = Self::usn(&response);
                Ok(Observed {
                    stored: Some(StoredValue {
                        value: self.decode(Payload::Text(response.text()))?,
                        info: None,
                        usn: usn.clone(),
                    }),
                    precondition: Precondition::Token(usn.unwrap_or_default()),
                })
            }
            ProtocolGeneration::V2 => {
                if response.is_absent() {
                    return Ok(absent);
                }
                let response = expect_success(response)?;
                let info = key_info_from_headers(&response)?;
                let precondition = Precondition::Token(info.version.clone());
                Ok(Observed {
                    stored: Some(StoredValue {
                        value: self.decode(Payload::Text(response.text()))?,
                        info: Some(info),
                        usn: None,
                    }),
                    precondition,
                })
            }
        }
    }

    /// Validates and writes `value`. With a precondition the write only lands
    /// if the entry still matches what was observed.
    pub(crate) async fn write(
        &self,
        key: &str,
        resolved: &ResolvedKey,
        value: Value,
        options: &WriteOptions,
        precondition: Option<&Precondition>,
    ) -> DataStoreResult<StoredValue> {
        validation::ensure_value_allowed(&self.identity, &value)?;
        validation::ensure_user_ids(&self.config, &options.user_ids)?;
        if let Some(metadata) = options.metadata.as_ref() {
            validation::ensure_metadata(&self.config, metadata)?;
        }
        let serialized = codec::serialize(&value)
            .map_err(|err| DataStoreError::ValueNotAllowed(err.to_string()))?;
        validation::ensure_value_size(&self.config, self.generation(), &serialized)?;

        let request = self
            .builder
            .set(&self.identity, resolved, &serialized, options, precondition)?;
        let response = expect_success(self.execute(request).await?)?;

        let stored = match self.generation() {
            ProtocolGeneration::Legacy => {
                legacy_data(&json_body(&response)?)?;
                StoredValue {
                    value,
                    info: None,
                    usn: None,
                }
            }
            ProtocolGeneration::V1 => StoredValue {
                value,
                info: None,
                usn: Self::usn(&response),
            },
            ProtocolGeneration::V2 => {
                let info = key_info_from_write(
                    &json_body(&response)?,
                    options.user_ids.clone(),
                    options.metadata.clone().unwrap_or_default(),
                )?;
                StoredValue {
                    value,
                    info: Some(info),
                    usn: None,
                }
            }
        };
        self.notify(key, Some(stored.value.clone()), stored.version());
        Ok(stored)
    }

    pub(crate) async fn set(
        &self,
        key: &str,
        value: Value,
        options: &WriteOptions,
    ) -> DataStoreResult<StoredValue> {
        let resolved = self.resolve(key)?;
        self.write(key, &resolved, value, options, None).await
    }

    pub(crate) async fn get(&self, key: &str) -> DataStoreResult<Option<StoredValue>> {
        let resolved = self.resolve(key)?;
        Ok(self.read(&resolved).await?.stored)
    }

    pub(crate) async fn increment(
        &self,
        key: &str,
        delta: i64,
        options: &WriteOptions,
    ) -> DataStoreResult<StoredValue> {
        let resolved = self.resolve(key)?;
        validation::ensure_user_ids(&self.config, &options.user_ids)?;
        if let Some(metadata) = options.metadata.as_ref() {
            validation::ensure_metadata(&self.config, metadata)?;
        }

        let request = self
            .builder
            .increment(&self.identity, &resolved, delta, options)?;
        let response = expect_success(self.execute(request).await?)?;
        let stored = match self.generation() {
            ProtocolGeneration::Legacy => {
                let body = json_body(&response)?;
                let payload = embedded_payload(legacy_data(&body)?).ok_or_else(|| {
                    DataStoreError::MalformedResponse("increment returned no value".to_string())
                })?;
                StoredValue {
                    value: self.decode(payload)?,
                    info: None,
                    usn: None,
                }
            }
            ProtocolGeneration::V1 => StoredValue {
                value: self.decode(Payload::Text(response.text()))?,
                info: None,
                usn: Self::usn(&response),
            },
            ProtocolGeneration::V2 => StoredValue {
                value: self.decode(Payload::Text(response.text()))?,
                info: Some(key_info_from_headers(&response)?),
                usn: None,
            },
        };
        if !stored.value.is_number() {
            return Err(DataStoreError::MalformedResponse(format!(
                "increment returned a {}",
                validation::value_type_name(&stored.value)
            )));
        }
        self.notify(key, Some(stored.value.clone()), stored.version());
        Ok(stored)
    }

    pub(crate) async fn remove(&self, key: &str) -> DataStoreResult<Option<StoredValue>> {
        let resolved = self.resolve(key)?;
        let response = self
            .execute(self.builder.remove(&self.identity, &resolved)?)
            .await?;

        let previous = match self.generation() {
            ProtocolGeneration::Legacy => {
                let body = json_body(&expect_success(response)?)?;
                match embedded_payload(legacy_data(&body)?) {
                    Some(payload) => Some(StoredValue {
                        value: self.decode(payload)?,
                        info: None,
                        usn: None,
                    }),
                    None => None,
                }
            }
            ProtocolGeneration::V1 if response.is_absent() => None,
            ProtocolGeneration::V1 => {
                let response = expect_success(response)?;
                Some(StoredValue {
                    value: self.decode(Payload::Text(response.text()))?,
                    info: None,
                    usn: Self::usn(&response),
                })
            }
            ProtocolGeneration::V2 if response.is_absent() => None,
            ProtocolGeneration::V2 => {
                let response = expect_success(response)?;
                Some(StoredValue {
                    value: self.decode(Payload::Text(response.text()))?,
                    info: Some(key_info_from_headers(&response)?),
                    usn: None,
                })
            }
        };
        if previous.is_some() {
            self.notify(key, None, None);
        }
        Ok(previous)
    }
}

/// A standard data store: arbitrary JSON values, versioned on V2.
pub struct DataStore {
    core: StoreCore,
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("identity", self.core.identity())
            .finish()
    }
}

impl DataStore {
    pub(crate) fn new(core: StoreCore) -> Self {
        Self { core }
    }

    pub fn identity(&self) -> &StoreIdentity {
        self.core.identity()
    }

    pub fn name(&self) -> &str {
        self.core.identity().name()
    }

    pub fn scope(&self) -> &str {
        self.core.identity().scope()
    }

    pub async fn get(&self, key: &str) -> DataStoreResult<Option<StoredValue>> {
        self.core.get(key).await
    }

    /// Reads `key` and converts the stored JSON into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> DataStoreResult<Option<T>> {
        let Some(stored) = self.core.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_value(stored.value).map(Some).map_err(|err| {
            DataStoreError::CannotParseResponse(format!(
                "stored value for '{key}' has an unexpected shape: {err}"
            ))
        })
    }

    /// Unconditional write. Returns the new version (V2) or USN (V1).
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &WriteOptions,
    ) -> DataStoreResult<Option<String>> {
        let value = to_value(value)?;
        let stored = self.core.set(key, value, options).await?;
        Ok(stored.version().map(ToOwned::to_owned))
    }

    pub async fn increment(
        &self,
        key: &str,
        delta: i64,
        options: &WriteOptions,
    ) -> DataStoreResult<StoredValue> {
        self.core.increment(key, delta, options).await
    }

    /// Read, transform, and one conditional write. Returning `None` from
    /// `transform` cancels without writing.
    pub async fn update<F>(&self, key: &str, transform: F) -> DataStoreResult<StoredValue>
    where
        F: FnOnce(Option<Value>, Option<&KeyInfo>) -> Option<UpdateOutcome> + Send,
    {
        update::run_update(&self.core, key, transform).await
    }

    /// [`DataStore::update`] re-run on version conflicts, at most `attempts`
    /// times in total.
    pub async fn update_with_retry<F>(
        &self,
        key: &str,
        attempts: usize,
        transform: F,
    ) -> DataStoreResult<StoredValue>
    where
        F: FnMut(Option<Value>, Option<&KeyInfo>) -> Option<UpdateOutcome> + Send,
    {
        update::run_update_with_retry(&self.core, key, attempts, transform).await
    }

    pub async fn remove(&self, key: &str) -> DataStoreResult<Option<StoredValue>> {
        self.core.remove(key).await
    }

    pub async fn get_version(&self, key: &str, version: &str) -> DataStoreResult<StoredValue> {
        let resolved = self.core.resolve(key)?;
        let request = self
            .core
            .builder
            .get_version(self.identity(), &resolved, version)?;
        let response = self.core.execute(request).await?;
        if response.is_absent() {
            return Err(DataStoreError::KeyNotFound(format!(
                "{key} has no version {version}"
            )));
        }
        let response = expect_success(response)?;
        Ok(StoredValue {
            value: self.core.decode(Payload::Text(response.text()))?,
            info: Some(key_info_from_headers(&response)?),
            usn: None,
        })
    }

    /// The version that was current at `time`, if one existed and was not
    /// deleted.
    pub async fn get_version_at_time(
        &self,
        key: &str,
        time: DateTime<Utc>,
    ) -> DataStoreResult<Option<StoredValue>> {
        let query = VersionQuery {
            direction: SortDirection::Descending,
            min_date: None,
            max_date: Some(time),
            page_size: 1,
        };
        let pages = self.list_versions(key, query).await?;
        let Some(record) = pages.current_page().first() else {
            return Ok(None);
        };
        if record.is_deleted {
            return Ok(None);
        }
        self.get_version(key, &record.version).await.map(Some)
    }

    pub async fn remove_version(&self, key: &str, version: &str) -> DataStoreResult<()> {
        let resolved = self.core.resolve(key)?;
        let request = self
            .core
            .builder
            .remove_version(self.identity(), &resolved, version)?;
        expect_success(self.core.execute(request).await?)?;
        Ok(())
    }

    /// Keys starting with `prefix`. Scoped stores report keys without their
    /// `scope/` part.
    pub async fn list_keys(&self, prefix: &str, page_size: usize) -> DataStoreResult<Pages<KeyRecord>> {
        validation::ensure_access(&self.core.config)?;
        validation::ensure_page_size(&self.core.config, page_size)?;
        let base = self.core.builder.list_keys(self.identity(), prefix, page_size)?;
        let strip = (!self.identity().all_scopes()).then(|| format!("{}/", self.scope()));
        Pages::open(
            Arc::clone(&self.core.transport),
            base,
            PageLayout::new("keys", "lastReturnedKey"),
            move |item| {
                let mut record = parse_key_record(item)?;
                if let Some(stripped) = strip
                    .as_deref()
                    .and_then(|scope| record.key.strip_prefix(scope))
                {
                    record.key = stripped.to_string();
                }
                Ok(record)
            },
        )
        .await
    }

    pub async fn list_versions(
        &self,
        key: &str,
        query: VersionQuery,
    ) -> DataStoreResult<Pages<VersionRecord>> {
        let resolved = self.core.resolve(key)?;
        validation::ensure_page_size(&self.core.config, query.page_size)?;
        if let (Some(min), Some(max)) = (query.min_date, query.max_date) {
            if min > max {
                return Err(DataStoreError::InvalidArgument(
                    "version range starts after it ends".to_string(),
                ));
            }
        }
        let base = self
            .core
            .builder
            .list_versions(self.identity(), &resolved, &query)?;
        Pages::open(
            Arc::clone(&self.core.transport),
            base,
            PageLayout::new("versions", "lastReturnedKey"),
            parse_version_record,
        )
        .await
    }

    /// Events for writes made through this store to `key`.
    pub fn subscribe(&self, key: &str) -> DataStoreResult<UpdateSubscription> {
        self.core.subscribe(key)
    }
}

/// A data store holding numbers, listable in value order.
pub struct OrderedDataStore {
    core: StoreCore,
}

impl std::fmt::Debug for OrderedDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedDataStore")
            .field("identity", self.core.identity())
            .finish()
    }
}

impl OrderedDataStore {
    pub(crate) fn new(core: StoreCore) -> Self {
        Self { core }
    }

    pub fn identity(&self) -> &StoreIdentity {
        self.core.identity()
    }

    pub fn name(&self) -> &str {
        self.core.identity().name()
    }

    pub fn scope(&self) -> &str {
        self.core.identity().scope()
    }

    pub async fn get(&self, key: &str) -> DataStoreResult<Option<StoredValue>> {
        self.core.get(key).await
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> DataStoreResult<Option<String>> {
        let value = to_value(value)?;
        let stored = self
            .core
            .set(key, value, &WriteOptions::default())
            .await?;
        Ok(stored.version().map(ToOwned::to_owned))
    }

    pub async fn increment(&self, key: &str, delta: i64) -> DataStoreResult<StoredValue> {
        self.core
            .increment(key, delta, &WriteOptions::default())
            .await
    }

    pub async fn update<F>(&self, key: &str, transform: F) -> DataStoreResult<StoredValue>
    where
        F: FnOnce(Option<Value>, Option<&KeyInfo>) -> Option<UpdateOutcome> + Send,
    {
        update::run_update(&self.core, key, transform).await
    }

    pub async fn remove(&self, key: &str) -> DataStoreResult<Option<StoredValue>> {
        self.core.remove(key).await
    }

    /// Entries ordered by value. `min` and `max` are inclusive and must be
    /// whole numbers.
    pub async fn get_sorted(
        &self,
        ascending: bool,
        page_size: usize,
        min: Option<f64>,
        max: Option<f64>,
    ) -> DataStoreResult<Pages<SortedEntry>> {
        validation::ensure_access(&self.core.config)?;
        validation::ensure_page_size(&self.core.config, page_size)?;
        let query = SortedQuery {
            ascending,
            page_size,
            min: validation::integer_bound(min)?,
            max: validation::integer_bound(max)?,
        };
        let base = self.core.builder.get_sorted_page(self.identity(), &query)?;
        let mut layout =
            PageLayout::new("entries", "lastEvaluatedKey").for_ordered_store(self.name());
        if self.identity().wire_generation() == ProtocolGeneration::Legacy {
            layout = layout.in_envelope("data");
        }
        Pages::open(
            Arc::clone(&self.core.transport),
            base,
            layout,
            parse_sorted_entry,
        )
        .await
    }

    pub fn subscribe(&self, key: &str) -> DataStoreResult<UpdateSubscription> {
        self.core.subscribe(key)
    }
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> DataStoreResult<Value> {
    serde_json::to_value(value).map_err(|err| DataStoreError::ValueNotAllowed(err.to_string()))
}
