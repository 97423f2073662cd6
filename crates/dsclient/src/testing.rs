//! In-memory backend speaking all three wire generations.

use crate::request::WireRequest;
use crate::response::{
    HEADER_ATTRIBUTES, HEADER_CREATED_TIME, HEADER_ETAG, HEADER_USER_IDS, HEADER_USN,
    HEADER_VERSION_CREATED_TIME, WireResponse, parse_attributes, parse_timestamp, parse_user_ids,
};
use crate::transport::{DataStoreTransport, TransportError};
use crate::types::{LEGACY_STORE_NAME, StoreKind};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chrono::{DateTime, SecondsFormat};
use md5::{Digest, Md5};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use url::{Url, form_urlencoded};

const CLOCK_START_MS: i64 = 1_700_000_000_000;
const CLOCK_STEP_MS: i64 = 1_000;

type MockResult = Result<WireResponse, WireResponse>;
type Query = HashMap<String, String>;

/// Fake persistence service. Clones share state, so a test can keep one
/// handle for assertions while a registry owns another.
#[derive(Clone, Debug, Default)]
pub struct MockDataStore {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    clock_ms: i64,
    next_version: u64,
    stores: BTreeMap<(String, StoreKind), MockStore>,
    dropped: BTreeSet<(String, StoreKind)>,
    requests: Vec<WireRequest>,
    scripted: VecDeque<Result<WireResponse, TransportError>>,
}

#[derive(Clone, Debug)]
struct MockStore {
    created_ms: i64,
    objects: BTreeMap<String, MockObject>,
}

#[derive(Clone, Debug)]
struct MockObject {
    created_ms: i64,
    versions: Vec<MockVersion>,
}

/// `raw` is `None` for the marker a removal leaves behind.
#[derive(Clone, Debug)]
struct MockVersion {
    id: String,
    raw: Option<String>,
    created_ms: i64,
    user_ids: Vec<i64>,
    metadata: Map<String, Value>,
    deleted: bool,
}

impl MockVersion {
    fn is_deleted(&self) -> bool {
        self.deleted || self.raw.is_none()
    }
}

impl MockObject {
    fn live(&self) -> Option<&MockVersion> {
        self.versions.last().filter(|version| !version.is_deleted())
    }
}

impl MockDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.state().requests.clone()
    }

    /// Recorded requests that could change state.
    pub fn write_requests(&self) -> Vec<WireRequest> {
        self.state()
            .requests
            .iter()
            .filter(|request| request.method != reqwest::Method::GET)
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    /// Answers the next request with `response` instead of the emulated
    /// service.
    pub fn push_response(&self, response: WireResponse) {
        self.state().scripted.push_back(Ok(response));
    }

    pub fn fail_transport_next(&self, message: impl Into<String>) {
        self.state()
            .scripted
            .push_back(Err(TransportError(message.into())));
    }

    /// Stores `raw` as a new version without going through a request, as a
    /// concurrent writer would.
    pub fn write_out_of_band(
        &self,
        name: &str,
        kind: StoreKind,
        object_key: &str,
        raw: impl Into<String>,
    ) {
        self.state()
            .put(name, kind, object_key, Some(raw.into()), Vec::new(), Map::new());
    }

    pub fn drop_store(&self, name: &str, kind: StoreKind) {
        let mut state = self.state();
        state.stores.remove(&(name.to_string(), kind));
        state.dropped.insert((name.to_string(), kind));
    }

    /// Current serialized value of `object_key` (`scope/key`).
    pub fn stored_raw(&self, name: &str, kind: StoreKind, object_key: &str) -> Option<String> {
        self.state()
            .object(name, kind, object_key)
            .and_then(MockObject::live)
            .and_then(|version| version.raw.clone())
    }

    pub fn version_count(&self, name: &str, kind: StoreKind, object_key: &str) -> usize {
        self.state()
            .object(name, kind, object_key)
            .map_or(0, |object| object.versions.len())
    }
}

#[async_trait]
impl DataStoreTransport for MockDataStore {
    async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| TransportError("mock backend mutex poisoned".to_string()))?;
        state.requests.push(request.clone());
        if let Some(scripted) = state.scripted.pop_front() {
            return scripted;
        }
        Ok(state.handle(&request).unwrap_or_else(|error| error))
    }
}

impl MockState {
    fn tick(&mut self) -> i64 {
        if self.clock_ms == 0 {
            self.clock_ms = CLOCK_START_MS;
        } else {
            self.clock_ms += CLOCK_STEP_MS;
        }
        self.clock_ms
    }

    fn allocate_version(&mut self) -> String {
        self.next_version += 1;
        format!("v{:08}", self.next_version)
    }

    fn object(&self, name: &str, kind: StoreKind, object_key: &str) -> Option<&MockObject> {
        self.stores
            .get(&(name.to_string(), kind))?
            .objects
            .get(object_key)
    }

    fn live(&self, name: &str, kind: StoreKind, object_key: &str) -> Option<&MockVersion> {
        self.object(name, kind, object_key)
            .and_then(MockObject::live)
    }

    /// Appends a version and returns it with the object's creation time.
    fn put(
        &mut self,
        name: &str,
        kind: StoreKind,
        object_key: &str,
        raw: Option<String>,
        user_ids: Vec<i64>,
        metadata: Map<String, Value>,
    ) -> (MockVersion, i64) {
        let now = self.tick();
        let id = self.allocate_version();
        self.dropped.remove(&(name.to_string(), kind));
        let store = self
            .stores
            .entry((name.to_string(), kind))
            .or_insert_with(|| MockStore {
                created_ms: now,
                objects: BTreeMap::new(),
            });
        let object = store
            .objects
            .entry(object_key.to_string())
            .or_insert_with(|| MockObject {
                created_ms: now,
                versions: Vec::new(),
            });
        let version = MockVersion {
            id,
            raw,
            created_ms: now,
            user_ids,
            metadata,
            deleted: false,
        };
        object.versions.push(version.clone());
        (version, object.created_ms)
    }

    fn handle(&mut self, request: &WireRequest) -> MockResult {
        let url = Url::parse(&request.url).map_err(|_| error_response(400, "unparseable url"))?;
        let segments: Vec<String> = url
            .path_segments()
            .map(|segments| segments.map(ToOwned::to_owned).collect())
            .unwrap_or_default();
        let query: Query = url.query_pairs().into_owned().collect();
        let position = segments
            .iter()
            .position(|segment| segment == "persistence")
            .ok_or_else(|| error_response(404, "unknown service"))?;
        let route: Vec<&str> = segments[position + 1..]
            .iter()
            .map(String::as_str)
            .collect();
        let method = request.method.as_str();

        match position.checked_sub(1).map(|index| segments[index].as_str()) {
            Some("v2") => self.handle_v2(&route, method, request, &query),
            Some("v1") => self.handle_v1(&route, method, request, &query),
            _ => self.handle_legacy(&route, method, request, &query),
        }
    }

    fn handle_v2(
        &mut self,
        route: &[&str],
        method: &str,
        request: &WireRequest,
        query: &Query,
    ) -> MockResult {
        match (route, method) {
            ([_, "datastores"], "GET") => self.v2_list_stores(query),
            ([_, "datastores", "objects"], "GET") => self.v2_list_keys(query),
            ([_, "datastores", "objects", "object"], "GET") => self.v2_get(query),
            ([_, "datastores", "objects", "object"], "POST") => self.v2_set(request, query),
            ([_, "datastores", "objects", "object"], "DELETE") => self.v2_delete(query),
            ([_, "datastores", "objects", "object", "increment"], "POST") => {
                self.v2_increment(request, query)
            }
            ([_, "datastores", "objects", "object", "versions"], "GET") => {
                self.v2_list_versions(query)
            }
            _ => Err(error_response(404, "unknown route")),
        }
    }

    fn v2_get(&self, query: &Query) -> MockResult {
        let name = param(query, "datastore")?;
        let object_key = param(query, "objectKey")?;
        let object = self.object(name, StoreKind::Standard, object_key);
        let version = match query.get("version") {
            Some(id) => object.and_then(|object| {
                object
                    .versions
                    .iter()
                    .find(|version| &version.id == id && !version.is_deleted())
            }),
            None => object.and_then(MockObject::live),
        };
        match (object, version) {
            (Some(object), Some(version)) => Ok(object_response(object.created_ms, version)),
            _ => Err(error_response(404, "object not found")),
        }
    }

    fn v2_set(&mut self, request: &WireRequest, query: &Query) -> MockResult {
        let name = param(query, "datastore")?;
        let object_key = param(query, "objectKey")?;
        let body = request.body_text().unwrap_or_default();
        let expected_md5 = BASE64_STANDARD.encode(Md5::digest(body.as_bytes()));
        if request.header("Content-MD5") != Some(expected_md5.as_str()) {
            return Err(error_response(400, "content md5 mismatch"));
        }
        ensure_json(&body)?;

        let current = self
            .live(name, StoreKind::Standard, object_key)
            .map(|version| version.id.clone());
        if let Some(expected) = request.header("If-Match") {
            if current.as_deref() != Some(expected) {
                return Err(error_response(412, "precondition failed"));
            }
        }
        if request.header("If-None-Match") == Some("*") && current.is_some() {
            return Err(error_response(412, "object already exists"));
        }

        let (user_ids, metadata) = attributes(request)?;
        let content_length = body.len();
        let (version, created_ms) = self.put(
            name,
            StoreKind::Standard,
            object_key,
            Some(body),
            user_ids,
            metadata,
        );
        Ok(WireResponse::json(
            200,
            &json!({
                "version": version.id,
                "deleted": false,
                "contentLength": content_length,
                "createdTime": timestamp(version.created_ms),
                "objectCreatedTime": timestamp(created_ms),
            }),
        ))
    }

    fn v2_increment(&mut self, request: &WireRequest, query: &Query) -> MockResult {
        let name = param(query, "datastore")?;
        let object_key = param(query, "objectKey")?;
        let delta = parse_param::<i64>(query, "incrementBy")?;
        let current = self
            .live(name, StoreKind::Standard, object_key)
            .and_then(|version| version.raw.clone());
        let next = incremented(current.as_deref(), delta)?;
        let (user_ids, metadata) = attributes(request)?;
        let (version, created_ms) = self.put(
            name,
            StoreKind::Standard,
            object_key,
            Some(next.to_string()),
            user_ids,
            metadata,
        );
        Ok(object_response(created_ms, &version))
    }

    fn v2_delete(&mut self, query: &Query) -> MockResult {
        let name = param(query, "datastore")?;
        let object_key = param(query, "objectKey")?;

        if let Some(id) = query.get("version") {
            let object = self
                .stores
                .get_mut(&(name.to_string(), StoreKind::Standard))
                .and_then(|store| store.objects.get_mut(object_key))
                .ok_or_else(|| error_response(404, "object not found"))?;
            if object.live().is_some_and(|version| &version.id == id) {
                return Err(error_response(400, "the current version can't be deleted"));
            }
            let version = object
                .versions
                .iter_mut()
                .find(|version| &version.id == id)
                .ok_or_else(|| error_response(404, "version not found"))?;
            version.deleted = true;
            return Ok(WireResponse::new(204));
        }

        let Some(object) = self.object(name, StoreKind::Standard, object_key) else {
            return Ok(WireResponse::new(204));
        };
        let created_ms = object.created_ms;
        let Some(previous) = object.live().cloned() else {
            return Ok(WireResponse::new(204));
        };
        self.put(name, StoreKind::Standard, object_key, None, Vec::new(), Map::new());
        Ok(object_response(created_ms, &previous))
    }

    fn v2_list_versions(&self, query: &Query) -> MockResult {
        let name = param(query, "datastore")?;
        let object_key = param(query, "objectKey")?;
        let page_size = parse_param::<usize>(query, "maxItemsToReturn")?;
        let start = time_param(query, "startTime")?;
        let end = time_param(query, "endTime")?;
        let Some(object) = self.object(name, StoreKind::Standard, object_key) else {
            return Ok(WireResponse::json(
                200,
                &json!({"versions": [], "lastReturnedKey": ""}),
            ));
        };

        let mut versions: Vec<Value> = object
            .versions
            .iter()
            .filter(|version| start.is_none_or(|start| version.created_ms >= start))
            .filter(|version| end.is_none_or(|end| version.created_ms <= end))
            .map(|version| {
                json!({
                    "version": version.id,
                    "deleted": version.is_deleted(),
                    "contentLength": version.raw.as_ref().map_or(0, String::len),
                    "createdTime": timestamp(version.created_ms),
                    "objectCreatedTime": timestamp(object.created_ms),
                })
            })
            .collect();
        if query.get("sortOrder").map(String::as_str) == Some("Descending") {
            versions.reverse();
        }
        let (page, cursor) = paginate(&versions, query, page_size)?;
        Ok(WireResponse::json(
            200,
            &json!({"versions": page, "lastReturnedKey": cursor}),
        ))
    }

    fn v2_list_keys(&self, query: &Query) -> MockResult {
        let name = param(query, "datastore")?;
        let page_size = parse_param::<usize>(query, "maxItemsToReturn")?;
        let prefix = query.get("prefix").map(String::as_str).unwrap_or_default();
        let keys: Vec<Value> = self
            .stores
            .get(&(name.to_string(), StoreKind::Standard))
            .map(|store| {
                store
                    .objects
                    .iter()
                    .filter(|(key, object)| key.starts_with(prefix) && object.live().is_some())
                    .map(|(key, _)| json!({"key": key}))
                    .collect()
            })
            .unwrap_or_default();
        let (page, cursor) = paginate(&keys, query, page_size)?;
        Ok(WireResponse::json(
            200,
            &json!({"keys": page, "lastReturnedKey": cursor}),
        ))
    }

    fn v2_list_stores(&self, query: &Query) -> MockResult {
        let page_size = parse_param::<usize>(query, "maxItemsToReturn")?;
        let prefix = query.get("prefix").map(String::as_str).unwrap_or_default();
        let stores: Vec<Value> = self
            .stores
            .iter()
            .filter(|((name, kind), _)| {
                *kind == StoreKind::Standard && name != LEGACY_STORE_NAME && name.starts_with(prefix)
            })
            .map(|((name, _), store)| {
                json!({"name": name, "createdTime": timestamp(store.created_ms)})
            })
            .collect();
        let (page, cursor) = paginate(&stores, query, page_size)?;
        Ok(WireResponse::json(
            200,
            &json!({"datastores": page, "lastReturnedKey": cursor}),
        ))
    }

    fn handle_v1(
        &mut self,
        route: &[&str],
        method: &str,
        request: &WireRequest,
        query: &Query,
    ) -> MockResult {
        match (route, method) {
            (["sorted", "list"], "GET") => self.sorted_list(query, false),
            ([kind], "GET") => {
                let (name, kind, object_key) = v1_address(kind, query)?;
                Ok(match self.live(&name, kind, &object_key) {
                    Some(version) => usn_response(version, version.raw.clone()),
                    None => WireResponse::new(204),
                })
            }
            ([kind], "POST") => self.v1_set(kind, request, query),
            ([kind, "increment"], "POST") => {
                let (name, kind, object_key) = v1_address(kind, query)?;
                let delta = parse_param::<i64>(query, "incrementBy")?;
                let current = self
                    .live(&name, kind, &object_key)
                    .and_then(|version| version.raw.clone());
                let next = incremented(current.as_deref(), delta)?.to_string();
                let (version, _) =
                    self.put(&name, kind, &object_key, Some(next), Vec::new(), Map::new());
                Ok(usn_response(&version, version.raw.clone()))
            }
            ([kind, "remove"], "POST") => {
                let (name, kind, object_key) = v1_address(kind, query)?;
                let Some(previous) = self.live(&name, kind, &object_key).cloned() else {
                    return Ok(WireResponse::new(204));
                };
                self.put(&name, kind, &object_key, None, Vec::new(), Map::new());
                Ok(usn_response(&previous, previous.raw.clone()))
            }
            _ => Err(error_response(404, "unknown route")),
        }
    }

    fn v1_set(&mut self, kind: &str, request: &WireRequest, query: &Query) -> MockResult {
        let (name, kind, object_key) = v1_address(kind, query)?;
        let body = request.body_text().unwrap_or_default();
        ensure_storable(kind, &body)?;

        let current = self
            .live(&name, kind, &object_key)
            .map(|version| version.id.clone());
        if let Some(expected) = query.get("usn") {
            let matches = if expected.is_empty() {
                current.is_none()
            } else {
                current.as_deref() == Some(expected.as_str())
            };
            if !matches {
                return Err(error_response(409, "usn mismatch"));
            }
        }

        let (version, _) = self.put(&name, kind, &object_key, Some(body), Vec::new(), Map::new());
        Ok(usn_response(&version, version.raw.clone()))
    }

    fn handle_legacy(
        &mut self,
        route: &[&str],
        method: &str,
        request: &WireRequest,
        query: &Query,
    ) -> MockResult {
        match (route, method) {
            (["getV2"], "GET") => self.legacy_get(request, query),
            (["set"], "POST") => self.legacy_set(request, query),
            (["increment"], "POST") => {
                let (name, kind, object_key) = legacy_address(query)?;
                let delta = parse_param::<i64>(query, "value")?;
                let current = self
                    .live(&name, kind, &object_key)
                    .and_then(|version| version.raw.clone());
                let next = incremented(current.as_deref(), delta)?;
                self.put(
                    &name,
                    kind,
                    &object_key,
                    Some(next.to_string()),
                    Vec::new(),
                    Map::new(),
                );
                Ok(WireResponse::json(200, &json!({"data": next})))
            }
            (["remove"], "POST") => {
                let (name, kind, object_key) = legacy_address(query)?;
                let previous = self
                    .live(&name, kind, &object_key)
                    .and_then(|version| version.raw.clone());
                if previous.is_some() {
                    self.put(&name, kind, &object_key, None, Vec::new(), Map::new());
                }
                Ok(WireResponse::json(200, &json!({"data": previous})))
            }
            (["getSortedValues"], "GET") => self.sorted_list(query, true),
            _ => Err(error_response(404, "unknown route")),
        }
    }

    fn legacy_get(&self, request: &WireRequest, query: &Query) -> MockResult {
        let kind = kind_param(query)?;
        let body: Query = form_urlencoded::parse(request.body.as_deref().unwrap_or_default())
            .into_owned()
            .collect();
        let scope = param(&body, "qkeys[0].scope")?;
        let target = param(&body, "qkeys[0].target")?;
        let key = param(&body, "qkeys[0].key")?;
        let (name, object_key) = legacy_object(key, target, scope);

        let data = match self
            .live(&name, kind, &object_key)
            .and_then(|version| version.raw.clone())
        {
            Some(raw) => json!([{
                "Key": {"Scope": scope, "Target": target, "Key": key},
                "Value": raw,
            }]),
            None => json!([]),
        };
        Ok(WireResponse::json(200, &json!({ "data": data })))
    }

    fn legacy_set(&mut self, request: &WireRequest, query: &Query) -> MockResult {
        let (name, kind, object_key) = legacy_address(query)?;
        let body: Query = form_urlencoded::parse(request.body.as_deref().unwrap_or_default())
            .into_owned()
            .collect();
        let value = param(&body, "value")?.to_string();
        if parse_param::<usize>(query, "valueLength")? != value.len() {
            return Err(error_response(400, "valueLength does not match the value"));
        }
        ensure_storable(kind, &value)?;

        if let Some(expected) = body.get("expectedValue") {
            let current = self
                .live(&name, kind, &object_key)
                .and_then(|version| version.raw.clone())
                .unwrap_or_default();
            if &current != expected {
                return Err(error_response(409, "expected value does not match"));
            }
        }

        self.put(
            &name,
            kind,
            &object_key,
            Some(value.clone()),
            Vec::new(),
            Map::new(),
        );
        Ok(WireResponse::json(200, &json!({ "data": value })))
    }

    fn sorted_list(&self, query: &Query, legacy: bool) -> MockResult {
        let name = param(query, "key")?;
        let scope = param(query, "scope")?;
        if self.dropped.contains(&(name.to_string(), StoreKind::Sorted)) {
            return Err(error_response(404, "ordered data store not found"));
        }
        let page_size = parse_param::<usize>(query, if legacy { "pageSize" } else { "maxItems" })?;
        let ascending = param(query, "ascending")?.eq_ignore_ascii_case("true");
        let min = optional_param::<f64>(query, "inclusiveMinValue")?;
        let max = optional_param::<f64>(query, "inclusiveMaxValue")?;

        let prefix = format!("{scope}/");
        let mut entries: Vec<(String, Value)> = self
            .stores
            .get(&(name.to_string(), StoreKind::Sorted))
            .map(|store| {
                store
                    .objects
                    .iter()
                    .filter_map(|(object_key, object)| {
                        let key = object_key.strip_prefix(&prefix)?;
                        let raw = object.live()?.raw.as_deref()?;
                        let value: Value = serde_json::from_str(raw).ok()?;
                        let number = value.as_f64()?;
                        let in_range = min.is_none_or(|min| number >= min)
                            && max.is_none_or(|max| number <= max);
                        in_range.then(|| (key.to_string(), value))
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|(left_key, left), (right_key, right)| {
            let left = left.as_f64().unwrap_or_default();
            let right = right.as_f64().unwrap_or_default();
            left.total_cmp(&right).then_with(|| left_key.cmp(right_key))
        });
        if !ascending {
            entries.reverse();
        }

        let items: Vec<Value> = entries
            .into_iter()
            .map(|(key, value)| {
                if legacy {
                    json!({"Target": key, "Value": value})
                } else {
                    json!({"key": key, "value": value})
                }
            })
            .collect();
        let (page, cursor) = paginate(&items, query, page_size)?;
        let listing = json!({"entries": page, "lastEvaluatedKey": cursor});
        if legacy {
            Ok(WireResponse::json(200, &json!({ "data": listing })))
        } else {
            Ok(WireResponse::json(200, &listing))
        }
    }
}

fn error_response(status: u16, message: &str) -> WireResponse {
    WireResponse::json(
        status,
        &json!({"errors": [{"code": status, "message": message}]}),
    )
}

fn param<'a>(query: &'a Query, name: &str) -> Result<&'a str, WireResponse> {
    query
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| error_response(400, &format!("missing parameter '{name}'")))
}

fn parse_param<T: std::str::FromStr>(query: &Query, name: &str) -> Result<T, WireResponse> {
    param(query, name)?
        .parse()
        .map_err(|_| error_response(400, &format!("invalid parameter '{name}'")))
}

fn optional_param<T: std::str::FromStr>(query: &Query, name: &str) -> Result<Option<T>, WireResponse> {
    match query.get(name) {
        Some(_) => parse_param(query, name).map(Some),
        None => Ok(None),
    }
}

fn time_param(query: &Query, name: &str) -> Result<Option<i64>, WireResponse> {
    match query.get(name) {
        Some(raw) => parse_timestamp(raw)
            .map(|time| Some(time.timestamp_millis()))
            .ok_or_else(|| error_response(400, &format!("invalid time '{name}'"))),
        None => Ok(None),
    }
}

fn kind_param(query: &Query) -> Result<StoreKind, WireResponse> {
    StoreKind::parse(param(query, "type")?)
        .ok_or_else(|| error_response(400, "unknown data store type"))
}

fn v1_address(kind: &str, query: &Query) -> Result<(String, StoreKind, String), WireResponse> {
    let kind = StoreKind::parse(kind).ok_or_else(|| error_response(404, "unknown route"))?;
    let name = param(query, "key")?;
    let scope = param(query, "scope")?;
    let target = param(query, "target")?;
    Ok((name.to_string(), kind, format!("{scope}/{target}")))
}

fn legacy_address(query: &Query) -> Result<(String, StoreKind, String), WireResponse> {
    let kind = kind_param(query)?;
    let (name, object_key) = legacy_object(
        param(query, "key")?,
        param(query, "target")?,
        param(query, "scope")?,
    );
    Ok((name, kind, object_key))
}

/// The unnamed store sends its entry key as `key` with an empty `target`.
fn legacy_object(key: &str, target: &str, scope: &str) -> (String, String) {
    if target.is_empty() {
        (LEGACY_STORE_NAME.to_string(), format!("{scope}/{key}"))
    } else {
        (key.to_string(), format!("{scope}/{target}"))
    }
}

fn ensure_json(raw: &str) -> Result<Value, WireResponse> {
    serde_json::from_str(raw).map_err(|_| error_response(400, "value is not JSON"))
}

fn ensure_storable(kind: StoreKind, raw: &str) -> Result<(), WireResponse> {
    let value = ensure_json(raw)?;
    if kind == StoreKind::Sorted && !value.is_number() {
        return Err(error_response(400, "sorted values must be numbers"));
    }
    Ok(())
}

fn attributes(request: &WireRequest) -> Result<(Vec<i64>, Map<String, Value>), WireResponse> {
    let user_ids = parse_user_ids(request.header("Roblox-Object-UserIds").unwrap_or_default())
        .map_err(|err| error_response(400, &err.to_string()))?;
    let metadata = parse_attributes(request.header("Roblox-Object-Attributes").unwrap_or_default())
        .map_err(|err| error_response(400, &err.to_string()))?;
    Ok((user_ids, metadata))
}

fn incremented(current: Option<&str>, delta: i64) -> Result<Value, WireResponse> {
    let Some(raw) = current else {
        return Ok(Value::from(delta));
    };
    let value = ensure_json(raw)?;
    if let Some(integer) = value.as_i64() {
        return integer
            .checked_add(delta)
            .map(Value::from)
            .ok_or_else(|| error_response(400, "increment overflows"));
    }
    value
        .as_f64()
        .map(|number| json!(number + delta as f64))
        .ok_or_else(|| error_response(400, "stored value is not a number"))
}

fn paginate(items: &[Value], query: &Query, page_size: usize) -> Result<(Vec<Value>, String), WireResponse> {
    if page_size == 0 {
        return Err(error_response(400, "page size must be positive"));
    }
    let offset = optional_param::<usize>(query, "exclusiveStartKey")?.unwrap_or(0);
    let end = offset.saturating_add(page_size).min(items.len());
    let page = items.get(offset..end).map(<[Value]>::to_vec).unwrap_or_default();
    let cursor = if end < items.len() {
        end.to_string()
    } else {
        String::new()
    };
    Ok((page, cursor))
}

fn timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

fn object_response(object_created_ms: i64, version: &MockVersion) -> WireResponse {
    WireResponse::new(200)
        .with_header("content-type", "application/json")
        .with_header(HEADER_ETAG, version.id.clone())
        .with_header(HEADER_CREATED_TIME, timestamp(object_created_ms))
        .with_header(HEADER_VERSION_CREATED_TIME, timestamp(version.created_ms))
        .with_header(HEADER_USER_IDS, Value::from(version.user_ids.clone()).to_string())
        .with_header(
            HEADER_ATTRIBUTES,
            Value::Object(version.metadata.clone()).to_string(),
        )
        .with_body(version.raw.clone().unwrap_or_default())
}

fn usn_response(version: &MockVersion, body: Option<String>) -> WireResponse {
    WireResponse::new(200)
        .with_header("content-type", "application/json")
        .with_header(HEADER_USN, version.id.clone())
        .with_body(body.unwrap_or_default())
}
