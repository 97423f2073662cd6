use crate::config::{DataStoreConfig, SessionContext};
use crate::errors::{DataStoreError, DataStoreResult};
use crate::types::{ProtocolGeneration, ResolvedKey, SortDirection, StoreIdentity, WriteOptions};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use md5::{Digest, Md5};
use reqwest::Method;
use std::sync::Arc;
use url::Url;
use url::form_urlencoded;

/// A fully described outbound call. Built once, executed by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl WireRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// A copy of this request with one more query pair appended.
    pub fn with_query(&self, name: &str, value: &str) -> DataStoreResult<WireRequest> {
        let mut url = parse_url(&self.url)?;
        url.query_pairs_mut().append_pair(name, value);
        let mut request = self.clone();
        request.url = url.to_string();
        Ok(request)
    }

    /// First decoded value of query parameter `name`.
    pub fn query_value(&self, name: &str) -> Option<String> {
        let url = Url::parse(&self.url).ok()?;
        url.query_pairs()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }
}

/// Write precondition: the version (V2), USN (V1) or previous raw payload
/// (legacy) observed by the read, or the observation that the key was absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Precondition {
    Absent,
    Token(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortedQuery {
    pub ascending: bool,
    pub page_size: usize,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VersionQuery {
    pub direction: SortDirection,
    pub min_date: Option<DateTime<Utc>>,
    pub max_date: Option<DateTime<Utc>>,
    pub page_size: usize,
}

/// Translates store operations into wire requests for the generation each
/// store speaks.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    config: Arc<DataStoreConfig>,
    session: Arc<SessionContext>,
}

impl RequestBuilder {
    pub fn new(config: Arc<DataStoreConfig>, session: Arc<SessionContext>) -> Self {
        Self { config, session }
    }

    pub fn config(&self) -> &DataStoreConfig {
        &self.config
    }

    pub fn get(&self, identity: &StoreIdentity, key: &ResolvedKey) -> DataStoreResult<WireRequest> {
        match identity.wire_generation() {
            ProtocolGeneration::Legacy => {
                let (legacy_key, target) = legacy_key_target(identity, key);
                let url = self.endpoint(
                    ProtocolGeneration::Legacy,
                    &["getV2"],
                    &[
                        ("placeId", self.session.place_id.to_string()),
                        ("type", identity.kind().as_str().to_string()),
                        ("scope", key.scope.clone()),
                    ],
                )?;
                let body = form_urlencoded::Serializer::new(String::new())
                    .append_pair("qkeys[0].scope", &key.scope)
                    .append_pair("qkeys[0].target", &target)
                    .append_pair("qkeys[0].key", &legacy_key)
                    .finish();
                Ok(self
                    .request(Method::GET, url)
                    .with_header("Content-Type", "application/x-www-form-urlencoded")
                    .with_body(body))
            }
            ProtocolGeneration::V1 => {
                let url = self.endpoint(
                    ProtocolGeneration::V1,
                    &[identity.kind().as_str()],
                    &v1_key_query(identity, key),
                )?;
                Ok(self.request(Method::GET, url))
            }
            ProtocolGeneration::V2 => {
                let url = self.object_endpoint(&["object"], identity, key, Vec::new())?;
                Ok(self.request(Method::GET, url))
            }
        }
    }

    /// A write of an already serialized value. `precondition` turns the write
    /// into a compare-and-set.
    pub fn set(
        &self,
        identity: &StoreIdentity,
        key: &ResolvedKey,
        serialized: &str,
        options: &WriteOptions,
        precondition: Option<&Precondition>,
    ) -> DataStoreResult<WireRequest> {
        match identity.wire_generation() {
            ProtocolGeneration::Legacy => {
                let mut query = self.legacy_key_query(identity, key);
                query.push(("valueLength", serialized.len().to_string()));
                let mut body = form_urlencoded::Serializer::new(String::new());
                body.append_pair("value", serialized);
                if let Some(precondition) = precondition {
                    let expected = match precondition {
                        Precondition::Absent => "",
                        Precondition::Token(raw) => raw.as_str(),
                    };
                    query.push(("expectedValueLength", expected.len().to_string()));
                    body.append_pair("expectedValue", expected);
                }
                let url = self.endpoint(ProtocolGeneration::Legacy, &["set"], &query)?;
                Ok(self
                    .request(Method::POST, url)
                    .with_header("Content-Type", "application/x-www-form-urlencoded")
                    .with_body(body.finish()))
            }
            ProtocolGeneration::V1 => {
                let mut query = v1_key_query(identity, key);
                if let Some(precondition) = precondition {
                    let usn = match precondition {
                        Precondition::Absent => String::new(),
                        Precondition::Token(usn) => usn.clone(),
                    };
                    query.push(("usn", usn));
                }
                let url = self.endpoint(
                    ProtocolGeneration::V1,
                    &[identity.kind().as_str()],
                    &query,
                )?;
                Ok(self
                    .request(Method::POST, url)
                    .with_header("Content-Type", "application/json")
                    .with_body(serialized))
            }
            ProtocolGeneration::V2 => {
                let url = self.object_endpoint(&["object"], identity, key, Vec::new())?;
                let mut request = self.v2_write(url, serialized, options);
                match precondition {
                    Some(Precondition::Token(version)) => {
                        request = request.with_header("If-Match", version.clone());
                    }
                    Some(Precondition::Absent) => {
                        request = request.with_header("If-None-Match", "*");
                    }
                    None => {}
                }
                Ok(request)
            }
        }
    }

    pub fn increment(
        &self,
        identity: &StoreIdentity,
        key: &ResolvedKey,
        delta: i64,
        options: &WriteOptions,
    ) -> DataStoreResult<WireRequest> {
        match identity.wire_generation() {
            ProtocolGeneration::Legacy => {
                let mut query = self.legacy_key_query(identity, key);
                query.push(("value", delta.to_string()));
                let url = self.endpoint(ProtocolGeneration::Legacy, &["increment"], &query)?;
                Ok(self.request(Method::POST, url))
            }
            ProtocolGeneration::V1 => {
                let mut query = v1_key_query(identity, key);
                query.push(("incrementBy", delta.to_string()));
                let url = self.endpoint(
                    ProtocolGeneration::V1,
                    &[identity.kind().as_str(), "increment"],
                    &query,
                )?;
                Ok(self.request(Method::POST, url))
            }
            ProtocolGeneration::V2 => {
                let url = self.object_endpoint(
                    &["object", "increment"],
                    identity,
                    key,
                    vec![("incrementBy", delta.to_string())],
                )?;
                let mut request = self
                    .request(Method::POST, url)
                    .with_header("Roblox-Object-UserIds", user_ids_header(&options.user_ids));
                if let Some(metadata) = options.metadata.as_ref() {
                    request = request.with_header(
                        "Roblox-Object-Attributes",
                        serde_json::Value::Object(metadata.clone()).to_string(),
                    );
                }
                Ok(request)
            }
        }
    }

    pub fn remove(
        &self,
        identity: &StoreIdentity,
        key: &ResolvedKey,
    ) -> DataStoreResult<WireRequest> {
        match identity.wire_generation() {
            ProtocolGeneration::Legacy => {
                let query = self.legacy_key_query(identity, key);
                let url = self.endpoint(ProtocolGeneration::Legacy, &["remove"], &query)?;
                Ok(self.request(Method::POST, url))
            }
            ProtocolGeneration::V1 => {
                let url = self.endpoint(
                    ProtocolGeneration::V1,
                    &[identity.kind().as_str(), "remove"],
                    &v1_key_query(identity, key),
                )?;
                Ok(self.request(Method::POST, url))
            }
            ProtocolGeneration::V2 => {
                let url = self.object_endpoint(&["object"], identity, key, Vec::new())?;
                Ok(self.request(Method::DELETE, url))
            }
        }
    }

    pub fn get_version(
        &self,
        identity: &StoreIdentity,
        key: &ResolvedKey,
        version: &str,
    ) -> DataStoreResult<WireRequest> {
        require_v2(identity, "get_version")?;
        let url = self.object_endpoint(
            &["object"],
            identity,
            key,
            vec![("version", version.to_string())],
        )?;
        Ok(self.request(Method::GET, url))
    }

    pub fn remove_version(
        &self,
        identity: &StoreIdentity,
        key: &ResolvedKey,
        version: &str,
    ) -> DataStoreResult<WireRequest> {
        require_v2(identity, "remove_version")?;
        let url = self.object_endpoint(
            &["object"],
            identity,
            key,
            vec![("version", version.to_string())],
        )?;
        Ok(self.request(Method::DELETE, url))
    }

    pub fn list_versions(
        &self,
        identity: &StoreIdentity,
        key: &ResolvedKey,
        query: &VersionQuery,
    ) -> DataStoreResult<WireRequest> {
        require_v2(identity, "list_versions")?;
        let mut extra = vec![
            ("sortOrder", query.direction.as_str().to_string()),
            ("maxItemsToReturn", query.page_size.to_string()),
        ];
        if let Some(min_date) = query.min_date {
            extra.push(("startTime", format_time(min_date)));
        }
        if let Some(max_date) = query.max_date {
            extra.push(("endTime", format_time(max_date)));
        }
        let url = self.object_endpoint(&["object", "versions"], identity, key, extra)?;
        Ok(self.request(Method::GET, url))
    }

    /// Keys of a standard store. Scoped stores list inside their scope and
    /// the prefix is applied after the `scope/` part.
    pub fn list_keys(
        &self,
        identity: &StoreIdentity,
        prefix: &str,
        page_size: usize,
    ) -> DataStoreResult<WireRequest> {
        require_v2(identity, "list_keys")?;
        let prefix = if identity.all_scopes() {
            prefix.to_string()
        } else {
            format!("{}/{}", identity.scope(), prefix)
        };
        let mut query = vec![
            ("datastore", identity.name().to_string()),
            ("maxItemsToReturn", page_size.to_string()),
            ("prefix", prefix),
        ];
        if identity.all_scopes() {
            query.push(("allScopes", "true".to_string()));
        }
        query.push(("excludeDeleted", "true".to_string()));
        let universe = self.session.universe_id.to_string();
        let url = self.endpoint(
            ProtocolGeneration::V2,
            &[universe.as_str(), "datastores", "objects"],
            &query,
        )?;
        Ok(self.request(Method::GET, url))
    }

    pub fn get_sorted_page(
        &self,
        identity: &StoreIdentity,
        query: &SortedQuery,
    ) -> DataStoreResult<WireRequest> {
        if !identity.is_ordered() {
            return Err(DataStoreError::InvalidArgument(
                "sorted listings require an ordered data store".to_string(),
            ));
        }
        match identity.wire_generation() {
            ProtocolGeneration::Legacy => {
                let mut params = vec![
                    ("placeId", self.session.place_id.to_string()),
                    ("type", identity.kind().as_str().to_string()),
                    ("scope", identity.scope().to_string()),
                    ("key", identity.name().to_string()),
                    ("pageSize", query.page_size.to_string()),
                    (
                        "ascending",
                        if query.ascending { "True" } else { "False" }.to_string(),
                    ),
                ];
                push_bounds(&mut params, query);
                let url = self.endpoint(ProtocolGeneration::Legacy, &["getSortedValues"], &params)?;
                Ok(self.request(Method::GET, url))
            }
            ProtocolGeneration::V1 | ProtocolGeneration::V2 => {
                let mut params = vec![
                    ("key", identity.name().to_string()),
                    ("scope", identity.scope().to_string()),
                    ("maxItems", query.page_size.to_string()),
                    ("ascending", query.ascending.to_string()),
                ];
                push_bounds(&mut params, query);
                let url = self.endpoint(ProtocolGeneration::V1, &["sorted", "list"], &params)?;
                Ok(self.request(Method::GET, url))
            }
        }
    }

    pub fn list_stores(&self, prefix: Option<&str>, page_size: usize) -> DataStoreResult<WireRequest> {
        let mut query = vec![("maxItemsToReturn", page_size.to_string())];
        if let Some(prefix) = prefix.filter(|prefix| !prefix.is_empty()) {
            query.push(("prefix", prefix.to_string()));
        }
        let universe = self.session.universe_id.to_string();
        let url = self.endpoint(
            ProtocolGeneration::V2,
            &[universe.as_str(), "datastores"],
            &query,
        )?;
        Ok(self.request(Method::GET, url))
    }

    fn request(&self, method: Method, url: String) -> WireRequest {
        let mut request = WireRequest::new(method, url);
        request.headers = self.session.headers(&self.config.user_agent);
        request
    }

    fn v2_write(&self, url: String, serialized: &str, options: &WriteOptions) -> WireRequest {
        let digest = Md5::digest(serialized.as_bytes());
        let mut request = self
            .request(Method::POST, url)
            .with_header("Content-Type", "application/json")
            .with_header("Content-MD5", BASE64_STANDARD.encode(digest))
            .with_header("Roblox-Object-UserIds", user_ids_header(&options.user_ids));
        if let Some(metadata) = options.metadata.as_ref() {
            request = request.with_header(
                "Roblox-Object-Attributes",
                serde_json::Value::Object(metadata.clone()).to_string(),
            );
        }
        request.with_body(serialized)
    }

    fn legacy_key_query(
        &self,
        identity: &StoreIdentity,
        key: &ResolvedKey,
    ) -> Vec<(&'static str, String)> {
        let (legacy_key, target) = legacy_key_target(identity, key);
        vec![
            ("placeId", self.session.place_id.to_string()),
            ("key", legacy_key),
            ("type", identity.kind().as_str().to_string()),
            ("scope", key.scope.clone()),
            ("target", target),
        ]
    }

    fn object_endpoint(
        &self,
        path: &[&str],
        identity: &StoreIdentity,
        key: &ResolvedKey,
        extra: Vec<(&'static str, String)>,
    ) -> DataStoreResult<String> {
        let universe = self.session.universe_id.to_string();
        let mut segments = vec![universe.as_str(), "datastores", "objects"];
        segments.extend_from_slice(path);
        let mut query = vec![
            ("datastore", identity.name().to_string()),
            ("objectKey", key.object_key()),
        ];
        query.extend(extra);
        self.endpoint(ProtocolGeneration::V2, &segments, &query)
    }

    fn endpoint(
        &self,
        generation: ProtocolGeneration,
        path: &[&str],
        query: &[(&str, String)],
    ) -> DataStoreResult<String> {
        let base = self.config.base_url(generation).trim_end_matches('/');
        let mut url = parse_url(&format!("{base}/{}", path.join("/")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url.to_string())
    }
}

fn parse_url(raw: &str) -> DataStoreResult<Url> {
    Url::parse(raw).map_err(|err| DataStoreError::InvalidArgument(format!("invalid url '{raw}': {err}")))
}

fn require_v2(identity: &StoreIdentity, operation: &str) -> DataStoreResult<()> {
    if identity.is_ordered() || identity.wire_generation() != ProtocolGeneration::V2 {
        return Err(DataStoreError::InvalidArgument(format!(
            "{operation} is only available on v2 standard data stores (store speaks {})",
            identity.wire_generation().as_str()
        )));
    }
    Ok(())
}

/// The unnamed legacy store addresses entries by key alone.
fn legacy_key_target(identity: &StoreIdentity, key: &ResolvedKey) -> (String, String) {
    if identity.is_legacy() {
        (key.key.clone(), String::new())
    } else {
        (identity.name().to_string(), key.key.clone())
    }
}

fn v1_key_query(identity: &StoreIdentity, key: &ResolvedKey) -> Vec<(&'static str, String)> {
    vec![
        ("key", identity.name().to_string()),
        ("scope", key.scope.clone()),
        ("target", key.key.clone()),
    ]
}

fn push_bounds(params: &mut Vec<(&'static str, String)>, query: &SortedQuery) {
    if let Some(min) = query.min {
        params.push(("inclusiveMinValue", min.to_string()));
    }
    if let Some(max) = query.max {
        params.push(("inclusiveMaxValue", max.to_string()));
    }
}

fn user_ids_header(user_ids: &[i64]) -> String {
    serde_json::Value::from(user_ids.to_vec()).to_string()
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
