use crate::errors::{DataStoreError, DataStoreResult};
use crate::types::ProtocolGeneration;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LEGACY_BASE_URL: &str = "https://gamepersistence.roblox.com/persistence";
pub const DEFAULT_V1_BASE_URL: &str = "https://gamepersistence.roblox.com/v1/persistence";
pub const DEFAULT_V2_BASE_URL: &str = "https://gamepersistence.roblox.com/v2/persistence";

/// Runtime options shared by the request builder, validators and transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataStoreConfig {
    pub generation: ProtocolGeneration,
    pub legacy_base_url: String,
    pub v1_base_url: String,
    pub v2_base_url: String,
    pub max_name_length: usize,
    pub max_scope_length: usize,
    pub max_key_length: usize,
    pub max_value_bytes: usize,
    pub legacy_max_value_bytes: usize,
    pub max_user_ids: usize,
    pub max_metadata_bytes: usize,
    pub min_page_size: usize,
    pub max_page_size: usize,
    /// Return undecodable payloads as raw strings instead of failing.
    pub raw_payload_fallback: bool,
    pub api_access_enabled: bool,
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            generation: ProtocolGeneration::V2,
            legacy_base_url: DEFAULT_LEGACY_BASE_URL.to_string(),
            v1_base_url: DEFAULT_V1_BASE_URL.to_string(),
            v2_base_url: DEFAULT_V2_BASE_URL.to_string(),
            max_name_length: 50,
            max_scope_length: 50,
            max_key_length: 50,
            max_value_bytes: 4_194_304,
            legacy_max_value_bytes: 260_000,
            max_user_ids: 4,
            max_metadata_bytes: 300,
            min_page_size: 1,
            max_page_size: 100,
            raw_payload_fallback: false,
            api_access_enabled: true,
            request_timeout_ms: 30_000,
            user_agent: concat!("dsclient/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl DataStoreConfig {
    /// Defaults overlaid with any `DSCLIENT_*` environment variables.
    pub fn from_env() -> DataStoreResult<Self> {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`; unset or blank entries keep the
    /// current value.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> DataStoreResult<Self> {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = read("DSCLIENT_GENERATION") {
            self.generation = ProtocolGeneration::parse(&value).ok_or_else(|| {
                DataStoreError::InvalidArgument(format!(
                    "DSCLIENT_GENERATION must be legacy, v1 or v2: {value}"
                ))
            })?;
        }
        if let Some(value) = read("DSCLIENT_LEGACY_BASE_URL") {
            self.legacy_base_url = value;
        }
        if let Some(value) = read("DSCLIENT_V1_BASE_URL") {
            self.v1_base_url = value;
        }
        if let Some(value) = read("DSCLIENT_V2_BASE_URL") {
            self.v2_base_url = value;
        }
        overlay_number(&read, "DSCLIENT_MAX_KEY_LENGTH", &mut self.max_key_length)?;
        overlay_number(&read, "DSCLIENT_MAX_NAME_LENGTH", &mut self.max_name_length)?;
        overlay_number(&read, "DSCLIENT_MAX_SCOPE_LENGTH", &mut self.max_scope_length)?;
        overlay_number(&read, "DSCLIENT_MAX_VALUE_BYTES", &mut self.max_value_bytes)?;
        overlay_number(
            &read,
            "DSCLIENT_LEGACY_MAX_VALUE_BYTES",
            &mut self.legacy_max_value_bytes,
        )?;
        overlay_number(&read, "DSCLIENT_MAX_USER_IDS", &mut self.max_user_ids)?;
        overlay_number(&read, "DSCLIENT_MAX_METADATA_BYTES", &mut self.max_metadata_bytes)?;
        overlay_number(&read, "DSCLIENT_MIN_PAGE_SIZE", &mut self.min_page_size)?;
        overlay_number(&read, "DSCLIENT_MAX_PAGE_SIZE", &mut self.max_page_size)?;
        overlay_number(&read, "DSCLIENT_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms)?;
        overlay_flag(&read, "DSCLIENT_RAW_PAYLOAD_FALLBACK", &mut self.raw_payload_fallback)?;
        overlay_flag(&read, "DSCLIENT_API_ACCESS_ENABLED", &mut self.api_access_enabled)?;
        if let Some(value) = read("DSCLIENT_USER_AGENT") {
            self.user_agent = value;
        }

        if self.min_page_size == 0 || self.min_page_size > self.max_page_size {
            return Err(DataStoreError::InvalidArgument(format!(
                "page size bounds are inconsistent: {}..={}",
                self.min_page_size, self.max_page_size
            )));
        }
        Ok(self)
    }

    pub fn base_url(&self, generation: ProtocolGeneration) -> &str {
        match generation {
            ProtocolGeneration::Legacy => &self.legacy_base_url,
            ProtocolGeneration::V1 => &self.v1_base_url,
            ProtocolGeneration::V2 => &self.v2_base_url,
        }
    }

    pub fn value_limit(&self, generation: ProtocolGeneration) -> usize {
        match generation {
            ProtocolGeneration::Legacy => self.legacy_max_value_bytes,
            ProtocolGeneration::V1 | ProtocolGeneration::V2 => self.max_value_bytes,
        }
    }
}

fn overlay_number<T: std::str::FromStr>(
    read: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) -> DataStoreResult<()> {
    if let Some(value) = read(name) {
        *slot = value.trim().parse().map_err(|_| {
            DataStoreError::InvalidArgument(format!("{name} must be a non-negative integer: {value}"))
        })?;
    }
    Ok(())
}

fn overlay_flag(
    read: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut bool,
) -> DataStoreResult<()> {
    if let Some(value) = read(name) {
        *slot = match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(DataStoreError::InvalidArgument(format!(
                    "{name} must be a boolean: {value}"
                )));
            }
        };
    }
    Ok(())
}

/// Identity established by the caller's authentication handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub cookie: String,
    pub place_id: u64,
    pub universe_id: u64,
    pub csrf_token: Option<String>,
}

impl SessionContext {
    pub fn new(cookie: impl Into<String>, place_id: u64, universe_id: u64) -> Self {
        Self {
            cookie: cookie.into(),
            place_id,
            universe_id,
            csrf_token: None,
        }
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn from_env() -> DataStoreResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DataStoreResult<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| DataStoreError::InvalidArgument(format!("{name} is not set")))
        };
        let numeric = |name: &str| -> DataStoreResult<u64> {
            let value = required(name)?;
            value.trim().parse().map_err(|_| {
                DataStoreError::InvalidArgument(format!("{name} must be a numeric id: {value}"))
            })
        };

        Ok(Self {
            cookie: required("DSCLIENT_COOKIE")?,
            place_id: numeric("DSCLIENT_PLACE_ID")?,
            universe_id: numeric("DSCLIENT_UNIVERSE_ID")?,
            csrf_token: lookup("DSCLIENT_CSRF_TOKEN").filter(|value| !value.trim().is_empty()),
        })
    }

    /// Headers attached to every request.
    pub fn headers(&self, user_agent: &str) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                "Cookie".to_string(),
                format!(".ROBLOSECURITY={}", self.cookie),
            ),
            ("Roblox-Place-Id".to_string(), self.place_id.to_string()),
            ("User-Agent".to_string(), user_agent.to_string()),
        ];
        if let Some(token) = self.csrf_token.as_ref() {
            headers.push(("X-CSRF-TOKEN".to_string(), token.clone()));
        }
        headers
    }
}
