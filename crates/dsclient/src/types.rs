use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Scope used when a scoped store is opened without one.
pub const DEFAULT_SCOPE: &str = "global";

/// Name carried by the unnamed legacy store.
pub const LEGACY_STORE_NAME: &str = "";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolGeneration {
    Legacy,
    V1,
    #[default]
    V2,
}

impl ProtocolGeneration {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "legacy" => Some(Self::Legacy),
            "v1" => Some(Self::V1),
            "v2" => Some(Self::V2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Standard,
    Sorted,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Sorted => "sorted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(Self::Standard),
            "sorted" => Some(Self::Sorted),
            _ => None,
        }
    }
}

/// Immutable description of one logical data store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreIdentity {
    name: String,
    scope: String,
    kind: StoreKind,
    is_legacy: bool,
    all_scopes: bool,
    generation: ProtocolGeneration,
}

impl StoreIdentity {
    pub fn standard(
        name: impl Into<String>,
        scope: impl Into<String>,
        all_scopes: bool,
        generation: ProtocolGeneration,
    ) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
            kind: StoreKind::Standard,
            is_legacy: false,
            all_scopes,
            generation,
        }
    }

    pub fn ordered(
        name: impl Into<String>,
        scope: impl Into<String>,
        generation: ProtocolGeneration,
    ) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
            kind: StoreKind::Sorted,
            is_legacy: false,
            all_scopes: false,
            generation,
        }
    }

    /// The unnamed store; it only speaks the legacy protocol.
    pub fn legacy() -> Self {
        Self {
            name: LEGACY_STORE_NAME.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            kind: StoreKind::Standard,
            is_legacy: true,
            all_scopes: false,
            generation: ProtocolGeneration::Legacy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn is_ordered(&self) -> bool {
        self.kind == StoreKind::Sorted
    }

    pub fn is_legacy(&self) -> bool {
        self.is_legacy
    }

    pub fn all_scopes(&self) -> bool {
        self.all_scopes
    }

    pub fn generation(&self) -> ProtocolGeneration {
        self.generation
    }

    /// Generation actually spoken on the wire. Ordered stores have no V2
    /// object endpoints and fall back to the V1 `sorted` routes.
    pub fn wire_generation(&self) -> ProtocolGeneration {
        match (self.kind, self.generation) {
            (StoreKind::Sorted, ProtocolGeneration::V2) => ProtocolGeneration::V1,
            (_, generation) => generation,
        }
    }
}

/// A validated key split into its scope and in-scope name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedKey {
    pub scope: String,
    pub key: String,
}

impl ResolvedKey {
    /// Key addressed by V2 object routes: always `scope/key`.
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.scope, self.key)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub version_created_at: DateTime<Utc>,
    pub user_ids: Vec<i64>,
    pub metadata: Map<String, Value>,
}

/// A value read from or written to a store together with its version data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: Value,
    pub info: Option<KeyInfo>,
    pub usn: Option<String>,
}

impl StoredValue {
    pub fn version(&self) -> Option<&str> {
        self.info
            .as_ref()
            .map(|info| info.version.as_str())
            .or(self.usn.as_deref())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteOptions {
    pub user_ids: Vec<i64>,
    pub metadata: Option<Map<String, Value>>,
}

impl WriteOptions {
    pub fn with_user_ids(mut self, user_ids: impl IntoIterator<Item = i64>) -> Self {
        self.user_ids = user_ids.into_iter().collect();
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// What an update transform hands back to be written.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateOutcome {
    pub value: Value,
    pub user_ids: Option<Vec<i64>>,
    pub metadata: Option<Map<String, Value>>,
}

impl UpdateOutcome {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            user_ids: None,
            metadata: None,
        }
    }

    pub fn with_user_ids(mut self, user_ids: impl IntoIterator<Item = i64>) -> Self {
        self.user_ids = Some(user_ids.into_iter().collect());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "Ascending",
            Self::Descending => "Descending",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub object_created_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub content_length: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortedEntry {
    pub key: String,
    pub value: Value,
}
