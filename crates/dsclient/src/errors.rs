use crate::transport::TransportError;
use serde_json::Value;

/// Every failure a store operation can report. Each variant carries a stable
/// numeric code, see [`DataStoreError::code`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DataStoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("key name can't be empty")]
    KeyNameEmpty,

    #[error("key name exceeds the {limit} character limit")]
    KeyNameTooLong { limit: usize },

    #[error("value not allowed in this data store: {0}")]
    ValueNotAllowed(String),

    #[error("cannot store value: {0}")]
    CannotStoreValue(String),

    #[error("serialized value is {size} bytes, exceeding the {limit} byte limit")]
    ValueTooLarge { size: usize, limit: usize },

    #[error("min and max bounds must be integers")]
    BoundsNotIntegers,

    #[error("page size {size} must be between {min} and {max}")]
    PageSizeOutOfRange { size: usize, min: usize, max: usize },

    #[error("api access is disabled for this caller")]
    ApiAccessDisabled,

    #[error("ordered data store no longer exists: {0}")]
    OrderedStoreMissing(String),

    #[error("cannot parse response: {0}")]
    CannotParseResponse(String),

    #[error("upstream rejected request with status {status} (code {code}): {message}")]
    UpstreamRejected {
        status: u16,
        code: i64,
        message: String,
    },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("update cancelled")]
    UpdateCancelled,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("metadata is {size} bytes, exceeding the {limit} byte limit")]
    MetadataTooLarge { size: usize, limit: usize },

    #[error("{count} user ids exceed the limit of {limit}")]
    UserIdsTooLarge { count: usize, limit: usize },

    #[error("invalid attribute shape: {0}")]
    AttributeShapeInvalid(String),
}

pub type DataStoreResult<T> = Result<T, DataStoreError>;

impl DataStoreError {
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidArgument(_) => 100,
            Self::KeyNameEmpty => 101,
            Self::KeyNameTooLong { .. } => 102,
            Self::ValueNotAllowed(_) => 103,
            Self::CannotStoreValue(_) => 104,
            Self::ValueTooLarge { .. } => 105,
            Self::BoundsNotIntegers => 106,
            Self::PageSizeOutOfRange { .. } => 107,
            Self::ApiAccessDisabled => 403,
            Self::OrderedStoreMissing(_) => 404,
            Self::CannotParseResponse(_) => 501,
            Self::UpstreamRejected { .. } => 502,
            Self::KeyNotFound(_) => 503,
            Self::MalformedResponse(_) => 504,
            Self::VersionConflict(_) => 505,
            Self::UpdateCancelled => 506,
            Self::Transport(_) => 507,
            Self::MetadataTooLarge { .. } => 511,
            Self::UserIdsTooLarge { .. } => 512,
            Self::AttributeShapeInvalid(_) => 513,
        }
    }

    /// Whether re-issuing the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::VersionConflict(_) | Self::Transport(_) => true,
            Self::UpstreamRejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// True for failures detected locally before any request is built.
    pub fn is_validation(&self) -> bool {
        matches!(self.code(), 100..=199)
            || matches!(
                self,
                Self::ApiAccessDisabled
                    | Self::UpdateCancelled
                    | Self::MetadataTooLarge { .. }
                    | Self::UserIdsTooLarge { .. }
            )
    }
}

impl From<TransportError> for DataStoreError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Maps a non-success HTTP status and its body onto the taxonomy.
pub fn map_http_status(status: u16, body: &str) -> DataStoreError {
    let (code, message) = parse_upstream_error(status, body);
    match status {
        404 => DataStoreError::KeyNotFound(message),
        409 | 412 => DataStoreError::VersionConflict(message),
        _ => DataStoreError::UpstreamRejected {
            status,
            code,
            message,
        },
    }
}

/// Extracts `(code, message)` from the error shapes the services answer with:
/// `{"errors":[{"code","message"}]}`, `{"error","message"}`, or plain text.
pub fn parse_upstream_error(status: u16, body: &str) -> (i64, String) {
    let fallback_code = i64::from(status);
    let Ok(payload) = serde_json::from_str::<Value>(body) else {
        let message = body.trim();
        return if message.is_empty() {
            (fallback_code, format!("http status {status}"))
        } else {
            (fallback_code, message.to_string())
        };
    };

    if let Some(first) = payload
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
    {
        let code = first
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(fallback_code);
        let message = first
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return (code, message);
    }

    let code = payload
        .get("code")
        .and_then(Value::as_i64)
        .unwrap_or(fallback_code);
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| body.trim().to_string());
    (code, message)
}
