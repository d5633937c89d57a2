//! Error types for Tunewatch operations

use thiserror::Error;

/// Failure of a single primary fetch against a remote data service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("No network connectivity")]
    Offline,

    #[error("Invalid response payload: {reason}")]
    InvalidResponse { reason: String },

    #[error("Fetch abandoned by its consumer")]
    Abandoned,
}

impl FetchError {
    /// Whether an automatic retry may help.
    ///
    /// Network errors, timeouts and 5xx responses are transient. Client
    /// errors (4xx, including auth failures) and offline failures are not:
    /// the latter only recover by waiting for connectivity.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => (500..600).contains(status),
            Self::Offline | Self::InvalidResponse { .. } | Self::Abandoned => false,
        }
    }

    /// Whether the failure indicates the caller has no connectivity.
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }

    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }
}

/// Cache store and invalidation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Invalid invalidation pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to serialize cached value: {reason}")]
    Serialization { reason: String },

    /// A response computed before an overlapping invalidation was discarded.
    #[error("Invalidation raced a repopulation of {key}")]
    InvalidationRace { key: String },

    #[error("Unknown mutation type: {mutation_type}")]
    UnknownMutationType { mutation_type: String },
}

/// Errors from the key-value collaborator that holds fallback records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    #[error("Key-value I/O failed: {reason}")]
    Io { reason: String },

    #[error("Key-value record for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Key-value store lock poisoned")]
    LockPoisoned,
}

/// Terminal outcomes of the retry controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("Max retries reached after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: FetchError },

    #[error("Not retried: {0}")]
    NotRetryable(FetchError),

    #[error("Offline; waiting for connectivity before retrying")]
    OfflineDetected,

    #[error("Retry cancelled by its owner")]
    Cancelled,
}

impl RetryError {
    /// The underlying fetch failure, if one was observed.
    pub fn last_failure(&self) -> Option<&FetchError> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::NotRetryable(err) => Some(err),
            Self::OfflineDetected | Self::Cancelled => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Tunewatch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TunewatchError {
    #[error("Upstream failure: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Key-value error: {0}")]
    Kv(#[from] KvError),

    #[error("Retry error: {0}")]
    Retry(#[from] RetryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Tunewatch operations.
pub type TunewatchResult<T> = Result<T, TunewatchError>;
