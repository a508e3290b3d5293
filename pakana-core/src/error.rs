//! Error types for Pakana operations

use crate::RecordKind;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Atomic block aborted: {reason}")]
    Aborted { reason: String },

    #[error("Storage backend failure: {reason}")]
    Backend { reason: String },

    #[error("Corrupt value at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    pub fn backend(reason: impl ToString) -> Self {
        Self::Backend {
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Validation errors for keys and upstream payloads.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ValidationError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::RequiredFieldMissing {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failures talking to the upstream ledger API.
///
/// A record that upstream does not know is not an error at this level; fetch
/// operations report it as `Ok(None)`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Upstream unavailable: {reason}")]
    Transient { reason: String },

    #[error("Upstream returned malformed data: {reason}")]
    Malformed { reason: String },
}

impl UpstreamError {
    pub fn transient(reason: impl ToString) -> Self {
        Self::Transient {
            reason: reason.to_string(),
        }
    }

    pub fn malformed(reason: impl ToString) -> Self {
        Self::Malformed {
            reason: reason.to_string(),
        }
    }
}

/// Outcome of a read-through resolve that did not produce a record.
///
/// `Clone` so a single in-flight hydration can hand the same failure to
/// every caller that joined it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HydrateError {
    #[error("{kind} {key} not found")]
    NotFound { kind: RecordKind, key: String },

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Storage error: {0}")]
    Store(#[from] StorageError),

    #[error("Consistency violation: {kind} {key} missing after successful commit")]
    ConsistencyViolation { kind: RecordKind, key: String },

    #[error("Invalid key: {0}")]
    InvalidKey(#[from] ValidationError),
}

impl HydrateError {
    pub fn not_found(kind: RecordKind, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn consistency(kind: RecordKind, key: impl ToString) -> Self {
        Self::ConsistencyViolation {
            kind,
            key: key.to_string(),
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HydrateError::Upstream(UpstreamError::Transient { .. })
                | HydrateError::Store(StorageError::Aborted { .. })
        )
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

/// Master error type for all Pakana errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PakanaError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Hydration error: {0}")]
    Hydrate(#[from] HydrateError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Pakana operations.
pub type PakanaResult<T> = Result<T, PakanaError>;

/// Result type alias for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// TESTS
// =============================================================================
