//! HTTP error envelope.
//!
//! Every failure leaves the API as `{"error": message, "code": CODE}`. The
//! hydration taxonomy maps onto statuses here and nowhere else.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pakana_core::{ConfigError, HydrateError, StorageError, UpstreamError};
use pakana_ingest::IngestError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Machine-readable failure category; each maps to one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication (401, 403)
    /// Request lacks an API key
    Unauthorized,

    /// API key does not match
    Forbidden,

    // Validation (400)
    /// Path or body contains invalid input
    InvalidInput,

    /// Required field is missing from the request
    MissingField,

    // Not found (404)
    /// Neither the local store nor upstream knows the record
    NotFound,

    // Upstream (502)
    /// Upstream could not be reached or answered with a server error
    UpstreamUnavailable,

    /// Upstream answered with a payload that could not be used
    UpstreamMalformed,

    // Server (500)
    /// The store aborted the commit
    CommitAborted,

    /// A record was missing right after a successful commit
    ConsistencyViolation,

    /// Internal server error
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,

            ErrorCode::InvalidInput | ErrorCode::MissingField => StatusCode::BAD_REQUEST,

            ErrorCode::NotFound => StatusCode::NOT_FOUND,

            ErrorCode::UpstreamUnavailable | ErrorCode::UpstreamMalformed => {
                StatusCode::BAD_GATEWAY
            }

            ErrorCode::CommitAborted
            | ErrorCode::ConsistencyViolation
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message used when a call site has nothing more specific.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::Forbidden => "Access forbidden",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::NotFound => "Record not found",
            ErrorCode::UpstreamUnavailable => "Upstream temporarily unavailable",
            ErrorCode::UpstreamMalformed => "Upstream returned an unusable response",
            ErrorCode::CommitAborted => "Store commit aborted",
            ErrorCode::ConsistencyViolation => "Record missing after commit",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable error message
    #[serde(rename = "error")]
    pub message: String,

    /// Error code categorizing the error
    pub code: ErrorCode,
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    /// Error carrying the code's default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience Constructors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::MissingField, format!("{} is required", field))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<HydrateError> for ApiError {
    fn from(err: HydrateError) -> Self {
        match err {
            HydrateError::NotFound { kind, key } => {
                ApiError::not_found(format!("{} {} not found", kind, key))
            }
            HydrateError::InvalidKey(e) => ApiError::invalid_input(e.to_string()),
            HydrateError::Upstream(UpstreamError::Transient { reason }) => ApiError::new(
                ErrorCode::UpstreamUnavailable,
                format!("Upstream unavailable: {}", reason),
            ),
            HydrateError::Upstream(UpstreamError::Malformed { reason }) => ApiError::new(
                ErrorCode::UpstreamMalformed,
                format!("Upstream response unusable: {}", reason),
            ),
            HydrateError::Store(StorageError::Aborted { reason }) => ApiError::new(
                ErrorCode::CommitAborted,
                format!("Commit aborted: {}", reason),
            ),
            HydrateError::Store(e) => {
                tracing::error!(error = %e, "Store failure");
                ApiError::internal_error("Store operation failed")
            }
            HydrateError::ConsistencyViolation { kind, key } => ApiError::new(
                ErrorCode::ConsistencyViolation,
                format!("{} {} missing after commit", kind, key),
            ),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::internal_error(err.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::invalid_input(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        HydrateError::Store(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pakana_core::{RecordKind, ValidationError};

    #[test]
    fn test_error_body_shape() -> Result<(), serde_json::Error> {
        let err = ApiError::not_found("account GA not found");
        let json = serde_json::to_value(&err)?;
        assert_eq!(json["error"], "account GA not found");
        assert_eq!(json["code"], "NOT_FOUND");
        Ok(())
    }

    #[test]
    fn test_hydrate_error_statuses() {
        let cases = [
            (
                HydrateError::not_found(RecordKind::Ledger, 101),
                StatusCode::NOT_FOUND,
            ),
            (
                HydrateError::Upstream(UpstreamError::transient("timeout")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                HydrateError::Upstream(UpstreamError::malformed("bad json")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                HydrateError::Store(StorageError::aborted("fault")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                HydrateError::consistency(RecordKind::Account, "GA"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                HydrateError::InvalidKey(ValidationError::missing("account_id")),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }
}
