//! API Key Authentication
//!
//! When a key is configured, every `/api/v1` request must carry it in the
//! `X-API-Key` header:
//! - missing header: 401
//! - wrong key: 403
//!
//! With no key configured the middleware lets everything through.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared state for the API key middleware.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyState {
    expected: Option<Arc<str>>,
}

impl ApiKeyState {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            expected: api_key.map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Check a presented key against the configured one.
    pub fn check(&self, presented: Option<&str>) -> Result<(), ApiError> {
        let Some(expected) = self.expected.as_deref() else {
            return Ok(());
        };
        match presented {
            None => Err(ApiError::unauthorized(
                "Authentication required: provide X-API-Key header",
            )),
            Some(key) if constant_time_eq(key.as_bytes(), expected.as_bytes()) => Ok(()),
            Some(_) => Err(ApiError::forbidden("Invalid API key")),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Axum middleware enforcing the configured API key.
pub async fn api_key_middleware(
    State(state): State<ApiKeyState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    if let Err(err) = state.check(presented) {
        tracing::debug!(path = %request.uri().path(), code = %err.code, "Rejected request");
        return Err(err);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_disabled_accepts_anything() {
        let state = ApiKeyState::new(None);
        assert!(!state.is_enabled());
        assert!(state.check(None).is_ok());
        assert!(state.check(Some("whatever")).is_ok());
    }

    #[test]
    fn test_missing_and_wrong_keys() {
        let state = ApiKeyState::new(Some("secret".to_string()));
        assert_eq!(state.check(None).unwrap_err().code, ErrorCode::Unauthorized);
        assert_eq!(state.check(Some("nope")).unwrap_err().code, ErrorCode::Forbidden);
        assert_eq!(state.check(Some("secreT")).unwrap_err().code, ErrorCode::Forbidden);
        assert!(state.check(Some("secret")).is_ok());
    }
}
