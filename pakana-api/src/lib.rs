//! Pakana API - HTTP Surface for the Ledger Cache
//!
//! Thin axum layer over the hydration engine. Every read goes through
//! [`pakana_ingest::HydrationEngine`]; this crate only maps requests onto
//! engine calls and engine outcomes onto HTTP responses.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod types;

pub use auth::{api_key_middleware, ApiKeyState, API_KEY_HEADER};
pub use config::PakanaConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::{create_api_router, create_internal_router};
pub use state::AppState;
pub use types::*;
