//! REST API Routes
//!
//! Router assembly for the public and internal listeners:
//! - `/api/v1/accounts`, `/api/v1/ledgers`, `/api/v1/transactions` (API key)
//! - `/health`, `/metrics` (open)
//! - `/internal/cache-account` (internal listener only)

pub mod accounts;
pub mod health;
pub mod internal;
pub mod ledgers;
pub mod transactions;

use axum::{
    http::{HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use pakana_ingest::LedgerSource;
use pakana_storage::TreeStore;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{api_key_middleware, ApiKeyState};
use crate::config::PakanaConfig;
use crate::state::AppState;
use crate::telemetry::observability_middleware;

/// Build the CORS layer from configured origins. No origins means any.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() {
        return base.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}

/// Public router: versioned API behind the key check, plus health and
/// metrics.
pub fn create_api_router<S: TreeStore, U: LedgerSource>(
    state: AppState<S, U>,
    config: &PakanaConfig,
) -> Router {
    let auth = ApiKeyState::new(config.api_key.clone());
    if !auth.is_enabled() {
        tracing::warn!("No API key configured, /api/v1 is open");
    }

    let api_routes = Router::new()
        .nest("/accounts", accounts::create_router())
        .nest("/ledgers", ledgers::create_router())
        .nest("/transactions", transactions::create_router())
        .layer(from_fn_with_state(auth, api_key_middleware));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health::health::<S, U>))
        .route("/metrics", get(health::metrics::<S, U>))
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_origins))
        .with_state(state)
}

/// Internal router, bound to its own port.
pub fn create_internal_router<S: TreeStore, U: LedgerSource>(state: AppState<S, U>) -> Router {
    Router::new()
        .nest("/internal", internal::create_router())
        .route("/health", get(health::health::<S, U>))
        .layer(from_fn(observability_middleware))
        .with_state(state)
}

