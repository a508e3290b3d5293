//! Internal Routes
//!
//! Served on the internal listener only. `POST /internal/cache-account`
//! forces a fresh hydration of an account and schedules its backfill.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use pakana_ingest::LedgerSource;
use pakana_storage::TreeStore;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::types::{AccountResponse, CacheAccountRequest};

/// POST /internal/cache-account
pub async fn cache_account<S: TreeStore, U: LedgerSource>(
    State(state): State<AppState<S, U>>,
    body: Result<Json<CacheAccountRequest>, JsonRejection>,
) -> ApiResult<Json<AccountResponse>> {
    let Json(request) =
        body.map_err(|e| ApiError::invalid_input(format!("Invalid request body: {}", e)))?;
    if request.account_id.is_empty() {
        return Err(ApiError::missing_field("account_id"));
    }

    tracing::info!(account_id = %request.account_id, "Cache-account request");
    let snapshot = state.engine.cache_account(&request.account_id).await?;
    Ok(Json(AccountResponse::from_snapshot(snapshot)?))
}

pub fn create_router<S: TreeStore, U: LedgerSource>() -> Router<AppState<S, U>> {
    Router::new().route("/cache-account", post(cache_account::<S, U>))
}
