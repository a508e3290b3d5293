//! Account REST API Routes

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use pakana_ingest::LedgerSource;
use pakana_storage::TreeStore;

use crate::error::ApiResult;
use crate::state::AppState;
use crate::types::{AccountResponse, BalanceResponse, TrustlinesResponse};

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/v1/accounts/:id - Account snapshot, hydrated on a miss
pub async fn get_account<S: TreeStore, U: LedgerSource>(
    State(state): State<AppState<S, U>>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<AccountResponse>> {
    let snapshot = state.engine.account(&account_id).await?;
    Ok(Json(AccountResponse::from_snapshot(snapshot)?))
}

/// GET /api/v1/accounts/:id/balance - Native balance only
pub async fn get_balance<S: TreeStore, U: LedgerSource>(
    State(state): State<AppState<S, U>>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<BalanceResponse>> {
    let snapshot = state.engine.account(&account_id).await?;
    Ok(Json(BalanceResponse::from_snapshot(snapshot)?))
}

/// GET /api/v1/accounts/:id/trustlines - Non-native balances
pub async fn get_trustlines<S: TreeStore, U: LedgerSource>(
    State(state): State<AppState<S, U>>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<TrustlinesResponse>> {
    let snapshot = state.engine.account(&account_id).await?;
    Ok(Json(snapshot.into()))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router<S: TreeStore, U: LedgerSource>() -> Router<AppState<S, U>> {
    Router::new()
        .route("/:id", get(get_account::<S, U>))
        .route("/:id/balance", get(get_balance::<S, U>))
        .route("/:id/trustlines", get(get_trustlines::<S, U>))
}
