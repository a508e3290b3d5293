//! Ledger REST API Routes

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use pakana_core::LedgerSequence;
use pakana_ingest::LedgerSource;
use pakana_storage::TreeStore;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::types::LedgerResponse;

/// GET /api/v1/ledgers/latest - Highest fully committed ledger, local only
pub async fn get_latest<S: TreeStore, U: LedgerSource>(
    State(state): State<AppState<S, U>>,
) -> ApiResult<Json<LedgerResponse>> {
    let ledger = state.engine.latest_ledger()?;
    Ok(Json(ledger.into()))
}

/// GET /api/v1/ledgers/:seq - Ledger header, hydrated on a miss
pub async fn get_ledger<S: TreeStore, U: LedgerSource>(
    State(state): State<AppState<S, U>>,
    Path(raw): Path<String>,
) -> ApiResult<Json<LedgerResponse>> {
    let sequence: LedgerSequence = raw
        .parse()
        .map_err(|_| ApiError::invalid_input(format!("Invalid ledger sequence: {}", raw)))?;
    let ledger = state.engine.ledger(sequence).await?;
    Ok(Json(ledger.into()))
}

pub fn create_router<S: TreeStore, U: LedgerSource>() -> Router<AppState<S, U>> {
    Router::new()
        .route("/latest", get(get_latest::<S, U>))
        .route("/:seq", get(get_ledger::<S, U>))
}
