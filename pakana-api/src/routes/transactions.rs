//! Transaction REST API Routes

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use pakana_ingest::LedgerSource;
use pakana_storage::TreeStore;

use crate::error::ApiResult;
use crate::state::AppState;
use crate::types::TransactionResponse;

/// GET /api/v1/transactions/:hash - Transaction envelope, hydrated on a miss
pub async fn get_transaction<S: TreeStore, U: LedgerSource>(
    State(state): State<AppState<S, U>>,
    Path(hash): Path<String>,
) -> ApiResult<Json<TransactionResponse>> {
    let transaction = state.engine.transaction(&hash).await?;
    Ok(Json(transaction.into()))
}

pub fn create_router<S: TreeStore, U: LedgerSource>() -> Router<AppState<S, U>> {
    Router::new().route("/:hash", get(get_transaction::<S, U>))
}
