//! Health and Metrics Endpoints
//!
//! - /health - store readability and uptime
//! - /metrics - Prometheus scrape
//!
//! No authentication required.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use pakana_core::LedgerSequence;
use pakana_ingest::LedgerSource;
use pakana_storage::TreeStore;
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::telemetry::{render_metrics, METRICS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_ledger: Option<LedgerSequence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /health
pub async fn health<S: TreeStore, U: LedgerSource>(
    State(state): State<AppState<S, U>>,
) -> impl IntoResponse {
    let mut response = HealthResponse {
        status: HealthStatus::Healthy,
        service: "pakana-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        latest_ledger: None,
        error: None,
    };

    let status_code = match state.engine.reader().latest() {
        Ok(latest) => {
            response.latest_ledger = latest;
            StatusCode::OK
        }
        Err(e) => {
            response.status = HealthStatus::Unhealthy;
            response.error = Some(e.to_string());
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    (status_code, Json(response))
}

/// GET /metrics
pub async fn metrics<S: TreeStore, U: LedgerSource>(
    State(state): State<AppState<S, U>>,
) -> impl IntoResponse {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.observe_engine(&state.engine.stats());
    }
    render_metrics()
}
