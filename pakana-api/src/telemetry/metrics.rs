//! Prometheus Metrics Definitions
//!
//! HTTP request metrics plus gauges mirroring the hydration engine counters.
//! Exposed at /metrics for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use pakana_ingest::StatsSnapshot;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge_vec, CounterVec, Encoder,
    HistogramVec, IntGaugeVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once on first use
pub static METRICS: Lazy<ApiResult<PakanaMetrics>> = Lazy::new(PakanaMetrics::new);

/// Container for all Pakana metrics.
#[derive(Clone)]
pub struct PakanaMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Engine counters since process start - labels: event
    pub engine_events: IntGaugeVec,
}

impl PakanaMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "pakana_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "pakana_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| {
                ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e))
            })?,

            engine_events: register_int_gauge_vec!(
                "pakana_engine_events",
                "Hydration engine counters since process start",
                &["event"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register engine_events: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Copy the engine counters into the gauges.
    pub fn observe_engine(&self, stats: &StatsSnapshot) {
        let events = [
            ("hit", stats.hits),
            ("miss", stats.misses),
            ("upstream_fetch", stats.upstream_fetches),
            ("upstream_error", stats.upstream_errors),
            ("not_found", stats.not_found),
            ("commit", stats.commits),
            ("already_present", stats.already_present),
            ("commit_abort", stats.commit_aborts),
            ("consistency_violation", stats.consistency_violations),
            ("backfill_started", stats.backfills_started),
            ("ledger_ingested", stats.ledgers_ingested),
        ];
        for (event, value) in events {
            self.engine_events
                .with_label_values(&[event])
                .set(i64::try_from(value).unwrap_or(i64::MAX));
        }
    }
}

/// Render the default registry in Prometheus text format.
pub fn render_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_gauges_follow_snapshot() -> Result<(), String> {
        let metrics = METRICS.as_ref().map_err(|e| e.to_string())?;
        let stats = StatsSnapshot {
            hits: 3,
            misses: 2,
            ..Default::default()
        };

        metrics.observe_engine(&stats);

        assert_eq!(metrics.engine_events.with_label_values(&["hit"]).get(), 3);
        assert_eq!(metrics.engine_events.with_label_values(&["miss"]).get(), 2);
        assert_eq!(metrics.engine_events.with_label_values(&["commit"]).get(), 0);
        Ok(())
    }
}
