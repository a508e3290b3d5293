//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every request in a tracing span, records Prometheus metrics and
//! logs completion.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::METRICS;

/// Label for requests that matched no route.
const UNMATCHED_ROUTE: &str = "unmatched";

/// Route template for metrics/spans, e.g. `/api/v1/accounts/:id`.
///
/// Raw paths carry client-chosen ids and would give Prometheus one series
/// per id.
fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}

/// Observability middleware for Axum.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = route_label(&request);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %route,
    );
    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_http_request(
            method.as_str(),
            &route,
            status.as_u16(),
            duration.as_secs_f64(),
        );
    }

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn, routing::get, Router};
    use prometheus::{Encoder, TextEncoder};
    use tower::ServiceExt;

    fn rendered_metrics() -> String {
        let mut buffer = Vec::new();
        let _ = TextEncoder::new().encode(&prometheus::gather(), &mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    async fn hit(app: &Router, uri: &str) -> u16 {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.clone().oneshot(request).await.unwrap().status().as_u16()
    }

    #[tokio::test]
    async fn test_distinct_ids_share_one_route_label() {
        let app = Router::new()
            .route("/widgets/:id", get(|| async { "ok" }))
            .layer(from_fn(observability_middleware));

        assert_eq!(hit(&app, "/widgets/junk-one").await, 200);
        assert_eq!(hit(&app, "/widgets/zz%20other-junk").await, 200);
        assert_eq!(hit(&app, "/gadgets/never-routed").await, 404);

        let metrics = METRICS.as_ref().unwrap();
        let counted = metrics
            .http_requests_total
            .with_label_values(&["GET", "/widgets/:id", "200"])
            .get();
        assert_eq!(counted, 2.0);

        let text = rendered_metrics();
        assert!(text.contains("path=\"/widgets/:id\""));
        assert!(text.contains("path=\"unmatched\""));
        assert!(!text.contains("junk"));
        assert!(!text.contains("never-routed"));
    }
}
