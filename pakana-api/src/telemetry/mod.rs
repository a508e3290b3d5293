//! Pakana Telemetry - Observability Infrastructure
//!
//! Structured logging and Prometheus metrics for the API layer. Everything
//! works standalone; nothing is exported to external collectors.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{render_metrics, PakanaMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracing, TelemetryConfig};
