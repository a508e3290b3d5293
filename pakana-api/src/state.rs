//! Shared application state for Axum routers.

use std::time::Instant;

use pakana_ingest::HydrationEngine;

/// State shared by every handler.
///
/// Generic over the store and upstream so tests can drive the router with
/// in-memory fakes.
pub struct AppState<S, U> {
    pub engine: HydrationEngine<S, U>,
    pub started_at: Instant,
}

impl<S, U> AppState<S, U> {
    pub fn new(engine: HydrationEngine<S, U>) -> Self {
        Self {
            engine,
            started_at: Instant::now(),
        }
    }
}

impl<S, U> Clone for AppState<S, U> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            started_at: self.started_at,
        }
    }
}
