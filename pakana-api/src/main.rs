//! Pakana API Server Entry Point
//!
//! Bootstraps configuration, opens the store, starts the live ledger stream
//! and serves the public and internal HTTP listeners until Ctrl-C.

use std::future::IntoFuture;
use std::sync::Arc;

use pakana_api::telemetry::{init_tracing, TelemetryConfig};
use pakana_api::{create_api_router, create_internal_router, ApiError, ApiResult, AppState, PakanaConfig};
use pakana_core::{Blocklist, StorageError};
use pakana_ingest::{
    EngineConfig, HorizonClient, HorizonConfig, HydrationEngine, LedgerSource, StreamConfig,
};
use pakana_storage::{LmdbTreeStore, MemoryTreeStore, TreeStore};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let config = PakanaConfig::from_env()?;
    let blocklist = Blocklist::from_env();
    if !blocklist.is_empty() {
        tracing::info!(blocked = blocklist.len(), "Loaded address blocklist");
    }

    let horizon_config =
        HorizonConfig::new(config.horizon_url.clone()).with_timeout(config.upstream_timeout);
    let source = Arc::new(HorizonClient::new(&horizon_config)?);

    match config.store_path.clone() {
        Some(path) => {
            tracing::info!(path = %path.display(), "Opening LMDB store");
            let store = LmdbTreeStore::open(&path, config.lmdb_map_size_mb)
                .map_err(StorageError::from)?;
            serve(Arc::new(store), source, blocklist, config).await
        }
        None => {
            tracing::warn!("PAKANA_STORE_PATH not set, using in-memory store");
            serve(Arc::new(MemoryTreeStore::new()), source, blocklist, config).await
        }
    }
}

async fn serve<S: TreeStore, U: LedgerSource>(
    store: Arc<S>,
    source: Arc<U>,
    blocklist: Blocklist,
    config: PakanaConfig,
) -> ApiResult<()> {
    let engine = HydrationEngine::new(store, source, blocklist, EngineConfig::from_env());
    let state = AppState::new(engine.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingest = if config.ingest_enabled {
        let adapter = engine.stream_adapter(StreamConfig::from_env());
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            adapter.run(wait_for_shutdown(rx)).await;
        }))
    } else {
        tracing::info!("Live ledger ingestion disabled");
        None
    };

    let public_addr = config.bind_addr()?;
    let internal_addr = config.internal_addr()?;
    let public = bind(public_addr).await?;
    let internal = bind(internal_addr).await?;
    tracing::info!(%public_addr, %internal_addr, "Starting Pakana API server");

    let public_server = axum::serve(public, create_api_router(state.clone(), &config))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let internal_server = axum::serve(internal, create_internal_router(state))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = signal_tx.send(true);
    });

    let (public_result, internal_result) =
        tokio::join!(public_server.into_future(), internal_server.into_future());
    let _ = shutdown_tx.send(true);

    if let Some(handle) = ingest {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Ledger stream task panicked");
        }
    }

    public_result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
    internal_result.map_err(|e| ApiError::internal_error(format!("Internal server error: {}", e)))?;
    tracing::info!("Pakana API server stopped");
    Ok(())
}

async fn bind(addr: std::net::SocketAddr) -> ApiResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}
