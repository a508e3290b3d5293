//! Error types for building and running ingestion components.
//!
//! Per-request failures use [`pakana_core::HydrateError`]; this type covers
//! setup and the long-running stream.

use pakana_core::{ConfigError, StorageError, UpstreamError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to build upstream client: {0}")]
    Client(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Client(err.to_string())
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
