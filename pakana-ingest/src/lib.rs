//! Pakana Ingest - Upstream Access and the Consistency Engine
//!
//! Everything that moves data from the upstream ledger network into the
//! local store:
//!
//! - [`LedgerSource`]: upstream capability, with [`HorizonClient`] as the
//!   production implementation
//! - [`HydrationEngine`]: read-through resolves with per-key single-flight
//! - [`BackfillCoordinator`]: bounded history walks after account hydration
//! - [`StreamAdapter`]: live ledger ingestion with reconnect

pub mod backfill;
pub mod config;
pub mod engine;
pub mod error;
pub mod horizon;
pub mod single_flight;
pub mod source;
pub mod stats;
pub mod stream;

pub use backfill::{BackfillCoordinator, BackfillOutcome, BackfillReport};
pub use config::{BackfillConfig, EngineConfig, StreamConfig};
pub use engine::{HydrationEngine, Record};
pub use error::{IngestError, IngestResult};
pub use horizon::{HorizonClient, HorizonConfig, DEFAULT_HORIZON_URL};
pub use single_flight::SingleFlight;
pub use source::{
    collect_ledger_transactions, LedgerEvent, LedgerEventStream, LedgerSource, TransactionPage,
    TxFilter, UpstreamResult, CURSOR_NOW,
};
pub use stats::{EngineStats, StatsSnapshot};
pub use stream::{IngestOutcome, StreamAdapter};
