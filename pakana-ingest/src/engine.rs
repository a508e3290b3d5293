//! Hydration Engine
//!
//! The read-through core. Each resolve checks the local store first; on a
//! miss it fetches from upstream, commits through the Index Maintainer and
//! reads the record back. Concurrent misses for one key share a single
//! upstream fetch.
//!
//! # Outcomes
//!
//! - local hit: served without touching upstream
//! - upstream does not know the key: [`HydrateError::NotFound`], never retried
//! - upstream unavailable: [`HydrateError::Upstream`], retryable by the caller
//! - store aborted the commit: [`HydrateError::Store`]
//! - committed but not readable: [`HydrateError::ConsistencyViolation`]

use std::future::Future;
use std::sync::Arc;

use pakana_core::{
    AccountSnapshot, Blocklist, HydrateError, LedgerRecord, LedgerSequence, RecordKind,
    StoredTransaction, UpstreamError, ValidationError,
};
use pakana_storage::{CommitOutcome, IndexMaintainer, LedgerReader, TreeStore, WriteSet};
use serde::Serialize;

use crate::backfill::BackfillCoordinator;
use crate::config::{EngineConfig, StreamConfig};
use crate::single_flight::SingleFlight;
use crate::source::{collect_ledger_transactions, LedgerSource, UpstreamResult};
use crate::stats::{EngineStats, StatsSnapshot};
use crate::stream::StreamAdapter;

type HydrateResult<T> = Result<T, HydrateError>;

/// In-flight hydrations are keyed per record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FlightKey {
    Account(String),
    Ledger(LedgerSequence),
    Transaction(String),
}

/// Any record the engine can resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Account(AccountSnapshot),
    Ledger(LedgerRecord),
    Transaction(StoredTransaction),
}

struct EngineInner<S, U> {
    source: Arc<U>,
    maintainer: IndexMaintainer<S>,
    reader: LedgerReader<S>,
    blocklist: Arc<Blocklist>,
    flights: SingleFlight<FlightKey, HydrateResult<()>>,
    stats: Arc<EngineStats>,
    backfill: BackfillCoordinator<S, U>,
    config: EngineConfig,
}

pub struct HydrationEngine<S, U> {
    inner: Arc<EngineInner<S, U>>,
}

impl<S, U> Clone for HydrationEngine<S, U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: TreeStore, U: LedgerSource> HydrationEngine<S, U> {
    pub fn new(store: Arc<S>, source: Arc<U>, blocklist: Blocklist, config: EngineConfig) -> Self {
        let blocklist = Arc::new(blocklist);
        let backfill = BackfillCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&source),
            Arc::clone(&blocklist),
            config.backfill.clone(),
        );

        Self {
            inner: Arc::new(EngineInner {
                source,
                maintainer: IndexMaintainer::new(Arc::clone(&store)),
                reader: LedgerReader::new(store),
                blocklist,
                flights: SingleFlight::new(),
                stats: Arc::new(EngineStats::new()),
                backfill,
                config,
            }),
        }
    }

    pub fn reader(&self) -> &LedgerReader<S> {
        &self.inner.reader
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.inner.blocklist
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Number of hydrations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }

    /// A live ingestion adapter sharing this engine's store, upstream,
    /// blocklist and counters.
    pub fn stream_adapter(&self, config: StreamConfig) -> StreamAdapter<S, U> {
        StreamAdapter::new(
            Arc::clone(&self.inner.source),
            self.inner.maintainer.clone(),
            self.inner.reader.clone(),
            Arc::clone(&self.inner.blocklist),
            Arc::clone(&self.inner.stats),
            config,
        )
    }

    // ========================================================================
    // RESOLVE
    // ========================================================================

    /// Resolve a record by kind and textual key.
    pub async fn resolve(&self, kind: RecordKind, key: &str) -> HydrateResult<Record> {
        match kind {
            RecordKind::Account => self.account(key).await.map(Record::Account),
            RecordKind::Ledger => {
                let sequence = parse_sequence(key)?;
                self.ledger(sequence).await.map(Record::Ledger)
            }
            RecordKind::Transaction => self.transaction(key).await.map(Record::Transaction),
        }
    }

    pub async fn account(&self, account_id: &str) -> HydrateResult<AccountSnapshot> {
        self.read_through(
            RecordKind::Account,
            account_id,
            FlightKey::Account(account_id.to_string()),
            || self.inner.reader.account(account_id),
            || self.hydrate_account(account_id),
        )
        .await
    }

    pub async fn ledger(&self, sequence: LedgerSequence) -> HydrateResult<LedgerRecord> {
        self.read_through(
            RecordKind::Ledger,
            &sequence.to_string(),
            FlightKey::Ledger(sequence),
            || self.inner.reader.ledger(sequence),
            || self.hydrate_ledger(sequence),
        )
        .await
    }

    pub async fn transaction(&self, hash: &str) -> HydrateResult<StoredTransaction> {
        self.read_through(
            RecordKind::Transaction,
            hash,
            FlightKey::Transaction(hash.to_string()),
            || self.inner.reader.transaction(hash),
            || self.hydrate_transaction(hash),
        )
        .await
    }

    /// The highest fully committed ledger. Local only.
    pub fn latest_ledger(&self) -> HydrateResult<LedgerRecord> {
        let sequence = self
            .inner
            .reader
            .latest()?
            .ok_or_else(|| HydrateError::not_found(RecordKind::Ledger, "latest"))?;

        match self.inner.reader.ledger(sequence)? {
            Some(record) => Ok(record),
            None => Err(self.consistency_violation(RecordKind::Ledger, &sequence.to_string())),
        }
    }

    /// Re-hydrate an account even if it is present, replacing the stored
    /// snapshot and scheduling a backfill.
    pub async fn cache_account(&self, account_id: &str) -> HydrateResult<AccountSnapshot> {
        pakana_core::codec::account_path(account_id)?;
        self.inner
            .flights
            .run(FlightKey::Account(account_id.to_string()), || {
                self.hydrate_account(account_id)
            })
            .await?;

        match self.inner.reader.account(account_id)? {
            Some(snapshot) => Ok(snapshot),
            None => Err(self.consistency_violation(RecordKind::Account, account_id)),
        }
    }

    async fn read_through<T, R, H, Fut>(
        &self,
        kind: RecordKind,
        key: &str,
        flight: FlightKey,
        read: R,
        hydrate: H,
    ) -> HydrateResult<T>
    where
        R: Fn() -> HydrateResult<Option<T>>,
        H: FnOnce() -> Fut,
        Fut: Future<Output = HydrateResult<()>>,
    {
        if let Some(found) = read()? {
            self.inner.stats.record_hit();
            return Ok(found);
        }

        self.inner.stats.record_miss();
        tracing::debug!(kind = %kind, key, "Local miss, hydrating from upstream");
        self.inner.flights.run(flight, hydrate).await?;

        match read()? {
            Some(found) => Ok(found),
            None => Err(self.consistency_violation(kind, key)),
        }
    }

    // ========================================================================
    // HYDRATE
    // ========================================================================

    async fn hydrate_account(&self, account_id: &str) -> HydrateResult<()> {
        let fetched = self.inner.source.fetch_account(account_id).await;
        let mut snapshot = self.upstream(RecordKind::Account, account_id, fetched)?;
        snapshot.account_id = account_id.to_string();

        let set = WriteSet::account(&snapshot)?;
        self.commit(RecordKind::Account, account_id, &set)?;
        tracing::info!(
            account_id,
            sequence_number = snapshot.sequence_number,
            trustlines = snapshot.trustlines.len(),
            "Hydrated account"
        );

        if self.inner.config.backfill_enabled {
            self.spawn_backfill(account_id);
        }
        Ok(())
    }

    async fn hydrate_ledger(&self, sequence: LedgerSequence) -> HydrateResult<()> {
        let key = sequence.to_string();
        let fetched = self.inner.source.fetch_ledger(sequence).await;
        let header = self.upstream(RecordKind::Ledger, &key, fetched)?;

        let transactions = match collect_ledger_transactions(
            self.inner.source.as_ref(),
            sequence,
            self.inner.config.ledger_page_size,
        )
        .await
        {
            Ok(transactions) => transactions,
            Err(err) => {
                self.inner.stats.record_upstream_error();
                return Err(err.into());
            }
        };
        let transactions = self.inner.blocklist.filter(transactions);

        let set = WriteSet::ledger(&header, &transactions)?;
        let outcome = self.commit(RecordKind::Ledger, &key, &set)?;
        tracing::info!(
            sequence,
            transactions = outcome.transactions_written(),
            "Hydrated ledger"
        );
        Ok(())
    }

    async fn hydrate_transaction(&self, hash: &str) -> HydrateResult<()> {
        let fetched = self.inner.source.fetch_transaction(hash).await;
        let transaction = self.upstream(RecordKind::Transaction, hash, fetched)?;

        if transaction.hash != hash {
            self.inner.stats.record_upstream_error();
            return Err(UpstreamError::malformed(format!(
                "requested transaction {hash}, upstream returned {}",
                transaction.hash
            ))
            .into());
        }
        if !self.inner.blocklist.permits(&transaction) {
            tracing::debug!(hash, "Transaction sender is blocked");
            self.inner.stats.record_not_found();
            return Err(HydrateError::not_found(RecordKind::Transaction, hash));
        }

        let set = WriteSet::hydrated_transaction(&transaction)?;
        self.commit(RecordKind::Transaction, hash, &set)?;
        tracing::info!(hash, ledger = transaction.ledger, "Hydrated transaction");
        Ok(())
    }

    fn spawn_backfill(&self, account_id: &str) {
        self.inner.stats.record_backfill_started();
        let coordinator = self.inner.backfill.clone();
        let account_id = account_id.to_string();
        tokio::spawn(async move {
            coordinator.run(&account_id).await;
        });
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn upstream<T>(
        &self,
        kind: RecordKind,
        key: &str,
        fetched: UpstreamResult<Option<T>>,
    ) -> HydrateResult<T> {
        self.inner.stats.record_upstream_fetch();
        match fetched {
            Ok(Some(record)) => Ok(record),
            Ok(None) => {
                self.inner.stats.record_not_found();
                tracing::debug!(kind = %kind, key, "Upstream does not know record");
                Err(HydrateError::not_found(kind, key))
            }
            Err(err) => {
                self.inner.stats.record_upstream_error();
                tracing::warn!(kind = %kind, key, error = %err, "Upstream fetch failed");
                Err(err.into())
            }
        }
    }

    fn commit(&self, kind: RecordKind, key: &str, set: &WriteSet) -> HydrateResult<CommitOutcome> {
        match self.inner.maintainer.commit(set) {
            Ok(CommitOutcome::AlreadyPresent) => {
                self.inner.stats.record_already_present();
                tracing::debug!(kind = %kind, key, "Record already present");
                Ok(CommitOutcome::AlreadyPresent)
            }
            Ok(outcome) => {
                self.inner.stats.record_commit();
                Ok(outcome)
            }
            Err(err) => {
                self.inner.stats.record_commit_abort();
                tracing::warn!(kind = %kind, key, error = %err, "Hydration commit aborted");
                Err(err.into())
            }
        }
    }

    fn consistency_violation(&self, kind: RecordKind, key: &str) -> HydrateError {
        self.inner.stats.record_consistency_violation();
        tracing::error!(kind = %kind, key, "Record missing after successful commit");
        HydrateError::consistency(kind, key)
    }
}

fn parse_sequence(key: &str) -> Result<LedgerSequence, ValidationError> {
    key.parse::<LedgerSequence>()
        .map_err(|_| ValidationError::invalid("sequence", format!("{key:?} is not a ledger sequence")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("100").ok(), Some(100));
        assert!(parse_sequence("-1").is_err());
        assert!(parse_sequence("abc").is_err());
        assert!(parse_sequence("4294967296").is_err());
    }
}
