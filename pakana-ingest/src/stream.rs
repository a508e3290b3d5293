//! Ingestion Stream Adapter
//!
//! Follows the live ledger stream. For each closed ledger it fetches the full
//! transaction list outside any atomic block, drops blocked senders and
//! commits the whole ledger as one write set, with the latest pointer as its
//! final write. A failed commit is logged and skipped.
//!
//! When the stream ends or errors the adapter reconnects with exponential
//! backoff, resuming from the paging token of the last event it saw.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pakana_core::{Blocklist, LedgerSequence};
use pakana_storage::{CommitOutcome, IndexMaintainer, LedgerReader, TreeStore, WriteSet};
use rand::Rng;

use crate::config::StreamConfig;
use crate::source::{collect_ledger_transactions, LedgerEvent, LedgerEventStream, LedgerSource};
use crate::stats::EngineStats;

/// What happened to one ledger event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Committed { transactions: usize },
    /// The ledger was already stored; nothing was fetched or written.
    AlreadyPresent,
    Failed { reason: String },
}

pub struct StreamAdapter<S, U> {
    source: Arc<U>,
    maintainer: IndexMaintainer<S>,
    reader: LedgerReader<S>,
    blocklist: Arc<Blocklist>,
    stats: Arc<EngineStats>,
    config: StreamConfig,
}

impl<S: TreeStore, U: LedgerSource> StreamAdapter<S, U> {
    pub fn new(
        source: Arc<U>,
        maintainer: IndexMaintainer<S>,
        reader: LedgerReader<S>,
        blocklist: Arc<Blocklist>,
        stats: Arc<EngineStats>,
        config: StreamConfig,
    ) -> Self {
        Self {
            source,
            maintainer,
            reader,
            blocklist,
            stats,
            config,
        }
    }

    /// Persist one closed ledger.
    pub async fn ingest(&self, event: &LedgerEvent) -> IngestOutcome {
        let sequence = event.sequence;

        match self.reader.ledger(sequence) {
            Ok(Some(_)) => {
                tracing::debug!(sequence, "Ledger already present, skipping");
                return IngestOutcome::AlreadyPresent;
            }
            Ok(None) => {}
            Err(err) => return self.failed(sequence, err.to_string()),
        }

        let transactions =
            match collect_ledger_transactions(self.source.as_ref(), sequence, self.config.page_size)
                .await
            {
                Ok(transactions) => self.blocklist.filter(transactions),
                Err(err) => {
                    self.stats.record_upstream_error();
                    return self.failed(sequence, err.to_string());
                }
            };

        let set = match WriteSet::ledger(&event.header(), &transactions) {
            Ok(set) => set,
            Err(err) => return self.failed(sequence, err.to_string()),
        };

        match self.maintainer.commit(&set) {
            Ok(CommitOutcome::Committed {
                transactions_written,
            }) => {
                self.stats.record_ledger_ingested();
                tracing::info!(
                    sequence,
                    closed_at = %event.closed_at,
                    transactions = transactions_written,
                    "Committed ledger"
                );
                IngestOutcome::Committed {
                    transactions: transactions_written,
                }
            }
            Ok(CommitOutcome::AlreadyPresent) => IngestOutcome::AlreadyPresent,
            Err(err) => {
                self.stats.record_commit_abort();
                self.failed(sequence, err.to_string())
            }
        }
    }

    fn failed(&self, sequence: LedgerSequence, reason: String) -> IngestOutcome {
        tracing::error!(sequence, reason = %reason, "Ledger ingestion failed, moving on");
        IngestOutcome::Failed { reason }
    }

    /// Drain one connection. Returns the number of events seen; `cursor`
    /// tracks the last paging token.
    pub async fn consume(&self, mut events: LedgerEventStream, cursor: &mut String) -> usize {
        let mut seen = 0;
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    self.ingest(&event).await;
                    if !event.paging_token.is_empty() {
                        cursor.clone_from(&event.paging_token);
                    }
                    seen += 1;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Ledger stream error");
                    break;
                }
            }
        }
        seen
    }

    /// Follow the stream until `shutdown` resolves, reconnecting as needed.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut cursor = self.config.start_cursor.clone();
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                _ = &mut shutdown => break,
                connected = self.source.stream_ledgers(&cursor) => connected,
            };

            match connected {
                Ok(events) => {
                    let seen = tokio::select! {
                        _ = &mut shutdown => break,
                        seen = self.consume(events, &mut cursor) => seen,
                    };
                    if seen > 0 {
                        attempt = 0;
                    }
                    tracing::warn!(cursor = %cursor, seen, "Ledger stream ended, reconnecting");
                }
                Err(err) => {
                    tracing::warn!(cursor = %cursor, error = %err, "Ledger stream connect failed");
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = backoff_duration(&self.config, attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Ledger stream adapter stopped");
    }
}

/// Exponential backoff: initial * multiplier^(attempt-1), capped, jittered.
pub fn backoff_duration(config: &StreamConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32) as i32;
    let delay_secs = config.initial_backoff.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let capped = Duration::from_secs_f64(delay_secs.min(config.max_backoff.as_secs_f64()));
    apply_jitter(capped, config.jitter)
}

fn apply_jitter(duration: Duration, factor: f64) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    if factor == 0.0 {
        return duration;
    }

    let base = duration.as_secs_f64();
    let min = base * (1.0 - factor);
    let max = base * (1.0 + factor);
    Duration::from_secs_f64(rand::rng().random_range(min..=max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = StreamConfig::default()
            .with_backoff(Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(0.0);

        assert_eq!(backoff_duration(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_duration(&config, 2), Duration::from_millis(200));
        assert_eq!(backoff_duration(&config, 4), Duration::from_millis(800));
        assert_eq!(backoff_duration(&config, 10), Duration::from_secs(1));
        assert_eq!(backoff_duration(&config, u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let jittered = apply_jitter(base, 0.2);
            assert!(jittered >= Duration::from_secs(8));
            assert!(jittered <= Duration::from_secs(12));
        }
    }
}
