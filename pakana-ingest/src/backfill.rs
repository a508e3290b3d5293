//! Backfill Coordinator
//!
//! Walks an account's upstream history newest-first from "now" and appends
//! unseen transactions until it reaches history that is already indexed.
//! The walk keeps no cursor between runs; each run starts from the tip.

use std::fmt;
use std::sync::Arc;

use pakana_core::Blocklist;
use pakana_storage::{IndexMaintainer, LedgerReader, TreeStore, WriteSet};
use serde::Serialize;

use crate::config::BackfillConfig;
use crate::source::{LedgerSource, TxFilter};

/// Why a walk stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BackfillOutcome {
    /// Reached a transaction that was already indexed.
    Overlap { hash: String },
    /// Upstream has no older history.
    Exhausted,
    /// A fetch or commit failed; the walk was abandoned.
    Failed { reason: String },
    /// A transaction or page ceiling was hit.
    LimitReached,
}

impl fmt::Display for BackfillOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackfillOutcome::Overlap { hash } => write!(f, "overlap at {hash}"),
            BackfillOutcome::Exhausted => f.write_str("exhausted"),
            BackfillOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            BackfillOutcome::LimitReached => f.write_str("limit reached"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub account_id: String,
    pub outcome: BackfillOutcome,
    pub pages: usize,
    pub transactions_written: usize,
}

pub struct BackfillCoordinator<S, U> {
    source: Arc<U>,
    maintainer: IndexMaintainer<S>,
    reader: LedgerReader<S>,
    blocklist: Arc<Blocklist>,
    config: BackfillConfig,
}

impl<S, U> Clone for BackfillCoordinator<S, U> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            maintainer: self.maintainer.clone(),
            reader: self.reader.clone(),
            blocklist: Arc::clone(&self.blocklist),
            config: self.config.clone(),
        }
    }
}

impl<S: TreeStore, U: LedgerSource> BackfillCoordinator<S, U> {
    pub fn new(
        store: Arc<S>,
        source: Arc<U>,
        blocklist: Arc<Blocklist>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            source,
            maintainer: IndexMaintainer::new(Arc::clone(&store)),
            reader: LedgerReader::new(store),
            blocklist,
            config,
        }
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    /// Walk the account's history until a terminal state.
    pub async fn run(&self, account_id: &str) -> BackfillReport {
        tracing::info!(account_id, "Starting history backfill");

        let mut report = BackfillReport {
            account_id: account_id.to_string(),
            outcome: BackfillOutcome::Exhausted,
            pages: 0,
            transactions_written: 0,
        };
        let outcome = self.walk(account_id, &mut report).await;
        report.outcome = outcome;

        match &report.outcome {
            BackfillOutcome::Failed { reason } => tracing::warn!(
                account_id,
                pages = report.pages,
                written = report.transactions_written,
                reason = %reason,
                "Backfill abandoned"
            ),
            outcome => tracing::info!(
                account_id,
                pages = report.pages,
                written = report.transactions_written,
                outcome = %outcome,
                "Backfill finished"
            ),
        }
        report
    }

    async fn walk(&self, account_id: &str, report: &mut BackfillReport) -> BackfillOutcome {
        let filter = TxFilter::Account(account_id.to_string());
        let mut cursor: Option<String> = None;

        loop {
            if report.transactions_written >= self.config.max_transactions
                || report.pages >= self.config.max_pages
            {
                return BackfillOutcome::LimitReached;
            }

            let page = match self
                .source
                .fetch_transactions_page(&filter, cursor.as_deref(), self.config.page_size)
                .await
            {
                Ok(page) => page,
                Err(err) => return BackfillOutcome::Failed { reason: err.to_string() },
            };
            report.pages += 1;

            if page.records.is_empty() {
                return BackfillOutcome::Exhausted;
            }

            let budget = self.config.max_transactions - report.transactions_written;
            let mut fresh = Vec::new();
            let mut overlap = None;
            let mut truncated = false;

            for tx in &page.records {
                match self.reader.is_indexed(&tx.hash) {
                    Ok(true) => {
                        overlap = Some(tx.hash.clone());
                        break;
                    }
                    Ok(false) => {}
                    Err(err) => return BackfillOutcome::Failed { reason: err.to_string() },
                }
                if !self.blocklist.permits(tx) {
                    continue;
                }
                if fresh.len() >= budget {
                    truncated = true;
                    break;
                }
                fresh.push(tx.clone());
            }

            if !fresh.is_empty() {
                let set = match WriteSet::backfill(&fresh) {
                    Ok(set) => set,
                    Err(err) => return BackfillOutcome::Failed { reason: err.to_string() },
                };
                match self.maintainer.commit(&set) {
                    Ok(outcome) => report.transactions_written += outcome.transactions_written(),
                    Err(err) => return BackfillOutcome::Failed { reason: err.to_string() },
                }
            }

            if let Some(hash) = overlap {
                return BackfillOutcome::Overlap { hash };
            }
            if truncated {
                return BackfillOutcome::LimitReached;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return BackfillOutcome::Exhausted,
            }
        }
    }
}
