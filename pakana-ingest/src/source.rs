//! Upstream ledger source abstraction.
//!
//! Every fetch distinguishes three outcomes: `Ok(Some(_))` found,
//! `Ok(None)` upstream does not know the key, `Err(_)` upstream could not
//! answer right now.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use pakana_core::{
    AccountSnapshot, LedgerHeader, LedgerSequence, TransactionRecord, UpstreamError,
};
use serde::{Deserialize, Serialize};

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Live ledger events in increasing sequence order.
pub type LedgerEventStream = BoxStream<'static, UpstreamResult<LedgerEvent>>;

/// Cursor value that starts a stream at the current tip.
pub const CURSOR_NOW: &str = "now";

/// Which transactions a page request walks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TxFilter {
    /// An account's history, newest first.
    Account(String),
    /// One ledger's transactions, in application order.
    Ledger(LedgerSequence),
}

/// One page of transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPage {
    pub records: Vec<TransactionRecord>,
    /// Cursor for the following page; `None` when this was the last one.
    pub next_cursor: Option<String>,
}

impl TransactionPage {
    pub fn last(records: Vec<TransactionRecord>) -> Self {
        Self {
            records,
            next_cursor: None,
        }
    }
}

/// A ledger-closed event from the live stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub sequence: LedgerSequence,
    pub closed_at: String,
    pub total_tx_count: u32,
    /// Resume point for reconnecting after this event.
    pub paging_token: String,
}

impl LedgerEvent {
    pub fn header(&self) -> LedgerHeader {
        LedgerHeader {
            sequence: self.sequence,
            closed_at: self.closed_at.clone(),
            total_tx_count: self.total_tx_count,
        }
    }
}

/// Read access to the upstream ledger network.
#[async_trait]
pub trait LedgerSource: Send + Sync + 'static {
    async fn fetch_account(&self, account_id: &str) -> UpstreamResult<Option<AccountSnapshot>>;

    async fn fetch_ledger(&self, sequence: LedgerSequence) -> UpstreamResult<Option<LedgerHeader>>;

    async fn fetch_transaction(&self, hash: &str) -> UpstreamResult<Option<TransactionRecord>>;

    /// Fetch one page. `cursor` of `None` starts at the beginning of the
    /// walk (the newest record for account history).
    async fn fetch_transactions_page(
        &self,
        filter: &TxFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> UpstreamResult<TransactionPage>;

    /// Open the live ledger stream, starting after `cursor`
    /// ([`CURSOR_NOW`] for the current tip).
    async fn stream_ledgers(&self, cursor: &str) -> UpstreamResult<LedgerEventStream>;
}

/// Fetch every transaction of a ledger, following cursors until the last
/// page.
pub async fn collect_ledger_transactions<U: LedgerSource + ?Sized>(
    source: &U,
    sequence: LedgerSequence,
    page_size: u32,
) -> UpstreamResult<Vec<TransactionRecord>> {
    let filter = TxFilter::Ledger(sequence);
    let mut records = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = source
            .fetch_transactions_page(&filter, cursor.as_deref(), page_size)
            .await?;
        let empty = page.records.is_empty();
        records.extend(page.records);

        match page.next_cursor {
            Some(next) if !empty && cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => break,
        }
    }

    if let Some(stray) = records.iter().find(|tx| tx.ledger != sequence) {
        return Err(UpstreamError::malformed(format!(
            "transaction {} listed under ledger {} belongs to ledger {}",
            stray.hash, sequence, stray.ledger
        )));
    }
    Ok(records)
}
