//! Horizon REST client.
//!
//! Implements [`LedgerSource`] against a Stellar Horizon server: JSON
//! resources for on-demand fetches and the `text/event-stream` ledger feed for
//! live ingestion. Amounts are normalized to stroops here, so nothing past
//! this module sees Horizon's decimal strings.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use pakana_core::{
    decimal_to_stroops, AccountSnapshot, LedgerHeader, LedgerSequence, TransactionRecord,
    Trustline, UpstreamError,
};
use reqwest::{header, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{IngestError, IngestResult};
use crate::source::{
    LedgerEvent, LedgerEventStream, LedgerSource, TransactionPage, TxFilter, UpstreamResult,
};

pub const DEFAULT_HORIZON_URL: &str = "https://horizon-testnet.stellar.org";

/// Connection settings for [`HorizonClient`].
#[derive(Debug, Clone)]
pub struct HorizonConfig {
    pub base_url: String,
    /// Timeout for single JSON requests. The ledger stream only applies it
    /// to connecting.
    pub request_timeout: Duration,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_HORIZON_URL.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl HorizonConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Clone)]
pub struct HorizonClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: Url,
}

impl HorizonClient {
    pub fn new(config: &HorizonConfig) -> IngestResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            IngestError::Client(format!("invalid Horizon URL {}: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(IngestError::Client(format!(
                "Horizon URL {} cannot carry a path",
                config.base_url
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let stream_http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            stream_http,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// GET a JSON resource. 404 and 400 mean upstream does not know the key.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> UpstreamResult<Option<T>> {
        let response = self
            .http
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(UpstreamError::transient)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            tracing::debug!(%url, %status, "Horizon does not know resource");
            return Ok(None);
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::transient(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            return Err(UpstreamError::malformed(format!("{url} returned {status}")));
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(UpstreamError::malformed)
    }
}

#[async_trait]
impl LedgerSource for HorizonClient {
    async fn fetch_account(&self, account_id: &str) -> UpstreamResult<Option<AccountSnapshot>> {
        let url = self.url(&["accounts", account_id]);
        match self.get_json::<HorizonAccount>(url, &[]).await? {
            Some(account) => account_snapshot(account_id, account).map(Some),
            None => Ok(None),
        }
    }

    async fn fetch_ledger(&self, sequence: LedgerSequence) -> UpstreamResult<Option<LedgerHeader>> {
        let url = self.url(&["ledgers", &sequence.to_string()]);
        Ok(self
            .get_json::<HorizonLedger>(url, &[])
            .await?
            .map(|ledger| ledger.event().header()))
    }

    async fn fetch_transaction(&self, hash: &str) -> UpstreamResult<Option<TransactionRecord>> {
        let url = self.url(&["transactions", hash]);
        Ok(self
            .get_json::<HorizonTransaction>(url, &[])
            .await?
            .map(HorizonTransaction::into_record))
    }

    async fn fetch_transactions_page(
        &self,
        filter: &TxFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> UpstreamResult<TransactionPage> {
        let (url, order) = match filter {
            TxFilter::Account(account_id) => {
                (self.url(&["accounts", account_id, "transactions"]), "desc")
            }
            TxFilter::Ledger(sequence) => (
                self.url(&["ledgers", &sequence.to_string(), "transactions"]),
                "asc",
            ),
        };

        let mut query = vec![("order", order.to_string()), ("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        match self
            .get_json::<HorizonPage<HorizonTransaction>>(url, &query)
            .await?
        {
            Some(page) => Ok(transaction_page(page, limit)),
            None => Ok(TransactionPage::default()),
        }
    }

    async fn stream_ledgers(&self, cursor: &str) -> UpstreamResult<LedgerEventStream> {
        let url = self.url(&["ledgers"]);
        let response = self
            .stream_http
            .get(url.clone())
            .query(&[("cursor", cursor)])
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(UpstreamError::transient)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::transient(format!("{url} returned {status}")));
        }

        tracing::info!(%url, cursor, "Ledger stream connected");
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(UpstreamError::transient))
            .boxed();
        Ok(ledger_events(body))
    }
}

// ============================================================================
// HORIZON PAYLOADS
// ============================================================================

#[derive(Debug, Deserialize)]
struct HorizonAccount {
    sequence: String,
    #[serde(default)]
    last_modified_time: Option<String>,
    #[serde(default)]
    balances: Vec<HorizonBalance>,
}

#[derive(Debug, Deserialize)]
struct HorizonBalance {
    balance: String,
    #[serde(default)]
    limit: Option<String>,
    asset_type: String,
    #[serde(default)]
    asset_code: Option<String>,
    #[serde(default)]
    asset_issuer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HorizonLedger {
    sequence: LedgerSequence,
    closed_at: String,
    #[serde(default)]
    successful_transaction_count: u32,
    #[serde(default)]
    failed_transaction_count: Option<u32>,
    #[serde(default)]
    paging_token: String,
}

impl HorizonLedger {
    fn event(self) -> LedgerEvent {
        let total_tx_count = self
            .successful_transaction_count
            .saturating_add(self.failed_transaction_count.unwrap_or(0));
        LedgerEvent {
            sequence: self.sequence,
            closed_at: self.closed_at,
            total_tx_count,
            paging_token: self.paging_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HorizonTransaction {
    hash: String,
    ledger: LedgerSequence,
    envelope_xdr: String,
    source_account: String,
    #[serde(default)]
    paging_token: String,
}

impl HorizonTransaction {
    fn into_record(self) -> TransactionRecord {
        TransactionRecord {
            hash: self.hash,
            ledger: self.ledger,
            envelope_xdr: self.envelope_xdr,
            source_account: self.source_account,
            paging_token: self.paging_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HorizonPage<T> {
    #[serde(rename = "_embedded")]
    embedded: HorizonEmbedded<T>,
}

#[derive(Debug, Deserialize)]
struct HorizonEmbedded<T> {
    records: Vec<T>,
}

fn stroops(field: &str, value: &str) -> UpstreamResult<String> {
    decimal_to_stroops(value)
        .map(|amount| amount.to_string())
        .map_err(|e| UpstreamError::malformed(format!("{field}: {e}")))
}

fn account_snapshot(account_id: &str, account: HorizonAccount) -> UpstreamResult<AccountSnapshot> {
    let sequence_number = account
        .sequence
        .parse::<i64>()
        .map_err(|_| UpstreamError::malformed(format!("sequence {:?}", account.sequence)))?;

    let last_modified = match account.last_modified_time.as_deref() {
        Some(raw) => chrono::DateTime::parse_from_rfc3339(raw)
            .map_err(|e| UpstreamError::malformed(format!("last_modified_time {raw:?}: {e}")))?
            .timestamp(),
        None => 0,
    };

    let mut balance = "0".to_string();
    let mut trustlines = Vec::new();
    for line in account.balances {
        match line.asset_type.as_str() {
            "native" => balance = stroops("balance", &line.balance)?,
            "liquidity_pool_shares" => continue,
            _ => {
                let issuer = line
                    .asset_issuer
                    .ok_or_else(|| UpstreamError::malformed("trustline without asset_issuer"))?;
                trustlines.push(Trustline {
                    asset_code: line.asset_code.unwrap_or(line.asset_type),
                    issuer,
                    balance: stroops("trustline balance", &line.balance)?,
                    limit: stroops("trustline limit", line.limit.as_deref().unwrap_or("0"))?,
                });
            }
        }
    }

    Ok(AccountSnapshot {
        account_id: account_id.to_string(),
        balance,
        sequence_number,
        last_modified,
        trustlines,
    })
}

/// Horizon always links a next page; a short page is the real end.
fn transaction_page(page: HorizonPage<HorizonTransaction>, limit: u32) -> TransactionPage {
    let records: Vec<TransactionRecord> = page
        .embedded
        .records
        .into_iter()
        .map(HorizonTransaction::into_record)
        .collect();

    let full = records.len() >= limit as usize && !records.is_empty();
    let next_cursor = if full {
        records.last().map(|tx| tx.paging_token.clone())
    } else {
        None
    };
    TransactionPage {
        records,
        next_cursor,
    }
}

// ============================================================================
// SERVER-SENT EVENTS
// ============================================================================

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SseMessage {
    event: Option<String>,
    data: String,
}

/// Incremental `text/event-stream` decoder. Chunks may split lines anywhere,
/// including inside a multi-byte character; only whole lines are decoded.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// A line that is not UTF-8 is an error; the stream is not trusted past it.
    fn push(&mut self, chunk: &[u8]) -> UpstreamResult<Vec<SseMessage>> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let text = std::str::from_utf8(&raw)
                .map_err(|e| UpstreamError::malformed(format!("event stream is not UTF-8: {e}")))?;
            let line = text.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() || self.event.is_some() {
                    messages.push(SseMessage {
                        event: self.event.take(),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        Ok(messages)
    }
}

/// Map an SSE message to a ledger event. Control messages yield `None`.
fn ledger_event(message: &SseMessage) -> UpstreamResult<Option<LedgerEvent>> {
    if matches!(message.event.as_deref(), Some("open") | Some("close")) {
        return Ok(None);
    }
    let data = message.data.trim();
    if data.is_empty() || data == "hello" || data == "\"hello\"" || data == "\"byebye\"" {
        return Ok(None);
    }
    serde_json::from_str::<HorizonLedger>(data)
        .map(|ledger| Some(ledger.event()))
        .map_err(UpstreamError::malformed)
}

struct SseState {
    body: BoxStream<'static, UpstreamResult<Vec<u8>>>,
    decoder: SseDecoder,
    ready: VecDeque<UpstreamResult<LedgerEvent>>,
    finished: bool,
}

/// Turn a raw event-stream body into ledger events. The stream ends after
/// the first error.
fn ledger_events(body: BoxStream<'static, UpstreamResult<Vec<u8>>>) -> LedgerEventStream {
    let state = SseState {
        body,
        decoder: SseDecoder::default(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let messages = match state.decoder.push(&chunk) {
                        Ok(messages) => messages,
                        Err(err) => {
                            state.finished = true;
                            state.ready.push_back(Err(err));
                            continue;
                        }
                    };
                    for message in messages {
                        match ledger_event(&message) {
                            Ok(Some(event)) => state.ready.push_back(Ok(event)),
                            Ok(None) => {}
                            Err(err) => {
                                state.ready.push_back(Err(err));
                                state.finished = true;
                                break;
                            }
                        }
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    state.ready.push_back(Err(err));
                }
                None => state.finished = true,
            }
        }
    })
    .boxed()
}
