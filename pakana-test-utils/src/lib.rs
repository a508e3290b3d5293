//! Pakana Test Utilities
//!
//! Centralized test infrastructure for the Pakana workspace:
//! - A scriptable fake upstream ([`FakeLedgerSource`])
//! - A fault-injecting store wrapper ([`FaultyStore`])
//! - Proptest generators for records
//! - Fixtures for common scenarios
//! - Assertions for store-wide invariants

pub use pakana_core::{
    AccountSnapshot, HydrateError, LedgerHeader, LedgerSequence, RecordKind, StorageError,
    StorageResult, TransactionRecord, TreePath, Trustline, UpstreamError,
};
pub use pakana_ingest::{
    LedgerEvent, LedgerEventStream, LedgerSource, TransactionPage, TxFilter, UpstreamResult,
};
pub use pakana_storage::{MemoryTreeStore, NodeState, TreeStore, TreeTxn, TreeView};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

// ============================================================================
// FAKE UPSTREAM
// ============================================================================

/// Upstream operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamOp {
    Account,
    Ledger,
    Transaction,
    Page,
    Stream,
}

#[derive(Debug, Default)]
struct FakeState {
    accounts: HashMap<String, AccountSnapshot>,
    ledgers: HashMap<LedgerSequence, LedgerHeader>,
    /// Every known transaction, in ledger application order.
    transactions: Vec<TransactionRecord>,
    unavailable: HashMap<UpstreamOp, bool>,
    calls: HashMap<UpstreamOp, usize>,
    connections: VecDeque<Vec<UpstreamResult<LedgerEvent>>>,
    stream_cursors: Vec<String>,
    delay: Option<Duration>,
}

/// In-memory upstream with scripted data, failures and live-stream
/// connections.
#[derive(Debug, Default)]
pub struct FakeLedgerSource {
    state: Mutex<FakeState>,
}

impl FakeLedgerSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn add_account(&self, snapshot: AccountSnapshot) {
        self.with_state(|s| {
            s.accounts.insert(snapshot.account_id.clone(), snapshot);
        });
    }

    pub fn add_ledger(&self, header: LedgerHeader, transactions: Vec<TransactionRecord>) {
        self.with_state(|s| {
            s.ledgers.insert(header.sequence, header);
            s.transactions.extend(transactions);
        });
    }

    pub fn add_transactions(&self, transactions: Vec<TransactionRecord>) {
        self.with_state(|s| s.transactions.extend(transactions));
    }

    /// Make `op` fail with a transient error until reset.
    pub fn set_unavailable(&self, op: UpstreamOp, unavailable: bool) {
        self.with_state(|s| {
            s.unavailable.insert(op, unavailable);
        });
    }

    /// Delay every fetch, to hold requests in flight.
    pub fn set_delay(&self, delay: Duration) {
        self.with_state(|s| s.delay = Some(delay));
    }

    /// Script the next live-stream connection.
    pub fn push_connection(&self, events: Vec<UpstreamResult<LedgerEvent>>) {
        self.with_state(|s| s.connections.push_back(events));
    }

    pub fn calls(&self, op: UpstreamOp) -> usize {
        self.with_state(|s| s.calls.get(&op).copied().unwrap_or(0))
    }

    /// Cursors passed to each `stream_ledgers` call, in order.
    pub fn stream_cursors(&self) -> Vec<String> {
        self.with_state(|s| s.stream_cursors.clone())
    }

    /// Count the call and report whether it should fail.
    async fn enter(&self, op: UpstreamOp) -> UpstreamResult<()> {
        let (delay, unavailable) = self.with_state(|s| {
            *s.calls.entry(op).or_insert(0) += 1;
            (s.delay, s.unavailable.get(&op).copied().unwrap_or(false))
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unavailable {
            return Err(UpstreamError::transient(format!("{op:?} unavailable")));
        }
        Ok(())
    }
}

fn page_after(
    ordered: Vec<TransactionRecord>,
    cursor: Option<&str>,
    limit: u32,
) -> TransactionPage {
    let start = match cursor {
        Some(token) => ordered
            .iter()
            .position(|tx| tx.paging_token == token)
            .map_or(ordered.len(), |i| i + 1),
        None => 0,
    };
    let end = (start + limit as usize).min(ordered.len());
    let records = ordered[start.min(end)..end].to_vec();
    let next_cursor = if end < ordered.len() {
        records.last().map(|tx| tx.paging_token.clone())
    } else {
        None
    };
    TransactionPage {
        records,
        next_cursor,
    }
}

#[async_trait]
impl LedgerSource for FakeLedgerSource {
    async fn fetch_account(&self, account_id: &str) -> UpstreamResult<Option<AccountSnapshot>> {
        self.enter(UpstreamOp::Account).await?;
        Ok(self.with_state(|s| s.accounts.get(account_id).cloned()))
    }

    async fn fetch_ledger(&self, sequence: LedgerSequence) -> UpstreamResult<Option<LedgerHeader>> {
        self.enter(UpstreamOp::Ledger).await?;
        Ok(self.with_state(|s| s.ledgers.get(&sequence).cloned()))
    }

    async fn fetch_transaction(&self, hash: &str) -> UpstreamResult<Option<TransactionRecord>> {
        self.enter(UpstreamOp::Transaction).await?;
        Ok(self.with_state(|s| s.transactions.iter().find(|tx| tx.hash == hash).cloned()))
    }

    async fn fetch_transactions_page(
        &self,
        filter: &TxFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> UpstreamResult<TransactionPage> {
        self.enter(UpstreamOp::Page).await?;
        let ordered = self.with_state(|s| match filter {
            TxFilter::Account(account_id) => {
                let mut history: Vec<_> = s
                    .transactions
                    .iter()
                    .filter(|tx| &tx.source_account == account_id)
                    .cloned()
                    .collect();
                history.reverse();
                history
            }
            TxFilter::Ledger(sequence) => s
                .transactions
                .iter()
                .filter(|tx| tx.ledger == *sequence)
                .cloned()
                .collect(),
        });
        Ok(page_after(ordered, cursor, limit))
    }

    async fn stream_ledgers(&self, cursor: &str) -> UpstreamResult<LedgerEventStream> {
        self.with_state(|s| s.stream_cursors.push(cursor.to_string()));
        self.enter(UpstreamOp::Stream).await?;
        match self.with_state(|s| s.connections.pop_front()) {
            Some(events) => Ok(stream::iter(events).boxed()),
            None => Err(UpstreamError::transient("no scripted connection")),
        }
    }
}

// ============================================================================
// FAULT-INJECTING STORE
// ============================================================================

/// When an injected fault fires inside an atomic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Abort on the write after `n` successful writes in the same block.
    AfterWrites(usize),
    /// Abort on any write at or beneath this path.
    UnderPath(TreePath),
}

/// Wraps a store and aborts atomic blocks when the configured fault fires.
#[derive(Debug, Default)]
pub struct FaultyStore<S = MemoryTreeStore> {
    inner: S,
    fault: Mutex<Option<Fault>>,
    aborts: AtomicUsize,
}

impl<S: TreeStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fault: Mutex::new(None),
            aborts: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn set_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap_or_else(|p| p.into_inner()) = Some(fault);
    }

    pub fn clear_fault(&self) {
        *self.fault.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Atomic blocks aborted by an injected fault so far.
    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

impl<S: TreeStore> TreeStore for FaultyStore<S> {
    fn get(&self, path: &TreePath) -> StorageResult<Option<String>> {
        self.inner.get(path)
    }

    fn node_state(&self, path: &TreePath) -> StorageResult<NodeState> {
        self.inner.node_state(path)
    }

    fn children(&self, path: &TreePath) -> StorageResult<Vec<String>> {
        self.inner.children(path)
    }

    fn read<R, E, F>(&self, f: F) -> Result<R, E>
    where
        E: From<StorageError>,
        F: FnOnce(&dyn TreeView) -> Result<R, E>,
    {
        self.inner.read(f)
    }

    fn atomic<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn TreeTxn) -> StorageResult<R>,
    {
        let fault = self.fault.lock().unwrap_or_else(|p| p.into_inner()).clone();
        self.inner.atomic(|txn| {
            let mut faulty = FaultyTxn {
                inner: txn,
                fault,
                writes: 0,
                aborts: &self.aborts,
            };
            f(&mut faulty)
        })
    }
}

struct FaultyTxn<'t, 's> {
    inner: &'t mut dyn TreeTxn,
    fault: Option<Fault>,
    writes: usize,
    aborts: &'s AtomicUsize,
}

impl FaultyTxn<'_, '_> {
    fn check(&mut self, path: &TreePath) -> StorageResult<()> {
        let fire = match &self.fault {
            Some(Fault::AfterWrites(n)) => self.writes >= *n,
            Some(Fault::UnderPath(prefix)) => path.starts_with(prefix),
            None => false,
        };
        if fire {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::aborted(format!("injected fault at {path}")));
        }
        self.writes += 1;
        Ok(())
    }
}

impl TreeTxn for FaultyTxn<'_, '_> {
    fn get(&self, path: &TreePath) -> StorageResult<Option<String>> {
        self.inner.get(path)
    }

    fn set(&mut self, path: &TreePath, value: &str) -> StorageResult<()> {
        self.check(path)?;
        self.inner.set(path, value)
    }

    fn remove_tree(&mut self, path: &TreePath) -> StorageResult<u64> {
        self.check(path)?;
        self.inner.remove_tree(path)
    }

    fn node_state(&self, path: &TreePath) -> StorageResult<NodeState> {
        self.inner.node_state(path)
    }

    fn children(&self, path: &TreePath) -> StorageResult<Vec<String>> {
        self.inner.children(path)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Pakana records.

    use super::*;
    use proptest::prelude::*;

    /// Strkey-shaped account id.
    pub fn arb_account_id() -> impl Strategy<Value = String> {
        "G[A-Z2-7]{55}"
    }

    pub fn arb_tx_hash() -> impl Strategy<Value = String> {
        "[0-9a-f]{64}"
    }

    pub fn arb_stroops() -> impl Strategy<Value = String> {
        (0i64..=1_000_000_000_000_000i64).prop_map(|v| v.to_string())
    }

    pub fn arb_trustline() -> impl Strategy<Value = Trustline> {
        ("[A-Z]{3,12}", arb_account_id(), arb_stroops(), arb_stroops()).prop_map(
            |(asset_code, issuer, balance, limit)| Trustline {
                asset_code,
                issuer,
                balance,
                limit,
            },
        )
    }

    pub fn arb_account_snapshot() -> impl Strategy<Value = AccountSnapshot> {
        (
            arb_account_id(),
            arb_stroops(),
            0i64..i64::MAX,
            0i64..4_000_000_000i64,
            proptest::collection::vec(arb_trustline(), 0..4),
        )
            .prop_map(
                |(account_id, balance, sequence_number, last_modified, trustlines)| {
                    AccountSnapshot {
                        account_id,
                        balance,
                        sequence_number,
                        last_modified,
                        trustlines,
                    }
                },
            )
    }

    pub fn arb_transaction(ledger: LedgerSequence) -> impl Strategy<Value = TransactionRecord> {
        (arb_tx_hash(), arb_account_id(), "[A-Za-z0-9+/]{8,64}").prop_map(
            move |(hash, source_account, envelope_xdr)| TransactionRecord {
                paging_token: format!("{ledger}-{}", &hash[..8]),
                hash,
                ledger,
                envelope_xdr,
                source_account,
            },
        )
    }

    pub fn arb_ledger_header() -> impl Strategy<Value = LedgerHeader> {
        (1u32..10_000_000, 0u32..1000).prop_map(|(sequence, total_tx_count)| LedgerHeader {
            sequence,
            closed_at: "2024-01-01T00:00:00Z".to_string(),
            total_tx_count,
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made records for common scenarios.

    use super::*;

    pub fn account(account_id: &str, balance: &str, sequence_number: i64) -> AccountSnapshot {
        AccountSnapshot {
            account_id: account_id.to_string(),
            balance: balance.to_string(),
            sequence_number,
            last_modified: 1_700_000_000,
            trustlines: Vec::new(),
        }
    }

    pub fn trustline(asset_code: &str, issuer: &str, balance: &str) -> Trustline {
        Trustline {
            asset_code: asset_code.to_string(),
            issuer: issuer.to_string(),
            balance: balance.to_string(),
            limit: "9223372036854775807".to_string(),
        }
    }

    pub fn ledger_header(sequence: LedgerSequence) -> LedgerHeader {
        LedgerHeader {
            sequence,
            closed_at: format!("2024-01-01T00:{:02}:{:02}Z", (sequence / 60) % 60, sequence % 60),
            total_tx_count: 0,
        }
    }

    pub fn transaction(hash: &str, ledger: LedgerSequence, source_account: &str) -> TransactionRecord {
        TransactionRecord {
            hash: hash.to_string(),
            ledger,
            envelope_xdr: format!("AAAAAg{hash}"),
            source_account: source_account.to_string(),
            paging_token: format!("{ledger}-{hash}"),
        }
    }

    pub fn ledger_event(sequence: LedgerSequence) -> LedgerEvent {
        let header = ledger_header(sequence);
        LedgerEvent {
            sequence,
            closed_at: header.closed_at,
            total_tx_count: header.total_tx_count,
            paging_token: format!("pt-{sequence}"),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Pakana-specific invariants.

    use super::*;
    use pakana_core::codec;

    /// Assert that a resolve failed with NotFound for the given kind.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &Result<T, HydrateError>, kind: RecordKind) {
        match result {
            Err(HydrateError::NotFound { kind: k, .. }) => {
                assert_eq!(*k, kind, "Wrong record kind in NotFound error");
            }
            other => panic!("Expected NotFound for {kind}, got: {other:?}"),
        }
    }

    /// Every indexed hash points at a ledger holding a child slot with that
    /// hash.
    #[track_caller]
    pub fn assert_hash_index_consistent<S: TreeStore>(store: &S) {
        let hashes = store
            .children(&codec::hash_index_root())
            .unwrap_or_else(|e| panic!("Failed to list hash index: {e}"));

        for hash in hashes {
            let ledger = store
                .get(&codec::hash_index_root().child(&hash))
                .unwrap_or_else(|e| panic!("Failed to read index entry {hash}: {e}"))
                .unwrap_or_else(|| panic!("Index entry {hash} has no value"));
            let sequence: LedgerSequence = ledger
                .parse()
                .unwrap_or_else(|_| panic!("Index entry {hash} holds {ledger:?}"));

            let tx_root = codec::tx_root(sequence);
            let slots = store
                .children(&tx_root)
                .unwrap_or_else(|e| panic!("Failed to list {tx_root}: {e}"));
            let mut held = slots.iter().filter_map(|s| codec::parse_dense_slot(s)).any(|slot| {
                store
                    .get(&tx_root.child(slot).child(codec::HASH_FIELD))
                    .ok()
                    .flatten()
                    .as_deref()
                    == Some(hash.as_str())
            });
            if !held {
                held = store
                    .get(
                        &tx_root
                            .child(codec::TX_HYDRATED_SEGMENT)
                            .child(&hash)
                            .child(codec::HASH_FIELD),
                    )
                    .ok()
                    .flatten()
                    .as_deref()
                    == Some(hash.as_str());
            }
            assert!(held, "Hash {hash} indexed to ledger {sequence} but no slot holds it");
        }
    }
}
