//! Index Maintainer
//!
//! Keeps the account tree, the ledger tree and the hash index mutually
//! consistent. Every mutation is expressed as a [`WriteSet`] and applied by
//! [`IndexMaintainer::commit`] inside a single [`TreeStore::atomic`] block, so
//! readers observe either all of a write set or none of it.

use std::sync::Arc;

use pakana_core::codec::{
    self, BALANCE_FIELD, CLOSED_AT_FIELD, FILTERED_TX_COUNT_FIELD, HASH_FIELD, LAST_MODIFIED_FIELD,
    LIMIT_FIELD, NEXT_SLOT_FIELD, SEQ_NUM_FIELD, TOTAL_TX_COUNT_FIELD, XDR_FIELD,
};
use pakana_core::{
    AccountSnapshot, LedgerHeader, LedgerSequence, StorageError, StorageResult, TransactionRecord,
    TreePath, TxSlot, ValidationError,
};

use crate::tree::{TreeStore, TreeTxn};

// ============================================================================
// WRITE SETS
// ============================================================================

/// A transaction prepared for writing, with every derived path validated up
/// front so nothing can fail on malformed input once the block has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxWrite {
    hash: String,
    ledger: LedgerSequence,
    envelope_xdr: String,
    index_path: TreePath,
    hydrated_path: TreePath,
}

impl TxWrite {
    pub fn new(tx: &TransactionRecord) -> Result<Self, ValidationError> {
        Ok(Self {
            hash: tx.hash.clone(),
            ledger: tx.ledger,
            envelope_xdr: tx.envelope_xdr.clone(),
            index_path: codec::hash_index_path(&tx.hash)?,
            hydrated_path: codec::tx_slot_path(tx.ledger, &TxSlot::Hydrated(tx.hash.clone()))?,
        })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn ledger(&self) -> LedgerSequence {
        self.ledger
    }
}

/// One write inside a [`WriteSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathWrite {
    Set { path: TreePath, value: String },
    /// Remove a node and everything beneath it.
    RemoveTree { path: TreePath },
    /// Write `value` only if it exceeds the current value (or none is set).
    SetIfGreater { path: TreePath, value: u64 },
    /// Write into the next dense slot of the transaction's ledger and index
    /// the hash. Skipped when the hash is already indexed; a `hydrated` slot
    /// for the same hash in the same ledger is replaced by the dense copy.
    AppendTransaction(TxWrite),
    /// Write into the reserved `hydrated/<hash>` slot and index the hash.
    /// Skipped when the hash is already indexed.
    HydrateTransaction(TxWrite),
    /// Write how many of the preceding appends ended up stored under their
    /// ledger, either freshly written or already there.
    SetStoredCount { path: TreePath },
}

/// An ordered list of writes applied as one atomic unit.
///
/// When a guard path is set and already holds a value, the whole set is a
/// no-op and commits as [`CommitOutcome::AlreadyPresent`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    guard: Option<TreePath>,
    writes: Vec<PathWrite>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guarded_by(mut self, path: TreePath) -> Self {
        self.guard = Some(path);
        self
    }

    pub fn push(&mut self, write: PathWrite) {
        self.writes.push(write);
    }

    pub fn set(&mut self, path: TreePath, value: impl ToString) {
        self.push(PathWrite::Set {
            path,
            value: value.to_string(),
        });
    }

    pub fn guard(&self) -> Option<&TreePath> {
        self.guard.as_ref()
    }

    pub fn writes(&self) -> &[PathWrite] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Wholesale replacement of an account snapshot plus its tracked marker.
    pub fn account(snapshot: &AccountSnapshot) -> Result<Self, ValidationError> {
        let id = snapshot.account_id.as_str();
        let mut set = Self::new();

        set.push(PathWrite::RemoveTree {
            path: codec::account_path(id)?,
        });
        set.set(codec::account_field(id, BALANCE_FIELD)?, &snapshot.balance);
        for line in &snapshot.trustlines {
            let path = codec::trustline_path(id, &line.asset_code, &line.issuer)?;
            set.set(path.child(BALANCE_FIELD), &line.balance);
            set.set(path.child(LIMIT_FIELD), &line.limit);
        }
        set.set(codec::account_field(id, SEQ_NUM_FIELD)?, snapshot.sequence_number);
        set.set(codec::account_field(id, LAST_MODIFIED_FIELD)?, snapshot.last_modified);
        set.set(codec::tracked_path(id)?, "1");

        Ok(set)
    }

    /// A full ledger body. The latest pointer moves as the final write so it
    /// never runs ahead of the body it points at.
    pub fn ledger(
        header: &LedgerHeader,
        transactions: &[TransactionRecord],
    ) -> Result<Self, ValidationError> {
        let seq = header.sequence;

        let mut set = Self::new().guarded_by(codec::ledger_field(seq, CLOSED_AT_FIELD));
        set.set(codec::ledger_field(seq, CLOSED_AT_FIELD), &header.closed_at);
        set.set(codec::ledger_field(seq, TOTAL_TX_COUNT_FIELD), header.total_tx_count);

        for tx in transactions {
            if tx.ledger != seq {
                return Err(ValidationError::invalid(
                    "ledger",
                    format!("transaction {} belongs to ledger {}, not {}", tx.hash, tx.ledger, seq),
                ));
            }
            set.push(PathWrite::AppendTransaction(TxWrite::new(tx)?));
        }
        // Hashes already indexed under another ledger are not counted.
        set.push(PathWrite::SetStoredCount {
            path: codec::ledger_field(seq, FILTERED_TX_COUNT_FIELD),
        });

        set.push(PathWrite::SetIfGreater {
            path: codec::latest_path(),
            value: u64::from(seq),
        });
        Ok(set)
    }

    /// A single transaction resolved by hash.
    pub fn hydrated_transaction(tx: &TransactionRecord) -> Result<Self, ValidationError> {
        let write = TxWrite::new(tx)?;
        let mut set = Self::new().guarded_by(write.index_path.clone());
        set.push(PathWrite::HydrateTransaction(write));
        Ok(set)
    }

    /// One page of historical transactions from a backfill walk.
    pub fn backfill(transactions: &[TransactionRecord]) -> Result<Self, ValidationError> {
        let mut set = Self::new();
        for tx in transactions {
            set.push(PathWrite::AppendTransaction(TxWrite::new(tx)?));
        }
        Ok(set)
    }

    pub fn latest_pointer(sequence: LedgerSequence) -> Self {
        let mut set = Self::new();
        set.push(PathWrite::SetIfGreater {
            path: codec::latest_path(),
            value: u64::from(sequence),
        });
        set
    }
}

// ============================================================================
// COMMIT
// ============================================================================

/// Result of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { transactions_written: usize },
    /// The guard path already held a value; nothing was written.
    AlreadyPresent,
}

impl CommitOutcome {
    pub fn transactions_written(&self) -> usize {
        match self {
            CommitOutcome::Committed {
                transactions_written,
            } => *transactions_written,
            CommitOutcome::AlreadyPresent => 0,
        }
    }
}

/// Applies write sets to a store, one atomic block per set.
pub struct IndexMaintainer<S> {
    store: Arc<S>,
}

impl<S> Clone for IndexMaintainer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: TreeStore> IndexMaintainer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Apply `set` atomically. An abort surfaces as `Err` and leaves the
    /// store unchanged.
    pub fn commit(&self, set: &WriteSet) -> StorageResult<CommitOutcome> {
        let outcome = self.store.atomic(|txn| {
            if let Some(guard) = &set.guard {
                if txn.get(guard)?.is_some() {
                    return Ok(CommitOutcome::AlreadyPresent);
                }
            }

            let mut transactions_written = 0;
            let mut stored = 0;
            for write in &set.writes {
                match apply(txn, write, stored)? {
                    Applied::TxWritten => {
                        transactions_written += 1;
                        stored += 1;
                    }
                    Applied::TxPresent => stored += 1,
                    Applied::TxSkipped | Applied::Other => {}
                }
            }
            Ok(CommitOutcome::Committed {
                transactions_written,
            })
        })?;

        tracing::debug!(
            writes = set.len(),
            outcome = ?outcome,
            "Write set committed"
        );
        Ok(outcome)
    }
}

/// What a single write did to the transaction it carried, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    TxWritten,
    /// Already stored under the same ledger.
    TxPresent,
    /// Indexed elsewhere; left untouched.
    TxSkipped,
    Other,
}

fn apply(txn: &mut dyn TreeTxn, write: &PathWrite, stored: usize) -> StorageResult<Applied> {
    match write {
        PathWrite::Set { path, value } => {
            txn.set(path, value)?;
            Ok(Applied::Other)
        }
        PathWrite::RemoveTree { path } => {
            txn.remove_tree(path)?;
            Ok(Applied::Other)
        }
        PathWrite::SetStoredCount { path } => {
            txn.set(path, &stored.to_string())?;
            Ok(Applied::Other)
        }
        PathWrite::SetIfGreater { path, value } => {
            let current = match txn.get(path)? {
                Some(raw) => Some(
                    raw.parse::<u64>()
                        .map_err(|_| StorageError::corrupt(path, "not an unsigned integer"))?,
                ),
                None => None,
            };
            if current.map_or(true, |current| *value > current) {
                txn.set(path, &value.to_string())?;
            }
            Ok(Applied::Other)
        }
        PathWrite::AppendTransaction(tx) => append_transaction(txn, tx),
        PathWrite::HydrateTransaction(tx) => {
            if txn.get(&tx.index_path)?.is_some() {
                return Ok(Applied::TxSkipped);
            }
            txn.set(&tx.hydrated_path.child(XDR_FIELD), &tx.envelope_xdr)?;
            txn.set(&tx.hydrated_path.child(HASH_FIELD), &tx.hash)?;
            txn.set(&tx.index_path, &tx.ledger.to_string())?;
            Ok(Applied::TxWritten)
        }
    }
}

fn append_transaction(txn: &mut dyn TreeTxn, tx: &TxWrite) -> StorageResult<Applied> {
    if let Some(indexed) = txn.get(&tx.index_path)? {
        if indexed != tx.ledger.to_string() {
            tracing::warn!(
                hash = %tx.hash,
                indexed = %indexed,
                ledger = tx.ledger,
                "Hash already indexed under another ledger, skipping"
            );
            return Ok(Applied::TxSkipped);
        }
        if !txn.node_state(&tx.hydrated_path)?.exists() {
            return Ok(Applied::TxPresent);
        }
        // Promote: the dense copy replaces the hydrated one.
        txn.remove_tree(&tx.hydrated_path)?;
    }

    let slot = next_slot(txn, tx.ledger)?;
    let slot_path = codec::tx_root(tx.ledger).child(slot);
    txn.set(&slot_path.child(XDR_FIELD), &tx.envelope_xdr)?;
    txn.set(&slot_path.child(HASH_FIELD), &tx.hash)?;
    txn.set(&tx.index_path, &tx.ledger.to_string())?;

    let next = slot
        .checked_add(1)
        .ok_or_else(|| StorageError::corrupt(&slot_path, "dense slot counter overflow"))?;
    txn.set(&codec::ledger_field(tx.ledger, NEXT_SLOT_FIELD), &next.to_string())?;
    Ok(Applied::TxWritten)
}

/// Next free dense slot. Ledgers written before the counter existed fall
/// back to one past the highest numeric child.
fn next_slot(txn: &dyn TreeTxn, ledger: LedgerSequence) -> StorageResult<u32> {
    let counter = codec::ledger_field(ledger, NEXT_SLOT_FIELD);
    if let Some(raw) = txn.get(&counter)? {
        return raw
            .parse::<u32>()
            .map_err(|_| StorageError::corrupt(&counter, "not a slot index"));
    }

    let highest = txn
        .children(&codec::tx_root(ledger))?
        .iter()
        .filter_map(|child| codec::parse_dense_slot(child))
        .max();
    Ok(highest.map_or(0, |h| h.saturating_add(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTreeStore;
    use pakana_core::Trustline;

    fn tx(hash: &str, ledger: LedgerSequence) -> TransactionRecord {
        TransactionRecord {
            hash: hash.to_string(),
            ledger,
            envelope_xdr: format!("AAAA{hash}"),
            source_account: "GSENDER".to_string(),
            paging_token: format!("{ledger}-{hash}"),
        }
    }

    fn header(sequence: LedgerSequence) -> LedgerHeader {
        LedgerHeader {
            sequence,
            closed_at: "2024-01-01T00:00:00Z".to_string(),
            total_tx_count: 5,
        }
    }

    fn snapshot(balance: &str, trustlines: Vec<Trustline>) -> AccountSnapshot {
        AccountSnapshot {
            account_id: "GACCOUNT".to_string(),
            balance: balance.to_string(),
            sequence_number: 42,
            last_modified: 1_700_000_000,
            trustlines,
        }
    }

    fn maintainer() -> (IndexMaintainer<MemoryTreeStore>, Arc<MemoryTreeStore>) {
        let store = Arc::new(MemoryTreeStore::new());
        (IndexMaintainer::new(Arc::clone(&store)), store)
    }

    fn usdc(balance: &str) -> Trustline {
        Trustline {
            asset_code: "USDC".to_string(),
            issuer: "GISSUER".to_string(),
            balance: balance.to_string(),
            limit: "1000".to_string(),
        }
    }

    #[test]
    fn test_account_write_replaces_wholesale() -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        maintainer.commit(&WriteSet::account(&snapshot("10", vec![usdc("5")]))?)?;
        maintainer.commit(&WriteSet::account(&snapshot("20", vec![]))?)?;

        assert_eq!(
            store.get(&codec::account_field("GACCOUNT", BALANCE_FIELD)?)?,
            Some("20".to_string())
        );
        assert!(!store
            .node_state(&codec::trustlines_root("GACCOUNT")?)?
            .exists());
        assert_eq!(store.get(&codec::tracked_path("GACCOUNT")?)?, Some("1".to_string()));
        Ok(())
    }

    #[test]
    fn test_account_write_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        let set = WriteSet::account(&snapshot("10", vec![usdc("5")]))?;
        maintainer.commit(&set)?;
        let first = store.snapshot()?;
        maintainer.commit(&set)?;
        assert_eq!(first, store.snapshot()?);
        Ok(())
    }

    #[test]
    fn test_ledger_write_indexes_and_advances_latest() -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        let outcome = maintainer.commit(&WriteSet::ledger(&header(100), &[tx("t1", 100), tx("t2", 100)])?)?;

        assert_eq!(outcome, CommitOutcome::Committed { transactions_written: 2 });
        assert_eq!(store.get(&codec::latest_path())?, Some("100".to_string()));
        assert_eq!(store.get(&codec::hash_index_path("t2")?)?, Some("100".to_string()));
        assert_eq!(
            store.get(&codec::tx_root(100).child(1).child(HASH_FIELD))?,
            Some("t2".to_string())
        );
        assert_eq!(
            store.get(&codec::ledger_field(100, NEXT_SLOT_FIELD))?,
            Some("2".to_string())
        );
        assert_eq!(
            store.get(&codec::ledger_field(100, FILTERED_TX_COUNT_FIELD))?,
            Some("2".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_filtered_count_skips_hash_owned_by_another_ledger(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        maintainer.commit(&WriteSet::backfill(&[tx("dup", 8)])?)?;

        let outcome =
            maintainer.commit(&WriteSet::ledger(&header(9), &[tx("ok", 9), tx("dup", 9)])?)?;

        assert_eq!(outcome.transactions_written(), 1);
        assert_eq!(
            store.get(&codec::ledger_field(9, FILTERED_TX_COUNT_FIELD))?,
            Some("1".to_string())
        );
        let dense = store
            .children(&codec::tx_root(9))?
            .iter()
            .filter(|child| codec::parse_dense_slot(child).is_some())
            .count();
        assert_eq!(dense, 1);
        assert_eq!(store.get(&codec::hash_index_path("dup")?)?, Some("8".to_string()));
        Ok(())
    }

    #[test]
    fn test_filtered_count_includes_backfilled_copies() -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        maintainer.commit(&WriteSet::backfill(&[tx("early", 12)])?)?;

        let outcome =
            maintainer.commit(&WriteSet::ledger(&header(12), &[tx("early", 12), tx("late", 12)])?)?;

        assert_eq!(outcome.transactions_written(), 1);
        assert_eq!(
            store.get(&codec::ledger_field(12, FILTERED_TX_COUNT_FIELD))?,
            Some("2".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_ledger_already_present_is_noop() -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        maintainer.commit(&WriteSet::ledger(&header(7), &[tx("a", 7)])?)?;
        let before = store.snapshot()?;

        let outcome = maintainer.commit(&WriteSet::ledger(&header(7), &[tx("a", 7), tx("b", 7)])?)?;
        assert_eq!(outcome, CommitOutcome::AlreadyPresent);
        assert_eq!(before, store.snapshot()?);
        Ok(())
    }

    #[test]
    fn test_older_ledger_does_not_move_latest_back() -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        maintainer.commit(&WriteSet::ledger(&header(10), &[])?)?;
        maintainer.commit(&WriteSet::ledger(&header(9), &[])?)?;
        assert_eq!(store.get(&codec::latest_path())?, Some("10".to_string()));
        Ok(())
    }

    #[test]
    fn test_ledger_rejects_foreign_transaction() {
        let result = WriteSet::ledger(&header(10), &[tx("x", 11)]);
        assert!(matches!(result, Err(ValidationError::InvalidValue { .. })));
    }

    #[test]
    fn test_hydrated_then_dense_is_promoted() -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        maintainer.commit(&WriteSet::hydrated_transaction(&tx("h", 50))?)?;
        let hydrated = codec::tx_slot_path(50, &TxSlot::Hydrated("h".to_string()))?;
        assert!(store.node_state(&hydrated)?.exists());

        let outcome = maintainer.commit(&WriteSet::ledger(&header(50), &[tx("h", 50)])?)?;
        assert_eq!(outcome.transactions_written(), 1);
        assert!(!store.node_state(&hydrated)?.exists());
        assert_eq!(
            store.get(&codec::tx_root(50).child(0).child(HASH_FIELD))?,
            Some("h".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_hydrate_skips_indexed_hash() -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        maintainer.commit(&WriteSet::ledger(&header(50), &[tx("h", 50)])?)?;
        let outcome = maintainer.commit(&WriteSet::hydrated_transaction(&tx("h", 50))?)?;
        assert_eq!(outcome, CommitOutcome::AlreadyPresent);
        assert!(!store
            .node_state(&codec::tx_slot_path(50, &TxSlot::Hydrated("h".to_string()))?)?
            .exists());
        Ok(())
    }

    #[test]
    fn test_backfill_skips_indexed_and_continues_slots() -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        maintainer.commit(&WriteSet::backfill(&[tx("a", 3)])?)?;
        let outcome = maintainer.commit(&WriteSet::backfill(&[tx("a", 3), tx("b", 3)])?)?;

        assert_eq!(outcome.transactions_written(), 1);
        assert_eq!(
            store.get(&codec::tx_root(3).child(1).child(HASH_FIELD))?,
            Some("b".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_legacy_ledger_without_counter() -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        store.atomic(|txn| {
            txn.set(&codec::tx_root(4).child(0).child(HASH_FIELD), "old0")?;
            txn.set(&codec::tx_root(4).child(1).child(HASH_FIELD), "old1")
        })?;

        maintainer.commit(&WriteSet::backfill(&[tx("new", 4)])?)?;
        assert_eq!(
            store.get(&codec::tx_root(4).child(2).child(HASH_FIELD))?,
            Some("new".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_corrupt_latest_aborts_commit() -> Result<(), Box<dyn std::error::Error>> {
        let (maintainer, store) = maintainer();
        store.atomic(|txn| txn.set(&codec::latest_path(), "garbage"))?;

        let result = maintainer.commit(&WriteSet::ledger(&header(5), &[tx("t", 5)])?);
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));
        assert!(!store.node_state(&codec::ledger_path(5))?.exists());
        assert!(store.get(&codec::hash_index_path("t")?)?.is_none());
        Ok(())
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::memory::MemoryTreeStore;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// However pointer updates are ordered, the pointer ends at the max
        /// and never decreases along the way.
        #[test]
        fn prop_latest_pointer_is_monotonic(updates in proptest::collection::vec(any::<u32>(), 1..40)) {
            let store = Arc::new(MemoryTreeStore::new());
            let maintainer = IndexMaintainer::new(Arc::clone(&store));
            let mut previous = 0u64;

            for seq in &updates {
                maintainer
                    .commit(&WriteSet::latest_pointer(*seq))
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let current: u64 = store
                    .get(&codec::latest_path())
                    .map_err(|e| TestCaseError::fail(e.to_string()))?
                    .and_then(|raw| raw.parse().ok())
                    .ok_or_else(|| TestCaseError::fail("latest pointer missing"))?;
                prop_assert!(current >= previous);
                previous = current;
            }

            let max = updates.iter().copied().max().map(u64::from);
            prop_assert_eq!(Some(previous), max);
        }
    }
}
