//! Local reads with the presence predicates the read-through cache relies on.
//!
//! `Ok(None)` means "not present locally", never "does not exist".

use std::str::FromStr;
use std::sync::Arc;

use pakana_core::codec::{
    self, BALANCE_FIELD, CLOSED_AT_FIELD, FILTERED_TX_COUNT_FIELD, HASH_FIELD, LAST_MODIFIED_FIELD,
    LIMIT_FIELD, SEQ_NUM_FIELD, TOTAL_TX_COUNT_FIELD, TRUSTLINES_FIELD, TX_HYDRATED_SEGMENT, XDR_FIELD,
};
use pakana_core::{
    AccountSnapshot, HydrateError, LedgerRecord, LedgerSequence, StorageError, StoredTransaction,
    TreePath, Trustline, TxSlot,
};

use crate::tree::{TreeStore, TreeView};

type ReadResult<T> = Result<T, HydrateError>;

/// Read-only access to a [`TreeStore`].
///
/// Every record is assembled inside one [`TreeStore::read`] snapshot, so a
/// concurrent commit is seen either entirely or not at all.
pub struct LedgerReader<S> {
    store: Arc<S>,
}

impl<S> Clone for LedgerReader<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: TreeStore> LedgerReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Highest fully committed ledger.
    pub fn latest(&self) -> ReadResult<Option<LedgerSequence>> {
        let path = codec::latest_path();
        match self.store.get(&path)? {
            Some(raw) => Ok(Some(parse_field(&path, &raw)?)),
            None => Ok(None),
        }
    }

    /// An account is present when its node has a value or any descendant.
    pub fn account(&self, account_id: &str) -> ReadResult<Option<AccountSnapshot>> {
        let root = codec::account_path(account_id)?;
        self.store.read(|view| Snapshot(view).account(account_id, &root))
    }

    pub fn trustlines(&self, account_id: &str) -> ReadResult<Vec<Trustline>> {
        let root = codec::trustlines_root(account_id)?;
        self.store.read(|view| Snapshot(view).trustlines(&root))
    }

    pub fn is_tracked(&self, account_id: &str) -> ReadResult<bool> {
        Ok(self.store.get(&codec::tracked_path(account_id)?)?.is_some())
    }

    /// A ledger is present iff `closed_at` is set.
    pub fn ledger(&self, sequence: LedgerSequence) -> ReadResult<Option<LedgerRecord>> {
        self.store.read(|view| Snapshot(view).ledger(sequence))
    }

    pub fn is_indexed(&self, hash: &str) -> ReadResult<bool> {
        Ok(self.store.get(&codec::hash_index_path(hash)?)?.is_some())
    }

    /// A transaction is present when its hash is indexed and the referenced
    /// ledger holds a child slot carrying that hash.
    pub fn transaction(&self, hash: &str) -> ReadResult<Option<StoredTransaction>> {
        let index_path = codec::hash_index_path(hash)?;
        self.store.read(|view| Snapshot(view).transaction(hash, &index_path))
    }

    /// Every stored transaction of a ledger: dense slots in slot order, then
    /// hydrated slots.
    pub fn ledger_transactions(&self, sequence: LedgerSequence) -> ReadResult<Vec<StoredTransaction>> {
        self.store.read(|view| Snapshot(view).ledger_transactions(sequence))
    }
}

/// Record assembly over one consistent view.
struct Snapshot<'v>(&'v dyn TreeView);

impl Snapshot<'_> {
    fn account(&self, account_id: &str, root: &TreePath) -> ReadResult<Option<AccountSnapshot>> {
        if !self.0.node_state(root)?.exists() {
            return Ok(None);
        }

        let balance = self.field_or_zero(&root.child(BALANCE_FIELD))?;
        let seq_path = root.child(SEQ_NUM_FIELD);
        let sequence_number = parse_field(&seq_path, &self.field_or_zero(&seq_path)?)?;
        let modified_path = root.child(LAST_MODIFIED_FIELD);
        let last_modified = parse_field(&modified_path, &self.field_or_zero(&modified_path)?)?;

        Ok(Some(AccountSnapshot {
            account_id: account_id.to_string(),
            balance,
            sequence_number,
            last_modified,
            trustlines: self.trustlines(&root.child(TRUSTLINES_FIELD))?,
        }))
    }

    fn trustlines(&self, root: &TreePath) -> ReadResult<Vec<Trustline>> {
        let mut lines = Vec::new();
        for asset_code in self.0.children(root)? {
            let code_path = root.child(&asset_code);
            for issuer in self.0.children(&code_path)? {
                let line_path = code_path.child(&issuer);
                lines.push(Trustline {
                    asset_code: asset_code.clone(),
                    balance: self.field_or_zero(&line_path.child(BALANCE_FIELD))?,
                    limit: self.field_or_zero(&line_path.child(LIMIT_FIELD))?,
                    issuer,
                });
            }
        }
        Ok(lines)
    }

    fn ledger(&self, sequence: LedgerSequence) -> ReadResult<Option<LedgerRecord>> {
        let Some(closed_at) = self.0.get(&codec::ledger_field(sequence, CLOSED_AT_FIELD))? else {
            return Ok(None);
        };

        let total_path = codec::ledger_field(sequence, TOTAL_TX_COUNT_FIELD);
        let total_tx_count = parse_field(&total_path, &self.field_or_zero(&total_path)?)?;

        let filtered_path = codec::ledger_field(sequence, FILTERED_TX_COUNT_FIELD);
        let filtered_tx_count = match self.0.get(&filtered_path)? {
            Some(raw) => parse_field(&filtered_path, &raw)?,
            None => self.count_dense_slots(sequence)?,
        };

        Ok(Some(LedgerRecord {
            sequence,
            closed_at,
            total_tx_count,
            filtered_tx_count,
        }))
    }

    fn transaction(&self, hash: &str, index_path: &TreePath) -> ReadResult<Option<StoredTransaction>> {
        let Some(raw) = self.0.get(index_path)? else {
            return Ok(None);
        };
        let ledger: LedgerSequence = parse_field(index_path, &raw)?;

        for slot in self.dense_slots(ledger)? {
            let slot_path = codec::tx_root(ledger).child(slot);
            if self.0.get(&slot_path.child(HASH_FIELD))?.as_deref() == Some(hash) {
                return self.read_slot(hash, ledger, TxSlot::Dense(slot)).map(Some);
            }
        }

        let hydrated = codec::tx_slot_path(ledger, &TxSlot::Hydrated(hash.to_string()))?;
        if self.0.get(&hydrated.child(HASH_FIELD))?.as_deref() == Some(hash) {
            return self
                .read_slot(hash, ledger, TxSlot::Hydrated(hash.to_string()))
                .map(Some);
        }

        tracing::warn!(hash, ledger, "Hash index points at a ledger without the transaction");
        Ok(None)
    }

    fn ledger_transactions(&self, sequence: LedgerSequence) -> ReadResult<Vec<StoredTransaction>> {
        let mut out = Vec::new();
        for slot in self.dense_slots(sequence)? {
            let hash_path = codec::tx_root(sequence).child(slot).child(HASH_FIELD);
            if let Some(hash) = self.0.get(&hash_path)? {
                out.push(self.read_slot(&hash, sequence, TxSlot::Dense(slot))?);
            }
        }

        let hydrated_root = codec::tx_root(sequence).child(TX_HYDRATED_SEGMENT);
        for hash in self.0.children(&hydrated_root)? {
            let slot = TxSlot::Hydrated(hash.clone());
            out.push(self.read_slot(&hash, sequence, slot)?);
        }
        Ok(out)
    }

    fn read_slot(&self, hash: &str, ledger: LedgerSequence, slot: TxSlot) -> ReadResult<StoredTransaction> {
        let slot_path = codec::tx_slot_path(ledger, &slot)?;
        let xdr_path = slot_path.child(XDR_FIELD);
        let envelope_xdr = self
            .0
            .get(&xdr_path)?
            .ok_or_else(|| StorageError::corrupt(&xdr_path, "transaction slot without envelope"))?;
        Ok(StoredTransaction {
            hash: hash.to_string(),
            ledger,
            envelope_xdr,
            slot,
        })
    }

    fn dense_slots(&self, sequence: LedgerSequence) -> ReadResult<Vec<u32>> {
        let mut slots: Vec<u32> = self
            .0
            .children(&codec::tx_root(sequence))?
            .iter()
            .filter_map(|child| codec::parse_dense_slot(child))
            .collect();
        // Children come back in string order ("10" before "2").
        slots.sort_unstable();
        Ok(slots)
    }

    fn count_dense_slots(&self, sequence: LedgerSequence) -> ReadResult<u32> {
        let count = self.dense_slots(sequence)?.len();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn field_or_zero(&self, path: &TreePath) -> ReadResult<String> {
        Ok(self.0.get(path)?.unwrap_or_else(|| "0".to_string()))
    }
}

fn parse_field<T: FromStr>(path: &TreePath, raw: &str) -> Result<T, StorageError> {
    raw.parse()
        .map_err(|_| StorageError::corrupt(path, format!("unparseable value {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexMaintainer, WriteSet};
    use crate::memory::MemoryTreeStore;
    use pakana_core::{LedgerHeader, TransactionRecord};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn setup() -> (IndexMaintainer<MemoryTreeStore>, LedgerReader<MemoryTreeStore>, Arc<MemoryTreeStore>) {
        let store = Arc::new(MemoryTreeStore::new());
        (
            IndexMaintainer::new(Arc::clone(&store)),
            LedgerReader::new(Arc::clone(&store)),
            store,
        )
    }

    fn tx(hash: &str, ledger: LedgerSequence) -> TransactionRecord {
        TransactionRecord {
            hash: hash.to_string(),
            ledger,
            envelope_xdr: format!("XDR-{hash}"),
            source_account: "GSRC".to_string(),
            paging_token: hash.to_string(),
        }
    }

    #[test]
    fn test_account_round_trip() -> TestResult {
        let (maintainer, reader, _) = setup();
        let snapshot = AccountSnapshot {
            account_id: "GA".to_string(),
            balance: "500000000".to_string(),
            sequence_number: 42,
            last_modified: 1_700_000_000,
            trustlines: vec![Trustline {
                asset_code: "USDC".to_string(),
                issuer: "GISSUER".to_string(),
                balance: "100".to_string(),
                limit: "9000".to_string(),
            }],
        };
        maintainer.commit(&WriteSet::account(&snapshot)?)?;

        assert_eq!(reader.account("GA")?, Some(snapshot));
        assert!(reader.is_tracked("GA")?);
        assert_eq!(reader.account("GB")?, None);
        Ok(())
    }

    #[test]
    fn test_account_reads_never_straddle_a_rehydration() -> TestResult {
        use std::sync::atomic::{AtomicBool, Ordering};

        fn snapshot(n: i64) -> AccountSnapshot {
            AccountSnapshot {
                account_id: "GA".to_string(),
                balance: n.to_string(),
                sequence_number: n,
                last_modified: n,
                trustlines: vec![Trustline {
                    asset_code: format!("C{}", n % 3),
                    issuer: "GISSUER".to_string(),
                    balance: n.to_string(),
                    limit: "1".to_string(),
                }],
            }
        }

        let (maintainer, reader, _) = setup();
        maintainer.commit(&WriteSet::account(&snapshot(0))?)?;

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let stop = Arc::clone(&stop);
            let maintainer = maintainer.clone();
            std::thread::spawn(move || {
                let mut n = 1;
                while !stop.load(Ordering::Relaxed) {
                    let set = WriteSet::account(&snapshot(n)).expect("valid account");
                    maintainer.commit(&set).expect("commit succeeds");
                    n += 1;
                }
            })
        };

        for _ in 0..20_000 {
            let account = reader.account("GA")?.ok_or("account vanished mid-rewrite")?;
            assert_eq!(account.balance, account.sequence_number.to_string());
            assert_eq!(account.last_modified, account.sequence_number);
            assert_eq!(account.trustlines.len(), 1);
            assert_eq!(account.trustlines[0].balance, account.balance);
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().map_err(|_| "writer panicked")?;
        Ok(())
    }

    #[test]
    fn test_account_rejects_malformed_id() {
        let (_, reader, _) = setup();
        assert!(matches!(reader.account(""), Err(HydrateError::InvalidKey(_))));
        assert!(matches!(reader.account("a/b"), Err(HydrateError::InvalidKey(_))));
    }

    #[test]
    fn test_ledger_presence_requires_closed_at() -> TestResult {
        let (maintainer, reader, _) = setup();
        maintainer.commit(&WriteSet::backfill(&[tx("early", 9)])?)?;
        assert_eq!(reader.ledger(9)?, None);

        let header = LedgerHeader {
            sequence: 9,
            closed_at: "2024-02-02T00:00:00Z".to_string(),
            total_tx_count: 3,
        };
        maintainer.commit(&WriteSet::ledger(&header, &[tx("early", 9)])?)?;
        let record = reader.ledger(9)?.ok_or("ledger missing")?;
        assert_eq!(record.total_tx_count, 3);
        assert_eq!(record.filtered_tx_count, 1);
        assert_eq!(reader.latest()?, Some(9));
        Ok(())
    }

    #[test]
    fn test_ledger_without_filtered_count_counts_slots() -> TestResult {
        let (_, reader, store) = setup();
        store.atomic(|txn| {
            txn.set(&codec::ledger_field(3, CLOSED_AT_FIELD), "t")?;
            txn.set(&codec::tx_root(3).child(0).child(HASH_FIELD), "a")?;
            txn.set(&codec::tx_root(3).child(1).child(HASH_FIELD), "b")
        })?;
        assert_eq!(reader.ledger(3)?.map(|l| l.filtered_tx_count), Some(2));
        Ok(())
    }

    #[test]
    fn test_transaction_lookup_dense_and_hydrated() -> TestResult {
        let (maintainer, reader, _) = setup();
        maintainer.commit(&WriteSet::backfill(&[tx("d", 20)])?)?;
        maintainer.commit(&WriteSet::hydrated_transaction(&tx("h", 20))?)?;

        let dense = reader.transaction("d")?.ok_or("dense missing")?;
        assert_eq!(dense.slot, TxSlot::Dense(0));
        assert_eq!(dense.envelope_xdr, "XDR-d");

        let hydrated = reader.transaction("h")?.ok_or("hydrated missing")?;
        assert_eq!(hydrated.slot, TxSlot::Hydrated("h".to_string()));

        assert_eq!(reader.ledger_transactions(20)?.len(), 2);
        assert_eq!(reader.transaction("missing")?, None);
        Ok(())
    }

    #[test]
    fn test_dangling_index_is_not_present() -> TestResult {
        let (_, reader, store) = setup();
        let index = codec::hash_index_path("ghost")?;
        store.atomic(|txn| txn.set(&index, "77"))?;
        assert_eq!(reader.transaction("ghost")?, None);
        Ok(())
    }

    #[test]
    fn test_dense_slots_in_numeric_order() -> TestResult {
        let (maintainer, reader, _) = setup();
        let txs: Vec<_> = (0..12).map(|i| tx(&format!("h{i}"), 1)).collect();
        maintainer.commit(&WriteSet::backfill(&txs)?)?;

        let hashes: Vec<_> = reader
            .ledger_transactions(1)?
            .into_iter()
            .map(|t| t.hash)
            .collect();
        let expected: Vec<_> = (0..12).map(|i| format!("h{i}")).collect();
        assert_eq!(hashes, expected);
        Ok(())
    }

    #[test]
    fn test_corrupt_latest_is_reported() -> TestResult {
        let (_, reader, store) = setup();
        store.atomic(|txn| txn.set(&codec::latest_path(), "x"))?;
        assert!(matches!(
            reader.latest(),
            Err(HydrateError::Store(StorageError::Corrupt { .. }))
        ));
        Ok(())
    }
}
