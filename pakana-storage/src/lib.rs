//! Pakana Storage - Hierarchical Store and Index Maintainer
//!
//! Defines the tree-structured store abstraction the cache sits on, two
//! implementations of it (in-memory and LMDB), the Index Maintainer that
//! applies multi-part records atomically, and the local reader that decides
//! whether a record is present.

pub mod index;
pub mod key;
pub mod lmdb;
pub mod memory;
pub mod reader;
pub mod tree;

pub use index::{CommitOutcome, IndexMaintainer, PathWrite, TxWrite, WriteSet};
pub use lmdb::{LmdbStoreError, LmdbTreeStore};
pub use memory::MemoryTreeStore;
pub use reader::LedgerReader;
pub use tree::{NodeState, TreeStore, TreeTxn, TreeView};

#[cfg(test)]
mod tests {
    use super::*;
    use pakana_core::{LedgerHeader, TransactionRecord};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// The same write sets produce the same observable records on both stores.
    #[test]
    fn test_backends_agree() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let lmdb = Arc::new(LmdbTreeStore::open(dir.path(), 10)?);
        let memory = Arc::new(MemoryTreeStore::new());

        let header = LedgerHeader {
            sequence: 12,
            closed_at: "2024-03-03T00:00:00Z".to_string(),
            total_tx_count: 2,
        };
        let txs = vec![TransactionRecord {
            hash: "abc".to_string(),
            ledger: 12,
            envelope_xdr: "AAAA".to_string(),
            source_account: "GSRC".to_string(),
            paging_token: "1".to_string(),
        }];
        let set = WriteSet::ledger(&header, &txs)?;

        IndexMaintainer::new(Arc::clone(&lmdb)).commit(&set)?;
        IndexMaintainer::new(Arc::clone(&memory)).commit(&set)?;

        let from_lmdb = LedgerReader::new(lmdb);
        let from_memory = LedgerReader::new(memory);
        assert_eq!(from_lmdb.ledger(12)?, from_memory.ledger(12)?);
        assert_eq!(from_lmdb.transaction("abc")?, from_memory.transaction("abc")?);
        assert_eq!(from_lmdb.latest()?, Some(12));
        Ok(())
    }
}
