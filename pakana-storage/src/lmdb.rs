//! LMDB-backed tree store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to persist the hierarchical
//! key space in a single memory-mapped database. Paths are encoded with
//! [`crate::key::encode_path`], so every subtree is one contiguous key range.
//!
//! # Atomicity
//!
//! Each atomic block runs inside one LMDB write transaction. LMDB allows a
//! single writer at a time, which serializes blocks. The transaction is
//! committed only if the closure returns `Ok`; otherwise it is aborted and
//! nothing it wrote becomes visible.
//!
//! [`TreeStore::read`] holds one read transaction for the whole closure, so
//! it sees a single committed snapshot however many keys it touches.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use pakana_core::{StorageError, StorageResult, TreePath};

use crate::key::{child_segment, encode_path};
use crate::tree::{NodeState, TreeStore, TreeTxn, TreeView};

/// Error type for opening the LMDB store.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StorageError {
    fn from(e: LmdbStoreError) -> Self {
        StorageError::backend(e)
    }
}

/// Tree store persisted in an LMDB environment.
pub struct LmdbTreeStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbTreeStore {
    /// Open (creating if needed) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the memory map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        tracing::info!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB tree store");

        Ok(Self { env, db })
    }

    fn read_txn(&self) -> StorageResult<RoTxn<'_>> {
        self.env.read_txn().map_err(StorageError::backend)
    }
}

fn key_for(path: &TreePath) -> StorageResult<Vec<u8>> {
    encode_path(path).ok_or_else(|| StorageError::corrupt(path, "path cannot be encoded as a key"))
}

fn value_string(path: &TreePath, bytes: &[u8]) -> StorageResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| StorageError::corrupt(path, "value is not UTF-8"))
}

fn read_value(db: &Database<Bytes, Bytes>, txn: &RoTxn<'_>, path: &TreePath) -> StorageResult<Option<String>> {
    let key = key_for(path)?;
    match db.get(txn, &key).map_err(StorageError::backend)? {
        Some(bytes) => value_string(path, bytes).map(Some),
        None => Ok(None),
    }
}

fn read_node_state(db: &Database<Bytes, Bytes>, txn: &RoTxn<'_>, path: &TreePath) -> StorageResult<NodeState> {
    let prefix = key_for(path)?;
    let mut state = NodeState::default();
    let iter = db.prefix_iter(txn, &prefix).map_err(StorageError::backend)?;
    for entry in iter.take(2) {
        let (key, _) = entry.map_err(StorageError::backend)?;
        if key.len() == prefix.len() {
            state.has_value = true;
        } else {
            state.has_children = true;
        }
    }
    Ok(state)
}

fn read_children(db: &Database<Bytes, Bytes>, txn: &RoTxn<'_>, path: &TreePath) -> StorageResult<Vec<String>> {
    let prefix = key_for(path)?;
    let mut children: Vec<String> = Vec::new();
    for entry in db.prefix_iter(txn, &prefix).map_err(StorageError::backend)? {
        let (key, _) = entry.map_err(StorageError::backend)?;
        if key.len() == prefix.len() {
            continue;
        }
        let segment = child_segment(key, &prefix)
            .ok_or_else(|| StorageError::corrupt(path, "undecodable child key"))?;
        if children.last().map(String::as_str) != Some(segment) {
            children.push(segment.to_string());
        }
    }
    Ok(children)
}

impl TreeStore for LmdbTreeStore {
    fn get(&self, path: &TreePath) -> StorageResult<Option<String>> {
        let rtxn = self.read_txn()?;
        read_value(&self.db, &rtxn, path)
    }

    fn node_state(&self, path: &TreePath) -> StorageResult<NodeState> {
        let rtxn = self.read_txn()?;
        read_node_state(&self.db, &rtxn, path)
    }

    fn children(&self, path: &TreePath) -> StorageResult<Vec<String>> {
        let rtxn = self.read_txn()?;
        read_children(&self.db, &rtxn, path)
    }

    fn read<R, E, F>(&self, f: F) -> Result<R, E>
    where
        E: From<StorageError>,
        F: FnOnce(&dyn TreeView) -> Result<R, E>,
    {
        let view = LmdbView {
            rtxn: self.read_txn()?,
            db: self.db,
        };
        f(&view)
    }

    fn atomic<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn TreeTxn) -> StorageResult<R>,
    {
        let wtxn = self.env.write_txn().map_err(StorageError::backend)?;
        let mut txn = LmdbTxn { wtxn, db: self.db };

        match f(&mut txn) {
            Ok(result) => {
                txn.wtxn.commit().map_err(StorageError::backend)?;
                Ok(result)
            }
            Err(err) => {
                txn.wtxn.abort();
                tracing::debug!(error = %err, "LMDB write transaction aborted");
                Err(err)
            }
        }
    }
}

struct LmdbView<'e> {
    rtxn: RoTxn<'e>,
    db: Database<Bytes, Bytes>,
}

impl TreeView for LmdbView<'_> {
    fn get(&self, path: &TreePath) -> StorageResult<Option<String>> {
        read_value(&self.db, &self.rtxn, path)
    }

    fn node_state(&self, path: &TreePath) -> StorageResult<NodeState> {
        read_node_state(&self.db, &self.rtxn, path)
    }

    fn children(&self, path: &TreePath) -> StorageResult<Vec<String>> {
        read_children(&self.db, &self.rtxn, path)
    }
}

struct LmdbTxn<'e> {
    wtxn: RwTxn<'e>,
    db: Database<Bytes, Bytes>,
}

impl TreeTxn for LmdbTxn<'_> {
    fn get(&self, path: &TreePath) -> StorageResult<Option<String>> {
        read_value(&self.db, &self.wtxn, path)
    }

    fn set(&mut self, path: &TreePath, value: &str) -> StorageResult<()> {
        let key = key_for(path)?;
        self.db
            .put(&mut self.wtxn, &key, value.as_bytes())
            .map_err(StorageError::backend)
    }

    fn remove_tree(&mut self, path: &TreePath) -> StorageResult<u64> {
        let prefix = key_for(path)?;

        // Collect first: the prefix iterator borrows the transaction.
        let mut keys = Vec::new();
        for entry in self
            .db
            .prefix_iter(&self.wtxn, &prefix)
            .map_err(StorageError::backend)?
        {
            let (key, _) = entry.map_err(StorageError::backend)?;
            keys.push(key.to_vec());
        }

        let mut removed = 0u64;
        for key in &keys {
            if self
                .db
                .delete(&mut self.wtxn, key)
                .map_err(StorageError::backend)?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn node_state(&self, path: &TreePath) -> StorageResult<NodeState> {
        read_node_state(&self.db, &self.wtxn, path)
    }

    fn children(&self, path: &TreePath) -> StorageResult<Vec<String>> {
        read_children(&self.db, &self.wtxn, path)
    }
}
