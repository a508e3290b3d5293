//! In-memory tree store.
//!
//! Atomic blocks hold the write lock for their whole duration and apply
//! writes in place, recording the previous value of every touched key. The
//! undo log is replayed in reverse unless the block returns `Ok`, including
//! when the closure panics, so a poisoned lock never guards a half-applied
//! block and is safe to recover.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use pakana_core::{StorageError, StorageResult, TreePath};

use crate::tree::{
    map_children, map_node_state, map_subtree_keys, NodeState, TreeStore, TreeTxn, TreeView,
};

/// Tree store backed by an ordered map. Used for tests and for running
/// without a data directory.
#[derive(Debug, Default)]
pub struct MemoryTreeStore {
    entries: RwLock<BTreeMap<TreePath, String>>,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every committed entry, for comparing whole-store state.
    pub fn snapshot(&self) -> StorageResult<BTreeMap<TreePath, String>> {
        Ok(self.read_map().clone())
    }

    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.read_map().len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read_map(&self) -> RwLockReadGuard<'_, BTreeMap<TreePath, String>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, BTreeMap<TreePath, String>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Recovering store lock poisoned by a panicked block");
                self.entries.clear_poison();
                poisoned.into_inner()
            }
        }
    }
}

impl TreeStore for MemoryTreeStore {
    fn get(&self, path: &TreePath) -> StorageResult<Option<String>> {
        Ok(self.read_map().get(path).cloned())
    }

    fn node_state(&self, path: &TreePath) -> StorageResult<NodeState> {
        Ok(map_node_state(&self.read_map(), path))
    }

    fn children(&self, path: &TreePath) -> StorageResult<Vec<String>> {
        Ok(map_children(&self.read_map(), path))
    }

    fn read<R, E, F>(&self, f: F) -> Result<R, E>
    where
        E: From<StorageError>,
        F: FnOnce(&dyn TreeView) -> Result<R, E>,
    {
        let map = self.read_map();
        f(&*map)
    }

    fn atomic<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn TreeTxn) -> StorageResult<R>,
    {
        let mut map = self.write_map();
        let mut txn = MemoryTxn {
            map: &mut *map,
            undo: Vec::new(),
        };

        match f(&mut txn) {
            Ok(result) => {
                txn.undo.clear();
                Ok(result)
            }
            Err(err) => {
                tracing::debug!(discarded = txn.undo.len(), error = %err, "Atomic block rolled back");
                Err(err)
            }
        }
    }
}

/// Undo log over the locked map. Whatever is still logged when it drops
/// is rolled back.
struct MemoryTxn<'a> {
    map: &'a mut BTreeMap<TreePath, String>,
    undo: Vec<(TreePath, Option<String>)>,
}

impl Drop for MemoryTxn<'_> {
    fn drop(&mut self) {
        while let Some((path, previous)) = self.undo.pop() {
            match previous {
                Some(value) => {
                    self.map.insert(path, value);
                }
                None => {
                    self.map.remove(&path);
                }
            }
        }
    }
}

impl TreeTxn for MemoryTxn<'_> {
    fn get(&self, path: &TreePath) -> StorageResult<Option<String>> {
        Ok(self.map.get(path).cloned())
    }

    fn set(&mut self, path: &TreePath, value: &str) -> StorageResult<()> {
        let previous = self.map.insert(path.clone(), value.to_string());
        self.undo.push((path.clone(), previous));
        Ok(())
    }

    fn remove_tree(&mut self, path: &TreePath) -> StorageResult<u64> {
        let keys = map_subtree_keys(&*self.map, path);
        let removed = keys.len() as u64;
        for key in keys {
            if let Some(previous) = self.map.remove(&key) {
                self.undo.push((key, Some(previous)));
            }
        }
        Ok(removed)
    }

    fn node_state(&self, path: &TreePath) -> StorageResult<NodeState> {
        Ok(map_node_state(&*self.map, path))
    }

    fn children(&self, path: &TreePath) -> StorageResult<Vec<String>> {
        Ok(map_children(&*self.map, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(global: &str, rest: &[&str]) -> TreePath {
        rest.iter()
            .fold(TreePath::global(global), |path, segment| path.child(segment))
    }

    #[test]
    fn test_commit_makes_writes_visible() -> StorageResult<()> {
        let store = MemoryTreeStore::new();
        store.atomic(|txn| {
            txn.set(&p("A", &["1", "balance"]), "10")?;
            txn.set(&p("A", &["1", "seq_num"]), "4")
        })?;

        assert_eq!(store.get(&p("A", &["1", "balance"]))?, Some("10".to_string()));
        assert!(store.node_state(&p("A", &["1"]))?.exists());
        assert_eq!(store.children(&p("A", &["1"]))?, vec!["balance", "seq_num"]);
        Ok(())
    }

    #[test]
    fn test_error_rolls_back_everything() -> StorageResult<()> {
        let store = MemoryTreeStore::new();
        store.atomic(|txn| txn.set(&p("A", &["1", "balance"]), "10"))?;

        let result: StorageResult<()> = store.atomic(|txn| {
            txn.remove_tree(&p("A", &["1"]))?;
            txn.set(&p("A", &["1", "balance"]), "99")?;
            txn.set(&p("A", &["2", "balance"]), "5")?;
            Err(StorageError::aborted("fault"))
        });

        assert!(matches!(result, Err(StorageError::Aborted { .. })));
        assert_eq!(store.get(&p("A", &["1", "balance"]))?, Some("10".to_string()));
        assert!(!store.node_state(&p("A", &["2"]))?.exists());
        assert_eq!(store.len()?, 1);
        Ok(())
    }

    #[test]
    fn test_remove_tree_keeps_prefix_siblings() -> StorageResult<()> {
        let store = MemoryTreeStore::new();
        store.atomic(|txn| {
            txn.set(&p("A", &["1"]), "v")?;
            txn.set(&p("A", &["1", "x"]), "v")?;
            txn.set(&p("A", &["10", "x"]), "v")
        })?;

        let removed = store.atomic(|txn| txn.remove_tree(&p("A", &["1"])))?;
        assert_eq!(removed, 2);
        assert!(store.node_state(&p("A", &["10"]))?.exists());
        Ok(())
    }

    #[test]
    fn test_panicking_block_is_rolled_back() -> StorageResult<()> {
        let store = MemoryTreeStore::new();
        store.atomic(|txn| txn.set(&p("A", &["1", "balance"]), "10"))?;

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.atomic(|txn| -> StorageResult<()> {
                txn.remove_tree(&p("A", &["1"]))?;
                txn.set(&p("A", &["2", "balance"]), "5")?;
                panic!("block failed halfway");
            })
        }));
        assert!(outcome.is_err());

        assert_eq!(store.get(&p("A", &["1", "balance"]))?, Some("10".to_string()));
        assert!(!store.node_state(&p("A", &["2"]))?.exists());

        store.atomic(|txn| txn.set(&p("A", &["1", "balance"]), "11"))?;
        assert_eq!(store.get(&p("A", &["1", "balance"]))?, Some("11".to_string()));
        Ok(())
    }

    #[test]
    fn test_read_sees_one_snapshot() -> StorageResult<()> {
        let store = MemoryTreeStore::new();
        store.atomic(|txn| {
            txn.set(&p("A", &["1", "balance"]), "10")?;
            txn.set(&p("A", &["1", "seq_num"]), "10")
        })?;

        let (balance, seq) = store.read(|view| -> StorageResult<_> {
            Ok((
                view.get(&p("A", &["1", "balance"]))?,
                view.get(&p("A", &["1", "seq_num"]))?,
            ))
        })?;
        assert_eq!(balance, seq);
        assert_eq!(store.read(|view| view.children(&p("A", &["1"])))?, vec!["balance", "seq_num"]);
        Ok(())
    }

    #[test]
    fn test_reads_inside_block_see_own_writes() -> StorageResult<()> {
        let store = MemoryTreeStore::new();
        let seen = store.atomic(|txn| {
            txn.set(&p("S", &["latest"]), "7")?;
            txn.get(&p("S", &["latest"]))
        })?;
        assert_eq!(seen, Some("7".to_string()));
        Ok(())
    }
}
