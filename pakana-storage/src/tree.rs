//! Hierarchical store abstraction.
//!
//! A store maps [`TreePath`]s to string values. A node may hold a value,
//! have descendants, both, or neither. All writes go through
//! [`TreeStore::atomic`]: the closure's writes become visible together when
//! it returns `Ok`, and none of them do when it returns `Err`. Multi-key
//! reads that must not straddle a commit go through [`TreeStore::read`].

use std::collections::BTreeMap;
use std::ops::Bound;

use pakana_core::{StorageError, StorageResult, TreePath};

/// Whether a node holds a value and/or has descendants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeState {
    pub has_value: bool,
    pub has_children: bool,
}

impl NodeState {
    /// A node "exists" if it has a value or any descendant.
    pub fn exists(&self) -> bool {
        self.has_value || self.has_children
    }
}

/// A consistent read-only view of committed state.
pub trait TreeView {
    fn get(&self, path: &TreePath) -> StorageResult<Option<String>>;

    fn node_state(&self, path: &TreePath) -> StorageResult<NodeState>;

    /// Immediate child segment names, in key order.
    fn children(&self, path: &TreePath) -> StorageResult<Vec<String>>;
}

/// Operations available inside an atomic block.
pub trait TreeTxn {
    fn get(&self, path: &TreePath) -> StorageResult<Option<String>>;

    fn set(&mut self, path: &TreePath, value: &str) -> StorageResult<()>;

    /// Remove the node and all its descendants. Returns entries removed.
    fn remove_tree(&mut self, path: &TreePath) -> StorageResult<u64>;

    fn node_state(&self, path: &TreePath) -> StorageResult<NodeState>;

    /// Immediate child segment names, in key order.
    fn children(&self, path: &TreePath) -> StorageResult<Vec<String>>;
}

/// A hierarchical key-value store with an atomic write primitive.
///
/// Implementations serialize atomic blocks; reads outside a block see only
/// committed state.
pub trait TreeStore: Send + Sync + 'static {
    fn get(&self, path: &TreePath) -> StorageResult<Option<String>>;

    fn node_state(&self, path: &TreePath) -> StorageResult<NodeState>;

    fn children(&self, path: &TreePath) -> StorageResult<Vec<String>>;

    /// Run `f` against a single snapshot. No commit becomes visible while
    /// `f` runs.
    fn read<R, E, F>(&self, f: F) -> Result<R, E>
    where
        E: From<StorageError>,
        F: FnOnce(&dyn TreeView) -> Result<R, E>;

    /// Run `f` as one all-or-nothing unit of work.
    fn atomic<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn TreeTxn) -> StorageResult<R>;
}

// ============================================================================
// ORDERED MAP HELPERS
// ============================================================================
//
// Shared by every store that can expose its contents as an ordered map of
// paths. Descendants of a path are the contiguous run of keys after it.

pub(crate) fn map_node_state(map: &BTreeMap<TreePath, String>, path: &TreePath) -> NodeState {
    let has_value = map.contains_key(path);
    let has_children = map
        .range((Bound::Excluded(path), Bound::Unbounded))
        .next()
        .is_some_and(|(key, _)| key.is_descendant_of(path));
    NodeState {
        has_value,
        has_children,
    }
}

pub(crate) fn map_children(map: &BTreeMap<TreePath, String>, path: &TreePath) -> Vec<String> {
    let depth = path.len();
    let mut children: Vec<String> = Vec::new();
    for (key, _) in map
        .range((Bound::Excluded(path), Bound::Unbounded))
        .take_while(|(key, _)| key.is_descendant_of(path))
    {
        let segment = &key.segments()[depth];
        if children.last() != Some(segment) {
            children.push(segment.clone());
        }
    }
    children
}

impl TreeView for BTreeMap<TreePath, String> {
    fn get(&self, path: &TreePath) -> StorageResult<Option<String>> {
        Ok(BTreeMap::get(self, path).cloned())
    }

    fn node_state(&self, path: &TreePath) -> StorageResult<NodeState> {
        Ok(map_node_state(self, path))
    }

    fn children(&self, path: &TreePath) -> StorageResult<Vec<String>> {
        Ok(map_children(self, path))
    }
}

pub(crate) fn map_subtree_keys(map: &BTreeMap<TreePath, String>, path: &TreePath) -> Vec<TreePath> {
    map.range((Bound::Included(path), Bound::Unbounded))
        .take_while(|(key, _)| key.starts_with(path))
        .map(|(key, _)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> TreePath {
        let mut iter = segments.iter();
        let mut out = TreePath::global(iter.next().copied().unwrap_or("root"));
        for segment in iter {
            out = out.child(segment);
        }
        out
    }

    fn sample() -> BTreeMap<TreePath, String> {
        let mut map = BTreeMap::new();
        map.insert(path(&["A", "x"]), "1".to_string());
        map.insert(path(&["A", "x", "b"]), "2".to_string());
        map.insert(path(&["A", "x", "c", "d"]), "3".to_string());
        map.insert(path(&["A", "xy"]), "4".to_string());
        map
    }

    #[test]
    fn test_node_state() {
        let map = sample();
        assert_eq!(
            map_node_state(&map, &path(&["A", "x"])),
            NodeState { has_value: true, has_children: true }
        );
        assert_eq!(
            map_node_state(&map, &path(&["A", "x", "c"])),
            NodeState { has_value: false, has_children: true }
        );
        assert!(!map_node_state(&map, &path(&["A", "z"])).exists());
        assert!(!map_node_state(&map, &path(&["A", "xy"])).has_children);
    }

    #[test]
    fn test_children_are_deduplicated() {
        let map = sample();
        assert_eq!(map_children(&map, &path(&["A", "x"])), vec!["b", "c"]);
        assert_eq!(map_children(&map, &path(&["A"])), vec!["x", "xy"]);
    }

    #[test]
    fn test_subtree_keys_exclude_prefix_siblings() {
        let map = sample();
        let keys = map_subtree_keys(&map, &path(&["A", "x"]));
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| k.starts_with(&path(&["A", "x"]))));
    }
}
