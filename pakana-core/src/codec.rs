//! Record codec: where every record lives in the hierarchical key space.
//!
//! Three globals hold all state:
//!
//! ```text
//! Account/<id>/balance | seq_num | last_modified
//! Account/<id>/trustlines/<code>/<issuer>/balance | limit
//! Tracked/<id>
//! Stellar/latest
//! Stellar/tx_hash/<hash>
//! Stellar/ledger/<seq>/closed_at | total_tx_count | filtered_tx_count | next_slot
//! Stellar/ledger/<seq>/tx/<n>/xdr | hash
//! Stellar/ledger/<seq>/tx/hydrated/<hash>/xdr | hash
//! ```
//!
//! The layout is additive-only. Segments that come from callers or from
//! upstream payloads are validated here so a malformed key can never alias
//! another record.

use std::fmt;

use crate::{LedgerSequence, TxSlot, ValidationError};

/// Longest accepted caller-supplied segment.
pub const MAX_SEGMENT_LEN: usize = 128;

pub const ACCOUNT_GLOBAL: &str = "Account";
pub const TRACKED_GLOBAL: &str = "Tracked";
pub const STELLAR_GLOBAL: &str = "Stellar";

pub const LATEST_FIELD: &str = "latest";
pub const LEDGER_FIELD: &str = "ledger";
pub const TX_HASH_FIELD: &str = "tx_hash";

pub const BALANCE_FIELD: &str = "balance";
pub const SEQ_NUM_FIELD: &str = "seq_num";
pub const LAST_MODIFIED_FIELD: &str = "last_modified";
pub const TRUSTLINES_FIELD: &str = "trustlines";
pub const LIMIT_FIELD: &str = "limit";

pub const CLOSED_AT_FIELD: &str = "closed_at";
pub const TOTAL_TX_COUNT_FIELD: &str = "total_tx_count";
pub const FILTERED_TX_COUNT_FIELD: &str = "filtered_tx_count";
pub const NEXT_SLOT_FIELD: &str = "next_slot";
pub const TX_FIELD: &str = "tx";
pub const TX_HYDRATED_SEGMENT: &str = "hydrated";
pub const XDR_FIELD: &str = "xdr";
pub const HASH_FIELD: &str = "hash";

// ============================================================================
// TREE PATH
// ============================================================================

/// An ordered list of string segments addressing one node of the store.
///
/// Ordering is segment-wise, so every descendant of a path sorts after it
/// and before its next sibling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    /// Path of a top-level global.
    pub fn global(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    /// Build a path from caller-supplied segments, validating each one.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        for segment in segments {
            let segment = segment.into();
            validate_segment("path", &segment)?;
            out.push(segment);
        }
        if out.is_empty() {
            return Err(ValidationError::missing("path"));
        }
        Ok(Self { segments: out })
    }

    /// Append a segment known to be well formed (constants, numbers).
    pub fn child(&self, segment: impl fmt::Display) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// Append a caller-supplied segment after validating it.
    pub fn try_child(&self, field: &str, segment: &str) -> Result<Self, ValidationError> {
        validate_segment(field, segment)?;
        Ok(self.child(segment))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// True if `self` equals `ancestor` or lies beneath it.
    pub fn starts_with(&self, ancestor: &TreePath) -> bool {
        self.segments.starts_with(&ancestor.segments)
    }

    /// True if `self` lies strictly beneath `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &TreePath) -> bool {
        self.segments.len() > ancestor.segments.len() && self.starts_with(ancestor)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Reject segments that could alias other nodes or break key encoding.
pub fn validate_segment(field: &str, segment: &str) -> Result<(), ValidationError> {
    if segment.is_empty() {
        return Err(ValidationError::missing(field));
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(ValidationError::invalid(
            field,
            format!("longer than {} bytes", MAX_SEGMENT_LEN),
        ));
    }
    if segment.chars().any(|c| c == '/' || c.is_control()) {
        return Err(ValidationError::invalid(
            field,
            "contains a separator or control character",
        ));
    }
    Ok(())
}

// ============================================================================
// ACCOUNT PATHS
// ============================================================================

pub fn account_path(account_id: &str) -> Result<TreePath, ValidationError> {
    TreePath::global(ACCOUNT_GLOBAL).try_child("account_id", account_id)
}

pub fn account_field(account_id: &str, field: &str) -> Result<TreePath, ValidationError> {
    Ok(account_path(account_id)?.child(field))
}

pub fn trustlines_root(account_id: &str) -> Result<TreePath, ValidationError> {
    account_field(account_id, TRUSTLINES_FIELD)
}

pub fn trustline_path(
    account_id: &str,
    asset_code: &str,
    issuer: &str,
) -> Result<TreePath, ValidationError> {
    trustlines_root(account_id)?
        .try_child("asset_code", asset_code)?
        .try_child("issuer", issuer)
}

pub fn tracked_path(account_id: &str) -> Result<TreePath, ValidationError> {
    TreePath::global(TRACKED_GLOBAL).try_child("account_id", account_id)
}

// ============================================================================
// LEDGER PATHS
// ============================================================================

pub fn ledger_root() -> TreePath {
    TreePath::global(STELLAR_GLOBAL).child(LEDGER_FIELD)
}

pub fn ledger_path(sequence: LedgerSequence) -> TreePath {
    ledger_root().child(sequence)
}

pub fn ledger_field(sequence: LedgerSequence, field: &str) -> TreePath {
    ledger_path(sequence).child(field)
}

pub fn tx_root(sequence: LedgerSequence) -> TreePath {
    ledger_field(sequence, TX_FIELD)
}

pub fn tx_slot_path(sequence: LedgerSequence, slot: &TxSlot) -> Result<TreePath, ValidationError> {
    let root = tx_root(sequence);
    match slot {
        TxSlot::Dense(index) => Ok(root.child(index)),
        TxSlot::Hydrated(hash) => root.child(TX_HYDRATED_SEGMENT).try_child("hash", hash),
    }
}

/// Parse a child name under `tx/` as a dense slot index.
///
/// Returns `None` for the reserved `hydrated` subtree and for anything that
/// is not a canonical decimal (so `"01"` never shadows `"1"`).
pub fn parse_dense_slot(segment: &str) -> Option<u32> {
    let index: u32 = segment.parse().ok()?;
    if index.to_string() == segment {
        Some(index)
    } else {
        None
    }
}

// ============================================================================
// INDEX PATHS
// ============================================================================

pub fn hash_index_root() -> TreePath {
    TreePath::global(STELLAR_GLOBAL).child(TX_HASH_FIELD)
}

pub fn hash_index_path(hash: &str) -> Result<TreePath, ValidationError> {
    hash_index_root().try_child("hash", hash)
}

pub fn latest_path() -> TreePath {
    TreePath::global(STELLAR_GLOBAL).child(LATEST_FIELD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_layout() -> Result<(), ValidationError> {
        assert_eq!(account_path("GA1")?.to_string(), "Account/GA1");
        assert_eq!(
            account_field("GA1", BALANCE_FIELD)?.to_string(),
            "Account/GA1/balance"
        );
        assert_eq!(
            trustline_path("GA1", "USDC", "GISS")?.to_string(),
            "Account/GA1/trustlines/USDC/GISS"
        );
        assert_eq!(tracked_path("GA1")?.to_string(), "Tracked/GA1");
        Ok(())
    }

    #[test]
    fn test_ledger_layout() -> Result<(), ValidationError> {
        assert_eq!(ledger_path(100).to_string(), "Stellar/ledger/100");
        assert_eq!(
            tx_slot_path(100, &TxSlot::Dense(3))?.to_string(),
            "Stellar/ledger/100/tx/3"
        );
        assert_eq!(
            tx_slot_path(100, &TxSlot::Hydrated("abc".to_string()))?.to_string(),
            "Stellar/ledger/100/tx/hydrated/abc"
        );
        assert_eq!(hash_index_path("abc")?.to_string(), "Stellar/tx_hash/abc");
        assert_eq!(latest_path().to_string(), "Stellar/latest");
        Ok(())
    }

    #[test]
    fn test_rejects_malformed_segments() {
        assert!(account_path("").is_err());
        assert!(account_path("GA/../x").is_err());
        assert!(account_path("GA\0").is_err());
        assert!(hash_index_path(&"f".repeat(MAX_SEGMENT_LEN + 1)).is_err());
        assert!(tx_slot_path(1, &TxSlot::Hydrated(String::new())).is_err());
    }

    #[test]
    fn test_parse_dense_slot() {
        assert_eq!(parse_dense_slot("0"), Some(0));
        assert_eq!(parse_dense_slot("17"), Some(17));
        assert_eq!(parse_dense_slot("hydrated"), None);
        assert_eq!(parse_dense_slot("01"), None);
        assert_eq!(parse_dense_slot("-1"), None);
    }

    #[test]
    fn test_descendant_ordering() -> Result<(), ValidationError> {
        let parent = account_path("GA1")?;
        let child = account_field("GA1", SEQ_NUM_FIELD)?;
        let sibling = account_path("GA2")?;
        assert!(child.is_descendant_of(&parent));
        assert!(!parent.is_descendant_of(&parent));
        assert!(parent < child && child < sibling);
        Ok(())
    }
}
