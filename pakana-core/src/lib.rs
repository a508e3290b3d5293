//! Pakana Core - Ledger Record Types
//!
//! Pure data structures shared by every other crate: the records the cache
//! stores, the hierarchical key layout they are stored under, amount
//! normalization and the address blocklist. No I/O lives here.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod amount;
pub mod blocklist;
pub mod codec;
pub mod error;

pub use amount::{decimal_to_stroops, stroops_to_decimal, STROOP_DECIMALS};
pub use blocklist::Blocklist;
pub use codec::{TreePath, LATEST_FIELD, TX_HYDRATED_SEGMENT};
pub use error::{
    ConfigError, HydrateError, PakanaError, PakanaResult, StorageError, StorageResult,
    UpstreamError, ValidationError,
};

/// Ledger sequence numbers are strictly increasing and fit in 32 bits.
pub type LedgerSequence = u32;

// ============================================================================
// RECORD KINDS
// ============================================================================

/// The three kinds of record a caller can resolve by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Account,
    Ledger,
    Transaction,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Account => "account",
            RecordKind::Ledger => "ledger",
            RecordKind::Transaction => "transaction",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ACCOUNTS
// ============================================================================

/// A non-native balance line held by an account.
///
/// `balance` and `limit` are integer stroop strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trustline {
    pub asset_code: String,
    pub issuer: String,
    pub balance: String,
    pub limit: String,
}

impl Trustline {
    /// Display form `CODE:ISSUER`.
    pub fn asset(&self) -> String {
        format!("{}:{}", self.asset_code, self.issuer)
    }
}

/// Point-in-time copy of an account as reported by upstream.
///
/// Overwritten wholesale on every hydration, never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    /// Native balance in stroops.
    pub balance: String,
    pub sequence_number: i64,
    /// Unix seconds of the last upstream modification.
    pub last_modified: i64,
    pub trustlines: Vec<Trustline>,
}

// ============================================================================
// LEDGERS
// ============================================================================

/// Header fields of a closed ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    pub sequence: LedgerSequence,
    pub closed_at: String,
    pub total_tx_count: u32,
}

/// A ledger as read back from the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub sequence: LedgerSequence,
    pub closed_at: String,
    pub total_tx_count: u32,
    pub filtered_tx_count: u32,
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// A transaction as fetched from upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub ledger: LedgerSequence,
    /// Base64 XDR envelope, stored opaque.
    pub envelope_xdr: String,
    pub source_account: String,
    /// Opaque upstream cursor for this record.
    pub paging_token: String,
}

/// Where a transaction lives beneath its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxSlot {
    /// Dense, zero-based position allocated from the ledger's slot counter.
    Dense(u32),
    /// Reserved slot written by single-transaction hydration.
    Hydrated(String),
}

/// A transaction as read back from the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub hash: String,
    pub ledger: LedgerSequence,
    pub envelope_xdr: String,
    pub slot: TxSlot,
}
