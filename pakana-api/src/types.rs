//! Request and response bodies.

use pakana_core::{
    stroops_to_decimal, AccountSnapshot, LedgerRecord, LedgerSequence, StoredTransaction, Trustline,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

fn decimal(account_id: &str, stroops: &str) -> ApiResult<String> {
    stroops.parse::<i64>().map(stroops_to_decimal).map_err(|_| {
        tracing::error!(account_id, stroops, "Stored balance is not an integer");
        ApiError::internal_error("Stored balance is corrupt")
    })
}

// ============================================================================
// ACCOUNTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustlineResponse {
    /// `CODE:ISSUER`
    pub asset: String,
    pub asset_code: String,
    pub issuer: String,
    pub balance: String,
    pub limit: String,
}

impl From<Trustline> for TrustlineResponse {
    fn from(line: Trustline) -> Self {
        Self {
            asset: line.asset(),
            asset_code: line.asset_code,
            issuer: line.issuer,
            balance: line.balance,
            limit: line.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResponse {
    pub account_id: String,
    /// Native balance in stroops.
    pub balance: String,
    /// Native balance in XLM, seven decimals.
    pub balance_xlm: String,
    pub seq_num: i64,
    pub last_modified: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trustlines: Vec<TrustlineResponse>,
}

impl AccountResponse {
    pub fn from_snapshot(snapshot: AccountSnapshot) -> ApiResult<Self> {
        Ok(Self {
            balance_xlm: decimal(&snapshot.account_id, &snapshot.balance)?,
            account_id: snapshot.account_id,
            balance: snapshot.balance,
            seq_num: snapshot.sequence_number,
            last_modified: snapshot.last_modified,
            trustlines: snapshot.trustlines.into_iter().map(Into::into).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub account_id: String,
    pub balance: String,
    pub balance_xlm: String,
}

impl BalanceResponse {
    pub fn from_snapshot(snapshot: AccountSnapshot) -> ApiResult<Self> {
        Ok(Self {
            balance_xlm: decimal(&snapshot.account_id, &snapshot.balance)?,
            account_id: snapshot.account_id,
            balance: snapshot.balance,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustlinesResponse {
    pub account_id: String,
    pub trustlines: Vec<TrustlineResponse>,
}

impl From<AccountSnapshot> for TrustlinesResponse {
    fn from(snapshot: AccountSnapshot) -> Self {
        Self {
            account_id: snapshot.account_id,
            trustlines: snapshot.trustlines.into_iter().map(Into::into).collect(),
        }
    }
}

// ============================================================================
// LEDGERS & TRANSACTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerResponse {
    pub sequence: LedgerSequence,
    pub closed_at: String,
    pub total_tx_count: u32,
    pub filtered_tx_count: u32,
    /// Same as `filtered_tx_count`; kept for older clients.
    pub tx_count: u32,
}

impl From<LedgerRecord> for LedgerResponse {
    fn from(ledger: LedgerRecord) -> Self {
        Self {
            sequence: ledger.sequence,
            closed_at: ledger.closed_at,
            total_tx_count: ledger.total_tx_count,
            filtered_tx_count: ledger.filtered_tx_count,
            tx_count: ledger.filtered_tx_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub hash: String,
    pub ledger_seq: LedgerSequence,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub xdr: String,
}

impl From<StoredTransaction> for TransactionResponse {
    fn from(tx: StoredTransaction) -> Self {
        Self {
            hash: tx.hash,
            ledger_seq: tx.ledger,
            xdr: tx.envelope_xdr,
        }
    }
}

// ============================================================================
// INTERNAL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheAccountRequest {
    #[serde(default)]
    pub account_id: String,
}
