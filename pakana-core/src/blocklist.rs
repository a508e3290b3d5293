//! Address blocklist applied before any transaction is persisted.

use std::collections::HashSet;

use crate::TransactionRecord;

/// Environment variable holding comma-separated blocked account ids.
pub const BLOCK_LIST_ENV: &str = "BLOCK_LIST";

/// Set of source accounts whose transactions are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blocklist {
    blocked: HashSet<String>,
}

impl Blocklist {
    /// Parse a comma-separated list. Blank entries are ignored.
    pub fn parse(raw: &str) -> Self {
        let blocked = raw
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        Self { blocked }
    }

    /// Load from `BLOCK_LIST`; unset means nothing is blocked.
    pub fn from_env() -> Self {
        std::env::var(BLOCK_LIST_ENV)
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }

    pub fn is_blocked(&self, account_id: &str) -> bool {
        self.blocked.contains(account_id)
    }

    pub fn permits(&self, tx: &TransactionRecord) -> bool {
        !self.is_blocked(&tx.source_account)
    }

    /// Drop transactions sent by blocked accounts, keeping order.
    pub fn filter(&self, txs: Vec<TransactionRecord>) -> Vec<TransactionRecord> {
        if self.blocked.is_empty() {
            return txs;
        }
        txs.into_iter().filter(|tx| self.permits(tx)).collect()
    }

    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(hash: &str, source: &str) -> TransactionRecord {
        TransactionRecord {
            hash: hash.to_string(),
            ledger: 1,
            envelope_xdr: "AAAA".to_string(),
            source_account: source.to_string(),
            paging_token: hash.to_string(),
        }
    }

    #[test]
    fn test_parse_ignores_blanks() {
        let list = Blocklist::parse(" GBAD , ,GWORSE,");
        assert_eq!(list.len(), 2);
        assert!(list.is_blocked("GBAD"));
        assert!(list.is_blocked("GWORSE"));
        assert!(!list.is_blocked(""));
    }

    #[test]
    fn test_filter_keeps_order() {
        let list = Blocklist::parse("GBAD");
        let kept = list.filter(vec![tx("a", "G1"), tx("b", "GBAD"), tx("c", "G2")]);
        let hashes: Vec<_> = kept.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, vec!["a", "c"]);
    }

    #[test]
    fn test_empty_list_permits_everything() {
        let list = Blocklist::default();
        assert!(list.is_empty());
        assert!(list.permits(&tx("a", "GANY")));
    }
}
