//! Hydration engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct EngineStats {
    hits: AtomicU64,
    misses: AtomicU64,
    upstream_fetches: AtomicU64,
    upstream_errors: AtomicU64,
    not_found: AtomicU64,
    commits: AtomicU64,
    already_present: AtomicU64,
    commit_aborts: AtomicU64,
    consistency_violations: AtomicU64,
    backfills_started: AtomicU64,
    ledgers_ingested: AtomicU64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        record_hit => hits,
        record_miss => misses,
        record_upstream_fetch => upstream_fetches,
        record_upstream_error => upstream_errors,
        record_not_found => not_found,
        record_commit => commits,
        record_already_present => already_present,
        record_commit_abort => commit_aborts,
        record_consistency_violation => consistency_violations,
        record_backfill_started => backfills_started,
        record_ledger_ingested => ledgers_ingested,
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            already_present: self.already_present.load(Ordering::Relaxed),
            commit_aborts: self.commit_aborts.load(Ordering::Relaxed),
            consistency_violations: self.consistency_violations.load(Ordering::Relaxed),
            backfills_started: self.backfills_started.load(Ordering::Relaxed),
            ledgers_ingested: self.ledgers_ingested.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub upstream_fetches: u64,
    pub upstream_errors: u64,
    pub not_found: u64,
    pub commits: u64,
    pub already_present: u64,
    pub commit_aborts: u64,
    pub consistency_violations: u64,
    pub backfills_started: u64,
    pub ledgers_ingested: u64,
}

impl StatsSnapshot {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
