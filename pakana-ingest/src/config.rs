//! Ingestion Configuration
//!
//! Tuning for the hydration engine, backfill walks and the live stream.
//! Loaded from environment variables with defaults matching the public
//! Horizon limits.

use std::time::Duration;

/// Largest page Horizon serves.
pub const MAX_PAGE_SIZE: u32 = 200;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn page_size(raw: Option<u32>) -> u32 {
    raw.unwrap_or(MAX_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

// ============================================================================
// BACKFILL
// ============================================================================

/// Safety ceilings for one backfill walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillConfig {
    pub page_size: u32,
    /// Stop after this many transactions have been written.
    pub max_transactions: usize,
    /// Stop after this many pages have been fetched.
    pub max_pages: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            max_transactions: 1000,
            max_pages: 50,
        }
    }
}

impl BackfillConfig {
    /// Environment variables:
    /// - `PAKANA_BACKFILL_PAGE_SIZE` (default: 200, max 200)
    /// - `PAKANA_BACKFILL_MAX_TX` (default: 1000)
    /// - `PAKANA_BACKFILL_MAX_PAGES` (default: 50)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            page_size: page_size(env_parse("PAKANA_BACKFILL_PAGE_SIZE")),
            max_transactions: env_parse("PAKANA_BACKFILL_MAX_TX").unwrap_or(defaults.max_transactions),
            max_pages: env_parse("PAKANA_BACKFILL_MAX_PAGES").unwrap_or(defaults.max_pages),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn with_max_transactions(mut self, max: usize) -> Self {
        self.max_transactions = max;
        self
    }

    pub fn with_max_pages(mut self, max: usize) -> Self {
        self.max_pages = max;
        self
    }
}

// ============================================================================
// STREAM
// ============================================================================

/// Live ingestion settings, including reconnect backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Page size for fetching each ledger's transactions.
    pub page_size: u32,
    /// Cursor for the first connection.
    pub start_cursor: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Jitter factor in [0.0, 1.0] applied to each delay.
    pub jitter: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            start_cursor: crate::source::CURSOR_NOW.to_string(),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl StreamConfig {
    /// Environment variables:
    /// - `PAKANA_STREAM_CURSOR`: first cursor (default: "now")
    /// - `PAKANA_STREAM_MAX_BACKOFF_SECS`: reconnect delay ceiling (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            start_cursor: std::env::var("PAKANA_STREAM_CURSOR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.start_cursor.clone()),
            max_backoff: env_parse("PAKANA_STREAM_MAX_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_backoff),
            ..defaults
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_start_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.start_cursor = cursor.into();
        self
    }
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Page size for fetching a ledger's transactions during hydration.
    pub ledger_page_size: u32,
    /// Whether account hydration schedules a history backfill.
    pub backfill_enabled: bool,
    pub backfill: BackfillConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger_page_size: MAX_PAGE_SIZE,
            backfill_enabled: true,
            backfill: BackfillConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Environment variables:
    /// - `PAKANA_BACKFILL_ENABLED`: "true" or "false" (default: true)
    /// - everything [`BackfillConfig::from_env`] reads
    pub fn from_env() -> Self {
        Self {
            ledger_page_size: MAX_PAGE_SIZE,
            backfill_enabled: std::env::var("PAKANA_BACKFILL_ENABLED")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(true),
            backfill: BackfillConfig::from_env(),
        }
    }

    pub fn with_backfill(mut self, backfill: BackfillConfig) -> Self {
        self.backfill = backfill;
        self
    }

    pub fn without_backfill(mut self) -> Self {
        self.backfill_enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_horizon_limits() {
        let backfill = BackfillConfig::default();
        assert_eq!(backfill.page_size, 200);
        assert_eq!(backfill.max_transactions, 1000);

        let stream = StreamConfig::default();
        assert_eq!(stream.start_cursor, "now");
        assert!(stream.initial_backoff < stream.max_backoff);
    }

    #[test]
    fn test_page_size_is_clamped() {
        assert_eq!(BackfillConfig::default().with_page_size(0).page_size, 1);
        assert_eq!(BackfillConfig::default().with_page_size(5000).page_size, 200);
        assert_eq!(page_size(Some(10)), 10);
        assert_eq!(page_size(None), 200);
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_backfill(BackfillConfig::default().with_max_pages(3))
            .without_backfill();
        assert_eq!(config.backfill.max_pages, 3);
        assert!(!config.backfill_enabled);
        assert_eq!(StreamConfig::default().with_jitter(4.0).jitter, 1.0);
    }
}
