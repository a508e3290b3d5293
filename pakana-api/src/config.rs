//! API Configuration Module
//!
//! Process-level settings for the HTTP server, the upstream client and the
//! store. Configuration is loaded from environment variables with defaults
//! suitable for local development against testnet.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use pakana_core::ConfigError;
use pakana_ingest::DEFAULT_HORIZON_URL;

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PakanaConfig {
    // ========================================================================
    // Listeners
    // ========================================================================
    /// Bind host for both listeners.
    pub bind_host: String,

    /// Public API port.
    pub port: u16,

    /// Port for internal endpoints (cache-account).
    pub internal_port: u16,

    /// When set, `/api/v1` requires a matching `X-API-Key` header.
    pub api_key: Option<String>,

    /// Allowed CORS origins. Empty means allow all origins.
    pub cors_origins: Vec<String>,

    // ========================================================================
    // Upstream
    // ========================================================================
    pub horizon_url: String,

    pub upstream_timeout: Duration,

    /// Whether to follow the live ledger stream.
    pub ingest_enabled: bool,

    // ========================================================================
    // Store
    // ========================================================================
    /// LMDB directory. The store is in-memory when unset.
    pub store_path: Option<PathBuf>,

    pub lmdb_map_size_mb: usize,
}

impl Default for PakanaConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            internal_port: 8081,
            api_key: None,
            cors_origins: Vec::new(),
            horizon_url: DEFAULT_HORIZON_URL.to_string(),
            upstream_timeout: Duration::from_secs(30),
            ingest_enabled: true,
            store_path: None,
            lmdb_map_size_mb: 1024,
        }
    }
}

impl PakanaConfig {
    /// Create PakanaConfig from environment variables.
    ///
    /// Environment variables:
    /// - `PAKANA_API_BIND`: Bind host (default: 0.0.0.0)
    /// - `PORT` or `PAKANA_API_PORT`: Public port (default: 8080)
    /// - `PAKANA_INTERNAL_PORT`: Internal port (default: 8081)
    /// - `PAKANA_API_KEY`: Required API key for `/api/v1` (default: none)
    /// - `PAKANA_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `HORIZON_URL`: Upstream base URL (default: testnet)
    /// - `PAKANA_UPSTREAM_TIMEOUT_SECS`: Upstream request timeout (default: 30)
    /// - `PAKANA_INGEST_ENABLED`: "true" or "false" (default: true)
    /// - `PAKANA_STORE_PATH`: LMDB directory (default: in-memory)
    /// - `PAKANA_LMDB_MAP_SIZE_MB`: LMDB map size (default: 1024)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match std::env::var("PORT").or_else(|_| std::env::var("PAKANA_API_PORT")) {
            Ok(raw) => parse_value("PORT", &raw)?,
            Err(_) => defaults.port,
        };

        let cors_origins = std::env::var("PAKANA_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_host: std::env::var("PAKANA_API_BIND").unwrap_or(defaults.bind_host),
            port,
            internal_port: env_or("PAKANA_INTERNAL_PORT", defaults.internal_port)?,
            api_key: std::env::var("PAKANA_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            cors_origins,
            horizon_url: std::env::var("HORIZON_URL").unwrap_or(defaults.horizon_url),
            upstream_timeout: Duration::from_secs(env_or(
                "PAKANA_UPSTREAM_TIMEOUT_SECS",
                defaults.upstream_timeout.as_secs(),
            )?),
            ingest_enabled: std::env::var("PAKANA_INGEST_ENABLED")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.ingest_enabled),
            store_path: std::env::var("PAKANA_STORE_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            lmdb_map_size_mb: env_or("PAKANA_LMDB_MAP_SIZE_MB", defaults.lmdb_map_size_mb)?,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr(&self.bind_host, self.port)
    }

    pub fn internal_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr(&self.bind_host, self.internal_port)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        value: raw.to_string(),
        reason: "could not be parsed".to_string(),
    })
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let addr = format!("{}:{}", host, port);
    addr.parse().map_err(|_| ConfigError::InvalidValue {
        field: "PAKANA_API_BIND".to_string(),
        value: addr,
        reason: "not a socket address".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() -> Result<(), ConfigError> {
        let config = PakanaConfig::default();
        assert_eq!(config.bind_addr()?.port(), 8080);
        assert_eq!(config.internal_addr()?.port(), 8081);
        assert!(config.api_key.is_none());
        assert!(config.store_path.is_none());
        Ok(())
    }

    #[test]
    fn test_parse_value_reports_field() {
        let err = parse_value::<u16>("PORT", "eighty").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "PORT"));
        assert_eq!(parse_value::<u16>("PORT", " 9000 ").ok(), Some(9000));
    }

    #[test]
    fn test_bad_host_is_rejected() {
        let config = PakanaConfig {
            bind_host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(config.bind_addr().is_err());
    }
}
