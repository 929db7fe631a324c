//! Application configuration loaded from environment variables.

use std::time::Duration;

use stream_sync::{RetryPolicy, SyncConfig};

/// Dashboard configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: Postgres connection string; unset runs on an in-memory store
/// - `SYNC_INITIAL_DELAY_MS`, `SYNC_MAX_DELAY_MS`, `SYNC_ATTEMPT_TIMEOUT_MS`: retry schedule
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub sync: SyncConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Unparseable numbers fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(Duration::from_millis(default), Duration::from_millis)
        };

        let standard = RetryPolicy::standard();
        let retry = RetryPolicy::new(
            millis("SYNC_INITIAL_DELAY_MS", standard.initial_delay_ms),
            millis("SYNC_MAX_DELAY_MS", standard.max_delay_ms),
            standard.jitter_factor,
        )
        .with_attempt_timeout(millis(
            "SYNC_ATTEMPT_TIMEOUT_MS",
            standard.attempt_timeout_ms,
        ));

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            sync: SyncConfig::new(retry),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            sync: SyncConfig::default(),
        }
    }
}
