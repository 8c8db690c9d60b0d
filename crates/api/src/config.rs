//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use rpc::{InvokeOptions, RegistryConfig};
use saga::OrchestratorConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; sagas are kept in memory when unset
/// - `SAGA_STEP_TIMEOUT_SECS`: per-step call timeout (default: `30`)
/// - `SAGA_CLEANUP_INTERVAL_SECS`: how often finished sagas are purged (default: `300`)
/// - `SAGA_MAX_AGE_SECS`: age after which finished sagas are purged (default: `3600`)
/// - `BREAKER_ERROR_THRESHOLD`: failure percentage that opens a breaker (default: `50`)
/// - `BREAKER_RESET_TIMEOUT_SECS`: how long a breaker stays open (default: `30`)
/// - `BREAKER_MAX_KEYS`: bound on tracked `(service, action)` breakers (default: `1024`)
///
/// Unparsable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub step_timeout: Duration,
    pub cleanup_interval: Duration,
    pub saga_max_age: Duration,
    pub breaker_error_threshold: f64,
    pub breaker_reset_timeout: Duration,
    pub breaker_max_keys: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            step_timeout: parse("SAGA_STEP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.step_timeout),
            cleanup_interval: parse("SAGA_CLEANUP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            saga_max_age: parse("SAGA_MAX_AGE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.saga_max_age),
            breaker_error_threshold: lookup("BREAKER_ERROR_THRESHOLD")
                .and_then(|t| t.trim().parse::<f64>().ok())
                .filter(|t| (0.0..=100.0).contains(t))
                .unwrap_or(defaults.breaker_error_threshold),
            breaker_reset_timeout: parse("BREAKER_RESET_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.breaker_reset_timeout),
            breaker_max_keys: parse("BREAKER_MAX_KEYS")
                .filter(|n| *n > 0)
                .map(|n| n as usize)
                .unwrap_or(defaults.breaker_max_keys),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .step_timeout(self.step_timeout)
            .breaker(
                InvokeOptions::default()
                    .error_threshold_percentage(self.breaker_error_threshold)
                    .reset_timeout(self.breaker_reset_timeout),
            )
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_breakers: self.breaker_max_keys,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            step_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(300),
            saga_max_age: Duration::from_secs(3600),
            breaker_error_threshold: 50.0,
            breaker_reset_timeout: Duration::from_secs(30),
            breaker_max_keys: 1024,
        }
    }
}
