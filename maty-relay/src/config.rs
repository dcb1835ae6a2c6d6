//! Configuration loading for maty-relay.
//!
//! Configuration is loaded from a TOML file (default: `maty.toml`).

use crate::digest::DigestAlgorithm;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for maty-relay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Delta poller configuration.
    pub poller: PollerConfig,
    /// Credential configuration.
    pub auth: AuthConfig,
    /// Rate limiting configuration.
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the WebSocket/HTTP listener (default: 0.0.0.0:1978).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Outbound frames buffered per connection before pushes start failing
    /// (default: 256).
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Connection pool size (default: 10).
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

/// Delta poller configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Tick interval in milliseconds (default: 100).
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    /// Enable the poller (default: true).
    #[serde(default = "default_poller_enabled")]
    pub enabled: bool,
}

impl PollerConfig {
    /// Tick interval as a Duration. Zero is clamped to one millisecond.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Credential configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// One-way digest applied to passwords (default: argon2).
    #[serde(default)]
    pub digest: DigestAlgorithm,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound frames per connection per minute (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Maximum inbound frames per second across all connections (default: 1000).
    #[serde(default = "default_global_rps")]
    pub global_requests_per_second: u32,
    /// Maximum inbound frame size in bytes (default: 64 KiB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Maximum concurrently open connections (default: 10000).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter directive (default: "info"). `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:1978".to_string()
}

fn default_outbound_queue() -> usize {
    256
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/maty.db")
}

fn default_pool_size() -> u32 {
    10
}

fn default_poll_interval() -> u64 {
    100
}

fn default_poller_enabled() -> bool {
    true
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_global_rps() -> u32 {
    1000
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_max_connections() -> usize {
    10_000
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            max_connections: default_pool_size(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            enabled: default_poller_enabled(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            messages_per_minute: default_messages_per_minute(),
            global_requests_per_second: default_global_rps(),
            max_message_size: default_max_message_size(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
