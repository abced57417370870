//! Configuration module for feedrelay.

use serde::Deserialize;
use std::path::Path;

use crate::{RelayError, Result};

/// Environment variable overriding `database.path`.
pub const ENV_DATABASE_PATH: &str = "FEEDRELAY_DATABASE_PATH";

/// Environment variable overriding `delivery.webhook_url`.
pub const ENV_WEBHOOK_URL: &str = "FEEDRELAY_WEBHOOK_URL";

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Size of the connection pool.
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "data/feedrelay.db".to_string()
}

fn default_db_max_connections() -> u32 {
    2
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_db_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedrelay.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Poll scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Seconds between the start of two poll cycles.
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Subscriptions processed concurrently within one cycle.
    #[serde(default = "default_max_concurrent_feeds")]
    pub max_concurrent_feeds: usize,
    /// Re-baseline every subscription once before the first cycle.
    #[serde(default)]
    pub baseline_on_startup: bool,
}

fn default_poll_interval() -> u64 {
    300 // 5 minutes
}

fn default_max_concurrent_feeds() -> usize {
    4
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            max_concurrent_feeds: default_max_concurrent_feeds(),
            baseline_on_startup: false,
        }
    }
}

/// Feed fetcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Maximum snippet length in characters.
    #[serde(default = "default_max_snippet_length")]
    pub max_snippet_length: usize,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Allow feeds on loopback/private addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,
    /// User agent sent with feed requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_snippet_length() -> usize {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_total_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_user_agent() -> String {
    "feedrelay/0.1 (feed poller)".to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_feed_size_bytes: default_max_feed_size(),
            max_snippet_length: default_max_snippet_length(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
            max_redirects: default_max_redirects(),
            allow_private_hosts: false,
            user_agent: default_user_agent(),
        }
    }
}

/// Which delivery sink the binary wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    /// Write each item to the log.
    #[default]
    Log,
    /// POST each item as JSON to `webhook_url`.
    Webhook,
}

/// Delivery sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Sink kind.
    #[serde(default)]
    pub kind: DeliveryKind,
    /// Endpoint for the webhook sink.
    #[serde(default)]
    pub webhook_url: String,
    /// Request timeout in seconds for the webhook sink.
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,
}

fn default_delivery_timeout() -> u64 {
    15
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            kind: DeliveryKind::default(),
            webhook_url: String::new(),
            timeout_secs: default_delivery_timeout(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Poll scheduler configuration.
    #[serde(default)]
    pub poll: PollConfig,
    /// Feed fetcher configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Delivery sink configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(RelayError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDRELAY_DATABASE_PATH`: Override the database path
    /// - `FEEDRELAY_WEBHOOK_URL`: Override the webhook endpoint
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_DATABASE_PATH) {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
        if let Ok(url) = std::env::var(ENV_WEBHOOK_URL) {
            if !url.is_empty() {
                self.delivery.webhook_url = url;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_secs == 0 {
            return Err(RelayError::Config(
                "poll.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.poll.max_concurrent_feeds == 0 {
            return Err(RelayError::Config(
                "poll.max_concurrent_feeds must be greater than zero".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(RelayError::Config(
                "database.max_connections must be greater than zero".to_string(),
            ));
        }
        if self.delivery.kind == DeliveryKind::Webhook && self.delivery.webhook_url.is_empty() {
            return Err(RelayError::Config(
                "delivery.kind is \"webhook\" but webhook_url is not set. \
                 Set it in config.toml or via FEEDRELAY_WEBHOOK_URL environment variable."
                    .to_string(),
            ));
        }
        Ok(())
    }
}
