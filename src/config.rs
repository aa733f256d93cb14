//! Configuration module for feedloom.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::scheduler::{PollingScheduler, SchedulerConfig};
use crate::{FeedloomError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Maximum number of pooled connections.
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "data/feedloom.db".to_string()
}

fn default_db_max_connections() -> u32 {
    8
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
    /// Optional log file. Empty means console only.
    #[serde(default)]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

/// Locale configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocaleConfig {
    /// Language used when a user's language has no catalog.
    #[serde(default = "default_language")]
    pub default_language: String,
    /// Optional directory with extra `*.toml` catalogs.
    #[serde(default)]
    pub catalog_dir: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            catalog_dir: String::new(),
        }
    }
}

/// Polling and scheduling configuration. Intervals are in minutes.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Seconds between two batch builds.
    #[serde(default = "default_polling_frequency")]
    pub frequency_secs: u64,
    /// Maximum feeds per batch. 0 means no limit.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Feeds with this many consecutive errors are no longer polled.
    #[serde(default = "default_parsing_error_limit")]
    pub parsing_error_limit: i32,
    #[serde(default)]
    pub scheduler: PollingScheduler,
    #[serde(default = "default_round_robin_min_interval")]
    pub round_robin_min_interval: i64,
    #[serde(default = "default_max_interval")]
    pub round_robin_max_interval: i64,
    #[serde(default = "default_entry_frequency_min_interval")]
    pub entry_frequency_min_interval: i64,
    #[serde(default = "default_max_interval")]
    pub entry_frequency_max_interval: i64,
    #[serde(default = "default_entry_frequency_factor")]
    pub entry_frequency_factor: i64,
    /// Backoff applied after HTTP 429 without Retry-After.
    #[serde(default = "default_rate_limited_backoff")]
    pub rate_limited_backoff_minutes: i64,
}

fn default_polling_frequency() -> u64 {
    3600
}

fn default_batch_size() -> i64 {
    100
}

fn default_parsing_error_limit() -> i32 {
    3
}

fn default_round_robin_min_interval() -> i64 {
    60
}

fn default_max_interval() -> i64 {
    1440
}

fn default_entry_frequency_min_interval() -> i64 {
    5
}

fn default_entry_frequency_factor() -> i64 {
    1
}

fn default_rate_limited_backoff() -> i64 {
    720
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            frequency_secs: default_polling_frequency(),
            batch_size: default_batch_size(),
            parsing_error_limit: default_parsing_error_limit(),
            scheduler: PollingScheduler::default(),
            round_robin_min_interval: default_round_robin_min_interval(),
            round_robin_max_interval: default_max_interval(),
            entry_frequency_min_interval: default_entry_frequency_min_interval(),
            entry_frequency_max_interval: default_max_interval(),
            entry_frequency_factor: default_entry_frequency_factor(),
            rate_limited_backoff_minutes: default_rate_limited_backoff(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Jobs buffered before `push` waits for a free worker.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Seconds to wait for in-flight jobs on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_pool_size() -> usize {
    16
}

fn default_queue_capacity() -> usize {
    1
}

fn default_shutdown_grace() -> u64 {
    5
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            queue_capacity: default_queue_capacity(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Outbound HTTP configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpClientConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_body_size")]
    pub max_body_size_mb: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Proxy used by feeds that opt in. Empty disables proxying.
    #[serde(default)]
    pub proxy: String,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Refuse feed URLs on loopback, private and link-local addresses.
    #[serde(default)]
    pub block_private_networks: bool,
}

fn default_http_timeout() -> u64 {
    20
}

fn default_max_body_size() -> u64 {
    15
}

fn default_user_agent() -> String {
    format!("feedloom/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_redirects() -> usize {
    10
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            max_body_size_mb: default_max_body_size(),
            user_agent: default_user_agent(),
            proxy: String::new(),
            max_redirects: default_max_redirects(),
            block_private_networks: false,
        }
    }
}

impl HttpClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_body_size_bytes(&self) -> u64 {
        self.max_body_size_mb * 1024 * 1024
    }
}

/// Periodic archiving of old entries.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_frequency")]
    pub frequency_hours: u64,
    /// Read entries older than this are archived. 0 disables.
    #[serde(default = "default_archive_read_days")]
    pub archive_read_days: i64,
    /// Unread entries older than this are archived. 0 disables.
    #[serde(default = "default_archive_unread_days")]
    pub archive_unread_days: i64,
    #[serde(default = "default_archive_batch_size")]
    pub archive_batch_size: i64,
}

fn default_cleanup_frequency() -> u64 {
    24
}

fn default_archive_read_days() -> i64 {
    60
}

fn default_archive_unread_days() -> i64 {
    180
}

fn default_archive_batch_size() -> i64 {
    10000
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            frequency_hours: default_cleanup_frequency(),
            archive_read_days: default_archive_read_days(),
            archive_unread_days: default_archive_unread_days(),
            archive_batch_size: default_archive_batch_size(),
        }
    }
}

/// Outbound integrations notified about new entries.
#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationConfig {
    /// Webhook receiving new entries as JSON. Empty disables it.
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_integration_queue")]
    pub queue_capacity: usize,
}

fn default_integration_queue() -> usize {
    256
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            queue_capacity: default_integration_queue(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub locale: LocaleConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub http_client: HttpClientConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub integration: IntegrationConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedloomError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedloomError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides.
    ///
    /// Supported variables:
    /// - `FEEDLOOM_DATABASE_PATH`
    /// - `FEEDLOOM_HTTP_PROXY`
    /// - `FEEDLOOM_WORKER_POOL_SIZE`
    /// - `FEEDLOOM_POLLING_SCHEDULER` (`round_robin` or `entry_frequency`)
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("FEEDLOOM_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(proxy) = non_empty_env("FEEDLOOM_HTTP_PROXY") {
            self.http_client.proxy = proxy;
        }
        if let Some(size) = non_empty_env("FEEDLOOM_WORKER_POOL_SIZE") {
            self.worker.pool_size = size.parse().map_err(|_| {
                FeedloomError::Config(format!("invalid FEEDLOOM_WORKER_POOL_SIZE: {size}"))
            })?;
        }
        if let Some(name) = non_empty_env("FEEDLOOM_POLLING_SCHEDULER") {
            self.polling.scheduler = name.parse()?;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.worker.pool_size == 0 {
            return Err(FeedloomError::Config(
                "worker.pool_size must be at least 1".to_string(),
            ));
        }
        if self.worker.queue_capacity == 0 || self.integration.queue_capacity == 0 {
            return Err(FeedloomError::Config(
                "queue capacities must be at least 1".to_string(),
            ));
        }
        if self.polling.batch_size < 0 {
            return Err(FeedloomError::Config(
                "polling.batch_size must not be negative".to_string(),
            ));
        }
        let p = &self.polling;
        if p.round_robin_min_interval < 1 || p.round_robin_min_interval > p.round_robin_max_interval
        {
            return Err(FeedloomError::Config(
                "round robin interval bounds are inverted or empty".to_string(),
            ));
        }
        if p.entry_frequency_min_interval < 1
            || p.entry_frequency_min_interval > p.entry_frequency_max_interval
        {
            return Err(FeedloomError::Config(
                "entry frequency interval bounds are inverted or empty".to_string(),
            ));
        }
        if p.entry_frequency_factor < 1 {
            return Err(FeedloomError::Config(
                "polling.entry_frequency_factor must be at least 1".to_string(),
            ));
        }
        if !self.http_client.proxy.is_empty() {
            url::Url::parse(&self.http_client.proxy).map_err(|e| {
                FeedloomError::Config(format!("invalid http_client.proxy: {e}"))
            })?;
        }
        if !self.integration.webhook_url.is_empty() {
            url::Url::parse(&self.integration.webhook_url).map_err(|e| {
                FeedloomError::Config(format!("invalid integration.webhook_url: {e}"))
            })?;
        }
        Ok(())
    }

    /// Scheduler settings as an explicit value.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let p = &self.polling;
        SchedulerConfig {
            strategy: p.scheduler,
            round_robin_min_interval: p.round_robin_min_interval,
            round_robin_max_interval: p.round_robin_max_interval,
            entry_frequency_min_interval: p.entry_frequency_min_interval,
            entry_frequency_max_interval: p.entry_frequency_max_interval,
            entry_frequency_factor: p.entry_frequency_factor,
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
