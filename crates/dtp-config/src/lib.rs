//! DynamicTp Configuration System
//!
//! TOML-based configuration with environment variable overrides. The `[dtp]`
//! section carries the executor records that are pushed into running pools;
//! the remaining sections tune the control plane itself.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use dtp_common::{DtpProperties, DEFAULT_BACKLOG_CAPACITY};

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dtp: DtpProperties,
    pub dispatcher: DispatcherSettings,
    pub alarm: AlarmSettings,
    pub watch: WatchSettings,
}

/// Notification dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Pending notifications held before new ones are dropped
    pub backlog_capacity: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
        }
    }
}

/// Periodic liveness/capacity/reject alarm checks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmSettings {
    pub enabled: bool,
    pub check_interval_seconds: u64,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 5,
        }
    }
}

/// Configuration file watching for live refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 10,
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Structural checks only. Per-executor size checks happen at refresh time
    /// so that one bad record never blocks the rest of the batch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.backlog_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "dispatcher.backlog_capacity must be greater than 0".to_string(),
            ));
        }
        if self.alarm.enabled && self.alarm.check_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "alarm.check_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.watch.enabled && self.watch.poll_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "watch.poll_interval_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# DynamicTp Configuration
# Environment variables (DTP_*) override these settings

[dispatcher]
backlog_capacity = 1024

[alarm]
enabled = true
check_interval_seconds = 5

[watch]
enabled = true
poll_interval_seconds = 10

[dtp]
enabled = true

[[dtp.platforms]]
platform = "webhook"
webhook_url = "https://alerts.example.com/hooks/dtp"
receivers = ["ops"]

[[dtp.platforms]]
platform = "log"

[[dtp.executors]]
thread_pool_name = "order-executor"
core_pool_size = 4
maximum_pool_size = 8
queue_capacity = 2048
queue_type = "VariableLinkedBlockingQueue"
keep_alive_time = 60
unit = "SECONDS"
allow_core_thread_timeout = false
rejected_handler_type = "CallerRunsPolicy"
wait_for_tasks_to_complete_on_shutdown = true
await_termination_seconds = 5

[[dtp.executors.notify_items]]
type = "change"
enabled = true

[[dtp.executors.notify_items]]
type = "capacity"
threshold = 80
interval = 60
"#
        .to_string()
    }
}
