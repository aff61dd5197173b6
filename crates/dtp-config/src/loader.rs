//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{debug, info};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "dtp.toml",
    "config.toml",
    "./config/dtp.toml",
    "/etc/dtp/dtp.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match self.resolve_path() {
            Some(path) => {
                info!(?path, "Loading configuration from file");
                AppConfig::from_file(&path)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                AppConfig::default()
            }
        };

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// The file that `load` reads, if any. The config watcher re-reads the same file.
    pub fn resolve_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("DTP_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("DTP_ENABLED") {
            config.dtp.enabled = val.parse().unwrap_or(true);
        }

        if let Ok(val) = env::var("DTP_DISPATCHER_BACKLOG") {
            if let Ok(capacity) = val.parse() {
                config.dispatcher.backlog_capacity = capacity;
            }
        }

        if let Ok(val) = env::var("DTP_ALARM_ENABLED") {
            config.alarm.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("DTP_ALARM_INTERVAL") {
            if let Ok(interval) = val.parse() {
                config.alarm.check_interval_seconds = interval;
            }
        }

        if let Ok(val) = env::var("DTP_WATCH_ENABLED") {
            config.watch.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("DTP_WATCH_INTERVAL") {
            if let Ok(interval) = val.parse() {
                config.watch.poll_interval_seconds = interval;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
