//! ConfigSource backed by the TOML configuration file

use std::path::PathBuf;

use async_trait::async_trait;

use dtp_common::DtpProperties;
use dtp_config::AppConfig;
use dtp_core::{ConfigSource, DtpError};

pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> dtp_core::Result<DtpProperties> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| DtpError::Config(format!("{}: {}", self.path.display(), e)))?;
        let config = AppConfig::from_toml(&content)
            .map_err(|e| DtpError::Config(format!("{}: {}", self.path.display(), e)))?;
        Ok(config.dtp)
    }
}
