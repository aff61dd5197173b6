//! Config Watch Service
//!
//! Periodically fetches executor configuration from a `ConfigSource` and runs
//! a refresh when it changed. Change detection hashes the serialized
//! properties, so a source may return the same batch on every poll.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use dtp_common::DtpProperties;

use crate::refresher::{RefreshSummary, Refresher};
use crate::Result;

/// Produces configuration batches (file, config center, ...)
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Short description for logs
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<DtpProperties>;
}

pub struct ConfigWatchService {
    source: Arc<dyn ConfigSource>,
    refresher: Arc<Refresher>,
    poll_interval: Duration,
    last_hash: parking_lot::Mutex<Option<u64>>,
}

impl ConfigWatchService {
    pub fn new(source: Arc<dyn ConfigSource>, refresher: Arc<Refresher>, poll_interval: Duration) -> Self {
        Self {
            source,
            refresher,
            poll_interval,
            last_hash: parking_lot::Mutex::new(None),
        }
    }

    /// Seed the change detector with the batch applied at startup, so the
    /// first poll does not refresh it a second time.
    pub fn mark_applied(&self, properties: &DtpProperties) -> Result<()> {
        *self.last_hash.lock() = Some(Self::compute_hash(properties)?);
        Ok(())
    }

    fn compute_hash(properties: &DtpProperties) -> Result<u64> {
        let serialized = serde_json::to_string(properties)?;
        let mut hasher = DefaultHasher::new();
        serialized.hash(&mut hasher);
        Ok(hasher.finish())
    }

    /// Fetch once and refresh if changed. `Ok(None)` means unchanged.
    pub async fn sync(&self) -> Result<Option<RefreshSummary>> {
        let properties = self.source.fetch().await?;
        let new_hash = Self::compute_hash(&properties)?;

        let changed = {
            let last_hash = self.last_hash.lock();
            Some(new_hash) != *last_hash
        };
        if !changed {
            debug!(source = %self.source.describe(), "Configuration unchanged, skipping refresh");
            return Ok(None);
        }

        info!(
            source = %self.source.describe(),
            executors = properties.executors.len(),
            "Configuration changed, refreshing executors"
        );

        if !properties.enabled {
            info!("DynamicTp disabled in configuration, refresh skipped");
            *self.last_hash.lock() = Some(new_hash);
            return Ok(Some(RefreshSummary::default()));
        }

        let summary = self.refresher.refresh(&properties);
        *self.last_hash.lock() = Some(new_hash);
        Ok(Some(summary))
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Spawn the config watch background task
pub fn spawn_config_watch_task(
    watch: Arc<ConfigWatchService>,
    shutdown_tx: broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let mut shutdown_rx = shutdown_tx.subscribe();
    let interval = watch.poll_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; startup already applied the config
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = watch.sync().await {
                        error!(
                            source = %watch.source.describe(),
                            error = %e,
                            "Config fetch failed - continuing with existing config"
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Config watch shutting down");
                    break;
                }
            }
        }
    })
}
