//! Notification channels - deliver change and alarm notices to alert platforms
//!
//! Provides:
//! - `NotificationChannel` trait, one implementation per platform
//! - Generic JSON webhook channel
//! - Log channel that writes notices through tracing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use dtp_common::{NotifyKind, NotifyPlatform};

use crate::error::DtpError;
use crate::snapshot::{ExecutorSnapshot, PropertyDiff};
use crate::Result;

/// Tunables of one executor were changed by a configuration push
#[derive(Debug, Clone, Serialize)]
pub struct ChangeNotice {
    pub executor: String,
    pub diff: PropertyDiff,
    /// State before the change
    pub previous: ExecutorSnapshot,
    /// Platform names to deliver to
    pub platforms: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// A runtime threshold (liveness, capacity, reject) was crossed
#[derive(Debug, Clone, Serialize)]
pub struct AlarmNotice {
    pub executor: String,
    pub kind: NotifyKind,
    pub threshold: u32,
    /// Observed value; a percentage for liveness/capacity, a count for reject
    pub value: u64,
    pub pool_size: usize,
    pub largest_pool_size: usize,
    pub active_count: usize,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub reject_count: u64,
    pub platforms: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    Change(ChangeNotice),
    Alarm(AlarmNotice),
}

impl Notice {
    pub fn executor(&self) -> &str {
        match self {
            Notice::Change(n) => &n.executor,
            Notice::Alarm(n) => &n.executor,
        }
    }

    pub fn kind(&self) -> NotifyKind {
        match self {
            Notice::Change(_) => NotifyKind::Change,
            Notice::Alarm(n) => n.kind,
        }
    }

    pub fn platforms(&self) -> &[String] {
        match self {
            Notice::Change(n) => &n.platforms,
            Notice::Alarm(n) => &n.platforms,
        }
    }
}

/// A delivery target for notices
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Platform name this channel serves; matched against notify item platforms
    fn platform(&self) -> &str;

    async fn send_change(&self, notice: &ChangeNotice) -> Result<()>;

    async fn send_alarm(&self, notice: &AlarmNotice) -> Result<()>;
}

/// Build the channel for a configured platform. Platforms other than
/// `webhook` and `log` have no channel and are skipped with a warning.
pub fn channel_for(platform: &NotifyPlatform) -> Option<Box<dyn NotificationChannel>> {
    match platform.platform.to_ascii_lowercase().as_str() {
        "webhook" => match &platform.webhook_url {
            Some(url) if !url.is_empty() => Some(Box::new(WebhookChannel::new(
                platform.platform.clone(),
                url.clone(),
                platform.receivers.clone(),
            ))),
            _ => {
                warn!(platform = %platform.platform, "Webhook platform has no webhook_url, skipping");
                None
            }
        },
        "log" => Some(Box::new(LogChannel::new(platform.platform.clone()))),
        other => {
            warn!(platform = %other, "No notification channel for platform, skipping");
            None
        }
    }
}

/// Generic JSON webhook
pub struct WebhookChannel {
    client: reqwest::Client,
    platform: String,
    webhook_url: String,
    receivers: Vec<String>,
}

impl WebhookChannel {
    pub fn new(platform: String, webhook_url: String, receivers: Vec<String>) -> Self {
        info!(platform = %platform, receivers = receivers.len(), "WebhookChannel initialized");
        Self {
            client: reqwest::Client::new(),
            platform,
            webhook_url,
            receivers,
        }
    }

    fn build_change_payload(&self, notice: &ChangeNotice) -> serde_json::Value {
        json!({
            "type": NotifyKind::Change.as_str(),
            "title": format!("DynamicTp executor [{}] changed", notice.executor),
            "executor": notice.executor,
            "changes": notice.diff.changes,
            "previous": notice.previous,
            "receivers": self.receivers,
            "timestamp": notice.timestamp.to_rfc3339(),
        })
    }

    fn build_alarm_payload(&self, notice: &AlarmNotice) -> serde_json::Value {
        json!({
            "type": notice.kind.as_str(),
            "title": format!("DynamicTp executor [{}] {} alarm", notice.executor, notice.kind),
            "executor": notice.executor,
            "threshold": notice.threshold,
            "value": notice.value,
            "pool_size": notice.pool_size,
            "largest_pool_size": notice.largest_pool_size,
            "active_count": notice.active_count,
            "queue_size": notice.queue_size,
            "queue_capacity": notice.queue_capacity,
            "reject_count": notice.reject_count,
            "receivers": self.receivers,
            "timestamp": notice.timestamp.to_rfc3339(),
        })
    }

    async fn post(&self, payload: &serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DtpError::Delivery(format!(
                "webhook {} returned {}: {}",
                self.platform, status, body
            )));
        }

        debug!(platform = %self.platform, "Webhook notification sent");
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn send_change(&self, notice: &ChangeNotice) -> Result<()> {
        self.post(&self.build_change_payload(notice)).await
    }

    async fn send_alarm(&self, notice: &AlarmNotice) -> Result<()> {
        self.post(&self.build_alarm_payload(notice)).await
    }
}

/// Writes notices to the log
pub struct LogChannel {
    platform: String,
}

impl LogChannel {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn send_change(&self, notice: &ChangeNotice) -> Result<()> {
        info!(
            executor = %notice.executor,
            changes = %notice.diff,
            "Executor configuration changed"
        );
        Ok(())
    }

    async fn send_alarm(&self, notice: &AlarmNotice) -> Result<()> {
        warn!(
            executor = %notice.executor,
            kind = %notice.kind,
            threshold = notice.threshold,
            value = notice.value,
            pool_size = notice.pool_size,
            largest_pool_size = notice.largest_pool_size,
            active_count = notice.active_count,
            queue_size = notice.queue_size,
            queue_capacity = notice.queue_capacity,
            reject_count = notice.reject_count,
            "Executor alarm"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(name: &str, url: Option<&str>) -> NotifyPlatform {
        NotifyPlatform {
            platform: name.to_string(),
            webhook_url: url.map(str::to_string),
            receivers: vec![],
        }
    }

    #[test]
    fn test_channel_for_known_platforms() {
        let webhook = channel_for(&platform("webhook", Some("http://localhost/hook"))).unwrap();
        assert_eq!(webhook.platform(), "webhook");

        let log = channel_for(&platform("log", None)).unwrap();
        assert_eq!(log.platform(), "log");
    }

    #[test]
    fn test_channel_for_unusable_platforms() {
        assert!(channel_for(&platform("webhook", None)).is_none());
        assert!(channel_for(&platform("ding", Some("http://x"))).is_none());
    }
}
