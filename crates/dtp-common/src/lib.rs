use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod logging;

// ============================================================================
// Queue and Time Types
// ============================================================================

/// Backing work-queue implementation of an executor.
///
/// Names match the configuration values pushed by the config center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QueueType {
    /// Linked queue whose capacity can be changed while the pool runs
    #[default]
    VariableLinkedBlockingQueue,
    LinkedBlockingQueue,
    ArrayBlockingQueue,
    SynchronousQueue,
    PriorityBlockingQueue,
}

impl QueueType {
    pub fn name(&self) -> &'static str {
        match self {
            QueueType::VariableLinkedBlockingQueue => "VariableLinkedBlockingQueue",
            QueueType::LinkedBlockingQueue => "LinkedBlockingQueue",
            QueueType::ArrayBlockingQueue => "ArrayBlockingQueue",
            QueueType::SynchronousQueue => "SynchronousQueue",
            QueueType::PriorityBlockingQueue => "PriorityBlockingQueue",
        }
    }

    /// Only the variable linked queue supports a live capacity change
    pub fn is_resizable(&self) -> bool {
        matches!(self, QueueType::VariableLinkedBlockingQueue)
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unit of `keep_alive_time` in executor properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeUnit {
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    pub fn to_duration(&self, value: u64) -> Duration {
        match self {
            TimeUnit::Milliseconds => Duration::from_millis(value),
            TimeUnit::Seconds => Duration::from_secs(value),
            TimeUnit::Minutes => Duration::from_secs(value.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(value.saturating_mul(3600)),
        }
    }
}

// ============================================================================
// Notification Types
// ============================================================================

/// Category of alertable event for an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    /// Executor tunables were changed by a configuration push
    Change,
    /// Active workers reached the threshold percentage of max size
    Liveness,
    /// Queue size reached the threshold percentage of queue capacity
    Capacity,
    /// Number of rejected tasks since the last check reached the threshold
    Reject,
}

impl NotifyKind {
    pub const ALL: [NotifyKind; 4] = [
        NotifyKind::Change,
        NotifyKind::Liveness,
        NotifyKind::Capacity,
        NotifyKind::Reject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::Change => "change",
            NotifyKind::Liveness => "liveness",
            NotifyKind::Capacity => "capacity",
            NotifyKind::Reject => "reject",
        }
    }
}

impl fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_NOTIFY_INTERVAL_SECS: u64 = 120;

/// Notifications held by the dispatcher before new ones are dropped
pub const DEFAULT_BACKLOG_CAPACITY: usize = 1024;

/// Notification rule attached to an executor.
///
/// `threshold` and `interval` are optional in configuration; unset values are
/// filled from the default rule of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyItem {
    #[serde(rename = "type")]
    pub kind: NotifyKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub threshold: Option<u32>,
    /// Minimum seconds between two alerts of this kind for one executor
    #[serde(default)]
    pub interval: Option<u64>,
    /// Platform names to deliver to; empty means all configured platforms
    #[serde(default)]
    pub platforms: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl NotifyItem {
    pub fn new(kind: NotifyKind, threshold: Option<u32>) -> Self {
        Self {
            kind,
            enabled: true,
            threshold,
            interval: Some(DEFAULT_NOTIFY_INTERVAL_SECS),
            platforms: Vec::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold.unwrap_or(0)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.unwrap_or(DEFAULT_NOTIFY_INTERVAL_SECS))
    }
}

/// System default notify items: every kind enabled.
pub fn default_notify_items() -> Vec<NotifyItem> {
    vec![
        NotifyItem::new(NotifyKind::Change, None),
        NotifyItem::new(NotifyKind::Liveness, Some(70)),
        NotifyItem::new(NotifyKind::Capacity, Some(70)),
        NotifyItem::new(NotifyKind::Reject, Some(1)),
    ]
}

/// Fill unset threshold/interval fields from the default item of the same kind.
pub fn merge_with_defaults(items: &[NotifyItem]) -> Vec<NotifyItem> {
    let defaults = default_notify_items();
    items
        .iter()
        .map(|item| {
            let mut merged = item.clone();
            if let Some(default) = defaults.iter().find(|d| d.kind == item.kind) {
                if merged.threshold.is_none() {
                    merged.threshold = default.threshold;
                }
                if merged.interval.is_none() {
                    merged.interval = default.interval;
                }
            }
            merged
        })
        .collect()
}

/// Give every item without explicit platforms all configured platform names.
pub fn fill_platforms(platforms: &[NotifyPlatform], items: &mut [NotifyItem]) {
    if platforms.is_empty() {
        return;
    }
    for item in items.iter_mut().filter(|i| i.platforms.is_empty()) {
        item.platforms = platforms.iter().map(|p| p.platform.clone()).collect();
    }
}

pub fn find_notify_item(items: &[NotifyItem], kind: NotifyKind) -> Option<&NotifyItem> {
    items.iter().find(|i| i.kind == kind)
}

/// An alert destination (webhook, log, ...) configured process-wide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyPlatform {
    pub platform: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub receivers: Vec<String>,
}

// ============================================================================
// Configuration Records
// ============================================================================

/// Desired tunables for one named executor, as pushed by a configuration source.
///
/// Sizes and keep-alive are signed so that malformed pushes can be detected
/// and rejected rather than failing to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorProperties {
    pub thread_pool_name: String,
    pub core_pool_size: i64,
    pub maximum_pool_size: i64,
    pub queue_capacity: usize,
    pub queue_type: QueueType,
    pub keep_alive_time: i64,
    pub unit: TimeUnit,
    pub allow_core_thread_timeout: bool,
    pub rejected_handler_type: String,
    pub wait_for_tasks_to_complete_on_shutdown: bool,
    pub await_termination_seconds: u64,
    pub notify_items: Vec<NotifyItem>,
}

impl Default for ExecutorProperties {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get() as i64)
            .unwrap_or(1);
        Self {
            thread_pool_name: String::new(),
            core_pool_size: 1,
            maximum_pool_size: cpus,
            queue_capacity: 1024,
            queue_type: QueueType::default(),
            keep_alive_time: 30,
            unit: TimeUnit::Seconds,
            allow_core_thread_timeout: false,
            rejected_handler_type: "AbortPolicy".to_string(),
            wait_for_tasks_to_complete_on_shutdown: false,
            await_termination_seconds: 0,
            notify_items: Vec::new(),
        }
    }
}

impl ExecutorProperties {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            thread_pool_name: name.into(),
            ..Default::default()
        }
    }

    /// Keep-alive as a duration; `None` when negative
    pub fn keep_alive(&self) -> Option<Duration> {
        u64::try_from(self.keep_alive_time)
            .ok()
            .map(|v| self.unit.to_duration(v))
    }
}

/// One configuration batch: global alert platforms plus per-executor records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DtpProperties {
    pub enabled: bool,
    pub platforms: Vec<NotifyPlatform>,
    pub executors: Vec<ExecutorProperties>,
}

impl Default for DtpProperties {
    fn default() -> Self {
        Self {
            enabled: true,
            platforms: Vec::new(),
            executors: Vec::new(),
        }
    }
}
