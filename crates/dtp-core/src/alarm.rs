//! Alarm Monitor - periodic threshold checks over every registered executor
//!
//! - LIVENESS: active workers reached `threshold`% of max size
//! - CAPACITY: queued tasks reached `threshold`% of queue capacity
//! - REJECT: at least `threshold` tasks rejected since the previous check
//!
//! Each alarm is gated by the executor's notify item and the alarm limiter,
//! then handed to the notification dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use dtp_common::{find_notify_item, NotifyKind};

use crate::dispatcher::{Dispatch, NotificationDispatcher};
use crate::executor::DynamicExecutor;
use crate::limiter::AlarmLimiter;
use crate::notification::{AlarmNotice, Notice};
use crate::registry::ExecutorRegistry;

#[derive(Debug, Clone)]
pub struct AlarmConfig {
    pub enabled: bool,
    pub check_interval: Duration,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(5),
        }
    }
}

pub struct AlarmMonitor {
    config: AlarmConfig,
    registry: Arc<ExecutorRegistry>,
    limiter: Arc<AlarmLimiter>,
    dispatcher: Arc<NotificationDispatcher>,
    /// Reject count seen at the previous check, per executor
    last_reject_counts: parking_lot::Mutex<HashMap<String, u64>>,
}

impl AlarmMonitor {
    pub fn new(
        config: AlarmConfig,
        registry: Arc<ExecutorRegistry>,
        limiter: Arc<AlarmLimiter>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            config,
            registry,
            limiter,
            dispatcher,
            last_reject_counts: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Run one round of checks. Returns the alarms handed to the dispatcher.
    pub fn check_all(&self) -> Vec<(String, NotifyKind)> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut raised = Vec::new();
        for executor in self.registry.executors() {
            for kind in [NotifyKind::Liveness, NotifyKind::Capacity, NotifyKind::Reject] {
                if self.check(&executor, kind) {
                    raised.push((executor.name().to_string(), kind));
                }
            }
        }
        raised
    }

    fn check(&self, executor: &DynamicExecutor, kind: NotifyKind) -> bool {
        let value = match kind {
            NotifyKind::Liveness => percent(executor.active_count() as u64, executor.max_size() as u64),
            NotifyKind::Capacity => percent(executor.queue_size() as u64, executor.queue_capacity() as u64),
            NotifyKind::Reject => self.reject_delta(executor),
            NotifyKind::Change => None,
        };
        let Some(value) = value else {
            return false;
        };

        let items = executor.notify_items();
        let Some(item) = find_notify_item(&items, kind).filter(|i| i.enabled) else {
            return false;
        };
        let threshold = item.threshold();
        if threshold == 0 || value < u64::from(threshold) {
            return false;
        }
        if item.platforms.is_empty() {
            debug!(executor = %executor.name(), kind = %kind, "Alarm has no platforms, skipped");
            return false;
        }
        if !self.limiter.allow(executor.name(), kind) {
            debug!(executor = %executor.name(), kind = %kind, value = value, "Alarm rate limited");
            return false;
        }

        warn!(
            executor = %executor.name(),
            kind = %kind,
            value = value,
            threshold = threshold,
            "Executor alarm threshold reached"
        );

        let notice = Notice::Alarm(AlarmNotice {
            executor: executor.name().to_string(),
            kind,
            threshold,
            value,
            pool_size: executor.pool_size(),
            largest_pool_size: executor.largest_pool_size(),
            active_count: executor.active_count(),
            queue_size: executor.queue_size(),
            queue_capacity: executor.queue_capacity(),
            reject_count: executor.reject_count(),
            platforms: item.platforms.clone(),
            timestamp: Utc::now(),
        });
        self.dispatcher.dispatch(notice) == Dispatch::Scheduled
    }

    fn reject_delta(&self, executor: &DynamicExecutor) -> Option<u64> {
        let current = executor.reject_count();
        let mut last = self.last_reject_counts.lock();
        let previous = last.insert(executor.name().to_string(), current).unwrap_or(0);
        Some(current.saturating_sub(previous))
    }

}

/// `part` as a whole-number percentage of `whole`; `None` when `whole` is 0
fn percent(part: u64, whole: u64) -> Option<u64> {
    (whole > 0).then(|| part.saturating_mul(100) / whole)
}

/// Spawn the periodic alarm check task
pub fn spawn_alarm_monitor(
    monitor: Arc<AlarmMonitor>,
    shutdown_tx: broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let mut shutdown_rx = shutdown_tx.subscribe();
    let interval = monitor.config.check_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        info!(interval_secs = interval.as_secs(), "Alarm monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let raised = monitor.check_all();
                    if !raised.is_empty() {
                        debug!(alarms = raised.len(), "Alarm check raised alarms");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Alarm monitor shutting down");
                    break;
                }
            }
        }
    })
}
