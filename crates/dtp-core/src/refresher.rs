//! Refresher - applies configuration batches to running executors
//!
//! For each record in a batch:
//! 1. Validate sizes and keep-alive
//! 2. Look the executor up in the registry
//! 3. Snapshot, apply each changed field, snapshot again
//! 4. Diff; an empty diff is a no-op
//! 5. Notify through the dispatcher when the change item allows it
//!
//! Every failure is confined to its own record and reported as a
//! `RefreshOutcome`; nothing on this path returns an error to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use dtp_common::{
    default_notify_items, fill_platforms, find_notify_item, merge_with_defaults, DtpProperties,
    ExecutorProperties, NotifyKind, NotifyPlatform, QueueType,
};

use crate::dispatcher::{Dispatch, NotificationDispatcher};
use crate::error::DtpError;
use crate::executor::{duration_millis, validate_properties, DynamicExecutor};
use crate::limiter::AlarmLimiter;
use crate::notification::{ChangeNotice, Notice};
use crate::registry::ExecutorRegistry;
use crate::reject::RejectPolicy;
use crate::snapshot::{ExecutorSnapshot, PropertyDiff};

/// What happened to one change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDecision {
    Scheduled,
    /// Dispatcher backlog full
    Dropped,
    /// No enabled change item on the executor
    Disabled,
    /// No alert platforms configured
    NoPlatforms,
    RateLimited,
}

/// A requested field the executor refused; the rest of the record still applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedField {
    pub field: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Record failed validation; the executor was not touched
    Invalid(String),
    /// No executor registered under the record's name
    NotFound,
    Unchanged {
        skipped: Vec<SkippedField>,
    },
    Changed {
        diff: PropertyDiff,
        notification: NotifyDecision,
        skipped: Vec<SkippedField>,
    },
}

impl RefreshOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Invalid(_) => "invalid",
            RefreshOutcome::NotFound => "not_found",
            RefreshOutcome::Unchanged { .. } => "unchanged",
            RefreshOutcome::Changed { .. } => "changed",
        }
    }

    /// Fields left at their current value, e.g. by the capacity guard
    pub fn skipped(&self) -> &[SkippedField] {
        match self {
            RefreshOutcome::Unchanged { skipped } | RefreshOutcome::Changed { skipped, .. } => skipped,
            _ => &[],
        }
    }

    pub fn diff(&self) -> Option<&PropertyDiff> {
        match self {
            RefreshOutcome::Changed { diff, .. } => Some(diff),
            _ => None,
        }
    }
}

/// Per-record outcomes of one batch, in batch order
#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    pub outcomes: Vec<(String, RefreshOutcome)>,
}

impl RefreshSummary {
    pub fn get(&self, name: &str) -> Option<&RefreshOutcome> {
        self.outcomes.iter().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    pub fn changed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RefreshOutcome::Changed { .. }))
            .count()
    }

    pub fn notifications_scheduled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| {
                matches!(
                    o,
                    RefreshOutcome::Changed {
                        notification: NotifyDecision::Scheduled,
                        ..
                    }
                )
            })
            .count()
    }
}

pub struct Refresher {
    registry: Arc<ExecutorRegistry>,
    limiter: Arc<AlarmLimiter>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl Refresher {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        limiter: Arc<AlarmLimiter>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            registry,
            limiter,
            dispatcher,
        }
    }

    /// Apply a configuration batch. Records are handled independently.
    pub fn refresh(&self, properties: &DtpProperties) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        if properties.executors.is_empty() {
            warn!("DynamicTp refresh, empty executor properties");
            return summary;
        }

        self.dispatcher.sync_platforms(&properties.platforms);

        for record in &properties.executors {
            if record.thread_pool_name.trim().is_empty() {
                warn!("DynamicTp refresh, executor record without thread_pool_name skipped");
                continue;
            }

            let outcome = self.refresh_executor(record, &properties.platforms);
            metrics::counter!("dtp_refresh_total", "outcome" => outcome.label()).increment(1);
            summary.outcomes.push((record.thread_pool_name.clone(), outcome));
        }

        debug!(
            records = summary.outcomes.len(),
            changed = summary.changed(),
            "DynamicTp refresh batch finished"
        );
        summary
    }

    /// Apply one record to the executor of the same name
    pub fn refresh_executor(&self, record: &ExecutorProperties, platforms: &[NotifyPlatform]) -> RefreshOutcome {
        let name = record.thread_pool_name.as_str();

        if let Err(e) = validate_properties(record) {
            warn!(executor = %name, error = %e, "DynamicTp refresh, invalid parameters");
            return RefreshOutcome::Invalid(e.to_string());
        }

        let executor = match self.registry.get_executor(name) {
            Ok(executor) => executor,
            Err(_) => {
                warn!(executor = %name, "DynamicTp refresh, executor not registered, skipped");
                return RefreshOutcome::NotFound;
            }
        };

        let (before, after, skipped) = {
            let _guard = executor.refresh_lock();
            let before = ExecutorSnapshot::capture(&executor);
            let skipped = apply_properties(&executor, record, platforms, &self.limiter);
            (before, ExecutorSnapshot::capture(&executor), skipped)
        };

        let diff = before.diff(&after);
        if diff.is_empty() {
            info!(executor = %name, "DynamicTp refresh, main properties of executor not changed");
            return RefreshOutcome::Unchanged { skipped };
        }

        info!(executor = %name, changes = %diff, "DynamicTp refresh, executor properties changed");

        let notification = self.notify_change(&executor, &diff, before, platforms);
        RefreshOutcome::Changed {
            diff,
            notification,
            skipped,
        }
    }

    fn notify_change(
        &self,
        executor: &DynamicExecutor,
        diff: &PropertyDiff,
        previous: ExecutorSnapshot,
        platforms: &[NotifyPlatform],
    ) -> NotifyDecision {
        let items = executor.notify_items();
        let Some(item) = find_notify_item(&items, NotifyKind::Change).filter(|i| i.enabled) else {
            debug!(executor = %executor.name(), "Change notification disabled");
            return NotifyDecision::Disabled;
        };

        if platforms.is_empty() {
            debug!(executor = %executor.name(), "No alert platforms configured, change notification skipped");
            return NotifyDecision::NoPlatforms;
        }

        if !self.limiter.allow(executor.name(), NotifyKind::Change) {
            debug!(executor = %executor.name(), "Change notification rate limited");
            return NotifyDecision::RateLimited;
        }

        let notice = Notice::Change(ChangeNotice {
            executor: executor.name().to_string(),
            diff: diff.clone(),
            previous,
            platforms: item.platforms.clone(),
            timestamp: Utc::now(),
        });

        match self.dispatcher.dispatch(notice) {
            Dispatch::Scheduled => NotifyDecision::Scheduled,
            Dispatch::Dropped => NotifyDecision::Dropped,
        }
    }
}

/// Push a validated record into a live executor, touching only fields whose
/// value differs. Failures of individual fields are logged, skipped and
/// returned.
pub(crate) fn apply_properties(
    executor: &Arc<DynamicExecutor>,
    record: &ExecutorProperties,
    platforms: &[NotifyPlatform],
    limiter: &AlarmLimiter,
) -> Vec<SkippedField> {
    let name = executor.name();
    let mut skipped = Vec::new();

    apply_sizes(executor, record.core_pool_size as usize, record.maximum_pool_size as usize, &mut skipped);

    // Keep-alive must be nonzero before core timeout is switched on
    let keep_alive = Duration::from_millis(duration_millis(record.keep_alive().unwrap_or_default()));
    if record.allow_core_thread_timeout {
        apply_keep_alive(executor, keep_alive, &mut skipped);
        apply_core_timeout(executor, true, &mut skipped);
    } else {
        apply_core_timeout(executor, false, &mut skipped);
        apply_keep_alive(executor, keep_alive, &mut skipped);
    }

    let policy_name = record.rejected_handler_type.trim();
    if !executor.reject_policy().name().eq_ignore_ascii_case(policy_name) {
        match RejectPolicy::resolve(policy_name) {
            Ok(policy) => executor.set_reject_policy(policy),
            Err(e) => {
                warn!(executor = %name, error = %e, "Rejection policy left unchanged");
                skipped.push(SkippedField::new("reject_policy", &e));
            }
        }
    }

    // A synchronous queue has no capacity of its own to adjust
    if executor.queue_type() != QueueType::SynchronousQueue
        && record.queue_capacity != executor.queue_capacity()
    {
        if let Err(e) = executor.set_queue_capacity(record.queue_capacity) {
            warn!(
                executor = %name,
                requested = record.queue_capacity,
                current = executor.queue_capacity(),
                error = %e,
                "Queue capacity left unchanged"
            );
            skipped.push(SkippedField::new("queue_capacity", &e));
        }
    }

    executor.set_wait_for_tasks_on_shutdown(record.wait_for_tasks_to_complete_on_shutdown);
    executor.set_await_termination(Duration::from_secs(record.await_termination_seconds));

    let mut items = if record.notify_items.is_empty() {
        default_notify_items()
    } else {
        merge_with_defaults(&record.notify_items)
    };
    fill_platforms(platforms, &mut items);

    let previous = executor.notify_items();
    for item in &items {
        let unchanged = find_notify_item(&previous, item.kind)
            .map(|p| p.interval() == item.interval())
            .unwrap_or(false);
        if !unchanged {
            limiter.init(name, item);
        }
    }
    executor.set_notify_items(items);
    skipped
}

impl SkippedField {
    fn new(field: &'static str, error: &DtpError) -> Self {
        Self {
            field,
            reason: error.to_string(),
        }
    }
}

/// Raise max before core when the new core exceeds the current max, so the
/// max >= core invariant holds after every individual call.
fn apply_sizes(executor: &Arc<DynamicExecutor>, core: usize, max: usize, skipped: &mut Vec<SkippedField>) {
    let set_core = |executor: &Arc<DynamicExecutor>, skipped: &mut Vec<SkippedField>| {
        if core != executor.core_size() {
            if let Err(e) = executor.set_core_size(core) {
                warn!(executor = %executor.name(), error = %e, "Core size left unchanged");
                skipped.push(SkippedField::new("core_size", &e));
            }
        }
    };
    let set_max = |executor: &Arc<DynamicExecutor>, skipped: &mut Vec<SkippedField>| {
        if max != executor.max_size() {
            if let Err(e) = executor.set_max_size(max) {
                warn!(executor = %executor.name(), error = %e, "Max size left unchanged");
                skipped.push(SkippedField::new("max_size", &e));
            }
        }
    };

    if core > executor.max_size() {
        set_max(executor, skipped);
        set_core(executor, skipped);
    } else {
        set_core(executor, skipped);
        set_max(executor, skipped);
    }
}

fn apply_keep_alive(executor: &DynamicExecutor, keep_alive: Duration, skipped: &mut Vec<SkippedField>) {
    if keep_alive != executor.keep_alive() {
        if let Err(e) = executor.set_keep_alive(keep_alive) {
            warn!(executor = %executor.name(), error = %e, "Keep-alive left unchanged");
            skipped.push(SkippedField::new("keep_alive", &e));
        }
    }
}

fn apply_core_timeout(executor: &DynamicExecutor, allow: bool, skipped: &mut Vec<SkippedField>) {
    if allow != executor.allows_core_timeout() {
        if let Err(e) = executor.set_allow_core_timeout(allow) {
            warn!(executor = %executor.name(), error = %e, "Core thread timeout left unchanged");
            skipped.push(SkippedField::new("allow_core_timeout", &e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(name: &str, core: i64, max: i64) -> ExecutorProperties {
        ExecutorProperties {
            thread_pool_name: name.to_string(),
            core_pool_size: core,
            maximum_pool_size: max,
            queue_capacity: 100,
            ..Default::default()
        }
    }

    fn executor(props: &ExecutorProperties) -> Arc<DynamicExecutor> {
        DynamicExecutor::from_properties(props).unwrap()
    }

    #[tokio::test]
    async fn test_sizes_applied_in_safe_order() {
        let limiter = AlarmLimiter::new();
        let exec = executor(&props("grow", 2, 4));

        apply_properties(&exec, &props("grow", 10, 20), &[], &limiter);
        assert_eq!((exec.core_size(), exec.max_size()), (10, 20));

        apply_properties(&exec, &props("grow", 1, 2), &[], &limiter);
        assert_eq!((exec.core_size(), exec.max_size()), (1, 2));
    }

    #[tokio::test]
    async fn test_unknown_policy_leaves_other_fields_applied() {
        let limiter = AlarmLimiter::new();
        let exec = executor(&props("policy", 1, 2));

        let mut record = props("policy", 2, 3);
        record.rejected_handler_type = "BogusPolicy".to_string();
        let skipped = apply_properties(&exec, &record, &[], &limiter);

        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].field, "reject_policy");
        assert_eq!(exec.reject_policy(), RejectPolicy::Abort);
        assert_eq!(exec.core_size(), 2);
    }

    #[tokio::test]
    async fn test_capacity_guard_for_fixed_queue() {
        let limiter = AlarmLimiter::new();
        let mut base = props("fixed", 1, 2);
        base.queue_type = QueueType::ArrayBlockingQueue;
        let exec = executor(&base);

        let mut record = base.clone();
        record.queue_capacity = 500;
        let skipped = apply_properties(&exec, &record, &[], &limiter);

        assert_eq!(exec.queue_capacity(), 100);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].field, "queue_capacity");
        assert!(skipped[0].reason.contains("ArrayBlockingQueue"));
    }

    #[tokio::test]
    async fn test_synchronous_queue_ignores_record_capacity() {
        let limiter = AlarmLimiter::new();
        let mut record = props("handoff", 1, 2);
        record.queue_type = QueueType::SynchronousQueue;
        record.queue_capacity = 1024;
        let exec = executor(&record);

        assert!(apply_properties(&exec, &record, &[], &limiter).is_empty());
        assert_eq!(exec.queue_capacity(), 0);
    }

    #[tokio::test]
    async fn test_huge_keep_alive_applies_once() {
        let limiter = AlarmLimiter::new();
        let exec = executor(&props("huge", 1, 2));
        let mut record = props("huge", 1, 2);
        record.keep_alive_time = i64::MAX;
        record.unit = dtp_common::TimeUnit::Hours;

        apply_properties(&exec, &record, &[], &limiter);
        let stored = exec.keep_alive();
        assert_eq!(stored, Duration::from_millis(u64::MAX));

        let before = ExecutorSnapshot::capture(&exec);
        assert!(apply_properties(&exec, &record, &[], &limiter).is_empty());
        assert!(before.diff(&ExecutorSnapshot::capture(&exec)).is_empty());
    }

    #[tokio::test]
    async fn test_empty_notify_items_reset_to_defaults() {
        let limiter = AlarmLimiter::new();
        let exec = executor(&props("items", 1, 2));
        let platforms = vec![NotifyPlatform {
            platform: "log".to_string(),
            webhook_url: None,
            receivers: vec![],
        }];

        apply_properties(&exec, &props("items", 1, 2), &platforms, &limiter);

        let items = exec.notify_items();
        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|i| i.platforms == vec!["log".to_string()]));
        assert!(limiter.contains("items", NotifyKind::Reject));
    }
}
