//! DynamicExecutor - worker pool whose tunables can change while it runs
//!
//! Submission follows the classic thread-pool-executor rules:
//! - Fewer live workers than core size: start a worker for the task
//! - Otherwise enqueue if the work queue has room
//! - Otherwise start a worker if below max size
//! - Otherwise apply the rejection policy
//!
//! Workers above core size (or every worker when core timeout is allowed)
//! retire after idling for keep-alive. Every setter is individually
//! thread-safe; multi-field updates are serialized by the refresh lock.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use dtp_common::{ExecutorProperties, NotifyItem, QueueType};

use crate::error::DtpError;
use crate::queue::{Task, WorkQueue};
use crate::reject::RejectPolicy;
use crate::Result;

/// Upper bound on how long an idle worker parks before re-checking pool state
const IDLE_RECHECK: Duration = Duration::from_secs(1);
const TERMINATION_POLL: Duration = Duration::from_millis(20);

/// Keep-alive is stored in whole milliseconds, saturating at `u64::MAX`
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Check that a record describes a committable pool shape.
pub fn validate_properties(props: &ExecutorProperties) -> Result<()> {
    if props.core_pool_size < 0
        || props.maximum_pool_size <= 0
        || props.maximum_pool_size < props.core_pool_size
        || props.keep_alive_time < 0
    {
        return Err(DtpError::Validation(format!(
            "executor [{}]: core_pool_size={}, maximum_pool_size={}, keep_alive_time={}",
            props.thread_pool_name,
            props.core_pool_size,
            props.maximum_pool_size,
            props.keep_alive_time
        )));
    }
    Ok(())
}

pub struct DynamicExecutor {
    name: String,
    core_size: AtomicUsize,
    max_size: AtomicUsize,
    keep_alive_ms: AtomicU64,
    allow_core_timeout: AtomicBool,
    reject_policy: RwLock<RejectPolicy>,
    queue: WorkQueue,

    /// Live workers, including idle ones
    pool_size: AtomicUsize,
    largest_pool_size: AtomicUsize,
    /// Workers currently running a task
    active_count: AtomicUsize,
    completed_tasks: AtomicU64,
    reject_count: AtomicU64,

    running: AtomicBool,
    wait_for_tasks_on_shutdown: AtomicBool,
    await_termination_secs: AtomicU64,

    notify_items: RwLock<Vec<NotifyItem>>,

    /// Held for the whole of one refresh so concurrent refreshes of the same
    /// executor apply one after the other
    refresh_lock: Mutex<()>,
}

impl DynamicExecutor {
    /// Build a running executor from a configuration record.
    ///
    /// Workers are started lazily on submission. Must be called inside a
    /// tokio runtime before the first `execute`.
    pub fn from_properties(props: &ExecutorProperties) -> Result<Arc<Self>> {
        validate_properties(props)?;
        let policy = RejectPolicy::resolve(&props.rejected_handler_type)?;
        let keep_alive = props.keep_alive().unwrap_or_default();

        if props.allow_core_thread_timeout && keep_alive.is_zero() {
            return Err(DtpError::InvalidSize(format!(
                "executor [{}]: core threads must have a nonzero keep-alive",
                props.thread_pool_name
            )));
        }

        Ok(Arc::new(Self {
            name: props.thread_pool_name.clone(),
            core_size: AtomicUsize::new(props.core_pool_size as usize),
            max_size: AtomicUsize::new(props.maximum_pool_size as usize),
            keep_alive_ms: AtomicU64::new(duration_millis(keep_alive)),
            allow_core_timeout: AtomicBool::new(props.allow_core_thread_timeout),
            reject_policy: RwLock::new(policy),
            queue: WorkQueue::new(props.queue_type, props.queue_capacity),
            pool_size: AtomicUsize::new(0),
            largest_pool_size: AtomicUsize::new(0),
            active_count: AtomicUsize::new(0),
            completed_tasks: AtomicU64::new(0),
            reject_count: AtomicU64::new(0),
            running: AtomicBool::new(true),
            wait_for_tasks_on_shutdown: AtomicBool::new(props.wait_for_tasks_to_complete_on_shutdown),
            await_termination_secs: AtomicU64::new(props.await_termination_seconds),
            notify_items: RwLock::new(props.notify_items.clone()),
            refresh_lock: Mutex::new(()),
        }))
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit a task. Returns once the task is queued, handed to a worker,
    /// or (with `CallerRunsPolicy`) run to completion on the caller.
    pub async fn execute<F>(self: &Arc<Self>, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_running() {
            return Err(DtpError::Shutdown(self.name.clone()));
        }

        let task: Task = Box::pin(task);

        if self.reserve_worker(self.core_size()) {
            self.spawn_worker(Some(task));
            return Ok(());
        }

        let task = match self.queue.offer(task) {
            Ok(()) => {
                // core size 0: make sure someone drains the queue
                if self.pool_size() == 0 && self.reserve_worker(self.max_size()) {
                    self.spawn_worker(None);
                }
                return Ok(());
            }
            Err(task) => task,
        };

        if self.reserve_worker(self.max_size()) {
            self.spawn_worker(Some(task));
            return Ok(());
        }

        self.reject(task).await
    }

    async fn reject(&self, task: Task) -> Result<()> {
        self.reject_count.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("dtp_rejected_tasks_total", "pool" => self.name.clone()).increment(1);

        let policy = *self.reject_policy.read();
        debug!(
            executor = %self.name,
            policy = %policy,
            pool_size = self.pool_size(),
            queue_size = self.queue.len(),
            "Executor saturated, applying rejection policy"
        );

        match policy {
            RejectPolicy::Abort => Err(DtpError::Rejected(self.name.clone())),
            RejectPolicy::CallerRuns => {
                if self.is_running() {
                    task.await;
                }
                Ok(())
            }
            RejectPolicy::Discard => Ok(()),
            RejectPolicy::DiscardOldest => {
                if self.is_running() {
                    drop(self.queue.poll());
                    if self.queue.offer(task).is_err() {
                        debug!(executor = %self.name, "No queue room after discarding oldest, dropping task");
                    }
                }
                Ok(())
            }
        }
    }

    // ========================================================================
    // Workers
    // ========================================================================

    /// Claim a worker slot if fewer than `limit` workers are live
    fn reserve_worker(&self, limit: usize) -> bool {
        match self
            .pool_size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
        {
            Ok(previous) => {
                self.largest_pool_size.fetch_max(previous + 1, Ordering::SeqCst);
                true
            }
            Err(_) => false,
        }
    }

    /// Start a worker on an already reserved slot
    fn spawn_worker(self: &Arc<Self>, first: Option<Task>) {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            executor.run_worker(first).await;
        });
    }

    async fn run_worker(self: Arc<Self>, mut first: Option<Task>) {
        debug!(executor = %self.name, pool_size = self.pool_size(), "Worker started");

        loop {
            let task = match first.take() {
                Some(task) => task,
                None => match self.next_task().await {
                    Some(task) => task,
                    None => break,
                },
            };

            self.active_count.fetch_add(1, Ordering::SeqCst);
            // Run on its own task so a panicking job cannot take the worker down
            if let Err(e) = tokio::spawn(task).await {
                if e.is_panic() {
                    error!(executor = %self.name, "Task panicked");
                }
            }
            self.active_count.fetch_sub(1, Ordering::SeqCst);
            self.completed_tasks.fetch_add(1, Ordering::SeqCst);
        }

        debug!(executor = %self.name, pool_size = self.pool_size(), "Worker exited");
    }

    /// Next task for a worker, or `None` once the worker has retired.
    /// A `None` return always comes with the worker's slot released.
    async fn next_task(&self) -> Option<Task> {
        let mut idle_since = Instant::now();

        loop {
            if let Some(task) = self.queue.poll() {
                return Some(task);
            }

            if !self.is_running() {
                self.pool_size.fetch_sub(1, Ordering::SeqCst);
                return None;
            }

            let pool = self.pool_size();
            if pool > self.max_size() && self.retire(|n| n > self.max_size()) {
                return None;
            }

            let keep_alive = self.keep_alive();
            let timed = self.allows_core_timeout() || pool > self.core_size();
            if timed && idle_since.elapsed() >= keep_alive {
                if self.retire(|n| n > self.core_size() || self.allows_core_timeout()) {
                    return None;
                }
                idle_since = Instant::now();
                continue;
            }

            let wait = if timed {
                keep_alive.saturating_sub(idle_since.elapsed()).min(IDLE_RECHECK)
            } else {
                IDLE_RECHECK
            };
            if let Some(task) = self.queue.take(Some(wait)).await {
                return Some(task);
            }
        }
    }

    /// Release this worker's slot when `allowed` permits it. Returns `false`
    /// when the worker must keep running: retiring was refused, or a task was
    /// queued after the worker last polled and no other worker is left for it.
    fn retire(&self, allowed: impl Fn(usize) -> bool) -> bool {
        if !self.try_retire(allowed) {
            return false;
        }
        if !self.queue.is_empty() && self.pool_size() == 0 && self.reserve_worker(self.max_size()) {
            debug!(executor = %self.name, "Last worker kept alive for queued work");
            return false;
        }
        true
    }

    fn try_retire(&self, allowed: impl Fn(usize) -> bool) -> bool {
        self.pool_size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0 && allowed(n)).then(|| n - 1)
            })
            .is_ok()
    }

    // ========================================================================
    // Tunable setters
    // ========================================================================

    /// Set core size. Fails if it would exceed max size.
    /// Raising it starts workers for already-queued tasks.
    pub fn set_core_size(self: &Arc<Self>, core_size: usize) -> Result<()> {
        let max = self.max_size();
        if core_size > max {
            return Err(DtpError::InvalidSize(format!(
                "executor [{}]: core size {} exceeds max size {}",
                self.name, core_size, max
            )));
        }

        let old = self.core_size.swap(core_size, Ordering::SeqCst);
        if core_size > old {
            let backlog = self.queue.len().min(core_size - old);
            for _ in 0..backlog {
                if !self.reserve_worker(core_size) {
                    break;
                }
                self.spawn_worker(None);
            }
        } else if core_size < old {
            self.queue.wake_all();
        }

        info!(executor = %self.name, old = old, new = core_size, "Core size updated");
        Ok(())
    }

    /// Set max size. Fails if zero or below core size.
    /// Excess workers retire once they go idle.
    pub fn set_max_size(&self, max_size: usize) -> Result<()> {
        let core = self.core_size();
        if max_size == 0 || max_size < core {
            return Err(DtpError::InvalidSize(format!(
                "executor [{}]: max size {} must be > 0 and >= core size {}",
                self.name, max_size, core
            )));
        }

        let old = self.max_size.swap(max_size, Ordering::SeqCst);
        if max_size < old {
            self.queue.wake_all();
        }

        info!(executor = %self.name, old = old, new = max_size, "Max size updated");
        Ok(())
    }

    pub fn set_keep_alive(&self, keep_alive: Duration) -> Result<()> {
        if keep_alive.is_zero() && self.allows_core_timeout() {
            return Err(DtpError::InvalidSize(format!(
                "executor [{}]: core threads must have a nonzero keep-alive",
                self.name
            )));
        }

        let old = Duration::from_millis(self.keep_alive_ms.swap(duration_millis(keep_alive), Ordering::SeqCst));
        if keep_alive < old {
            self.queue.wake_all();
        }

        info!(executor = %self.name, old = ?old, new = ?keep_alive, "Keep-alive updated");
        Ok(())
    }

    pub fn set_allow_core_timeout(&self, allow: bool) -> Result<()> {
        if allow && self.keep_alive().is_zero() {
            return Err(DtpError::InvalidSize(format!(
                "executor [{}]: core threads must have a nonzero keep-alive",
                self.name
            )));
        }
        if self.allow_core_timeout.swap(allow, Ordering::SeqCst) != allow {
            self.queue.wake_all();
            info!(executor = %self.name, allow = allow, "Core thread timeout updated");
        }
        Ok(())
    }

    pub fn set_reject_policy(&self, policy: RejectPolicy) {
        let old = std::mem::replace(&mut *self.reject_policy.write(), policy);
        info!(executor = %self.name, old = %old, new = %policy, "Rejection policy updated");
    }

    /// Resize the work queue. Only resizable queue types accept this.
    pub fn set_queue_capacity(&self, capacity: usize) -> Result<()> {
        self.queue.set_capacity(capacity).map_err(|_| DtpError::CapacityMismatch {
            executor: self.name.clone(),
            queue_type: self.queue.queue_type().to_string(),
        })?;
        info!(executor = %self.name, capacity = capacity, "Queue capacity updated");
        Ok(())
    }

    pub fn set_wait_for_tasks_on_shutdown(&self, wait: bool) {
        self.wait_for_tasks_on_shutdown.store(wait, Ordering::SeqCst);
    }

    pub fn set_await_termination(&self, timeout: Duration) {
        self.await_termination_secs.store(timeout.as_secs(), Ordering::SeqCst);
    }

    pub fn set_notify_items(&self, items: Vec<NotifyItem>) {
        *self.notify_items.write() = items;
    }

    /// Serialize a multi-field update against other refreshes of this executor
    pub fn refresh_lock(&self) -> MutexGuard<'_, ()> {
        self.refresh_lock.lock()
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn core_size(&self) -> usize {
        self.core_size.load(Ordering::SeqCst)
    }

    pub fn max_size(&self) -> usize {
        self.max_size.load(Ordering::SeqCst)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms.load(Ordering::SeqCst))
    }

    pub fn allows_core_timeout(&self) -> bool {
        self.allow_core_timeout.load(Ordering::SeqCst)
    }

    pub fn reject_policy(&self) -> RejectPolicy {
        *self.reject_policy.read()
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue.queue_type()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_remaining_capacity(&self) -> usize {
        self.queue.remaining_capacity()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size.load(Ordering::SeqCst)
    }

    pub fn largest_pool_size(&self) -> usize {
        self.largest_pool_size.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    pub fn completed_task_count(&self) -> u64 {
        self.completed_tasks.load(Ordering::SeqCst)
    }

    pub fn reject_count(&self) -> u64 {
        self.reject_count.load(Ordering::SeqCst)
    }

    pub fn wait_for_tasks_on_shutdown(&self) -> bool {
        self.wait_for_tasks_on_shutdown.load(Ordering::SeqCst)
    }

    pub fn await_termination(&self) -> Duration {
        Duration::from_secs(self.await_termination_secs.load(Ordering::SeqCst))
    }

    pub fn notify_items(&self) -> Vec<NotifyItem> {
        self.notify_items.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop accepting work. With graceful shutdown enabled, queued and running
    /// tasks get up to the await-termination timeout to finish; otherwise
    /// queued tasks are dropped and only running ones complete.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let graceful = self.wait_for_tasks_on_shutdown();
        if !graceful {
            let dropped = self.queue.drain().len();
            if dropped > 0 {
                warn!(executor = %self.name, dropped = dropped, "Dropped queued tasks on shutdown");
            }
        }
        self.queue.wake_all();

        info!(
            executor = %self.name,
            graceful = graceful,
            pool_size = self.pool_size(),
            queue_size = self.queue.len(),
            "Shutting down executor"
        );

        if graceful {
            let timeout = self.await_termination();
            if !self.wait_terminated(timeout).await {
                warn!(
                    executor = %self.name,
                    timeout_secs = timeout.as_secs(),
                    remaining_workers = self.pool_size(),
                    "Executor did not terminate within await-termination timeout"
                );
            }
        }
    }

    /// Wait until every worker has exited. Returns false on timeout.
    pub async fn wait_terminated(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pool_size() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(TERMINATION_POLL).await;
        }
        true
    }

    pub fn is_terminated(&self) -> bool {
        !self.is_running() && self.pool_size() == 0
    }
}

impl std::fmt::Debug for DynamicExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicExecutor")
            .field("name", &self.name)
            .field("core_size", &self.core_size())
            .field("max_size", &self.max_size())
            .field("pool_size", &self.pool_size())
            .field("queue_type", &self.queue_type())
            .field("queue_size", &self.queue_size())
            .field("queue_capacity", &self.queue_capacity())
            .field("reject_policy", &self.reject_policy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(name: &str, core: i64, max: i64, capacity: usize) -> ExecutorProperties {
        ExecutorProperties {
            thread_pool_name: name.to_string(),
            core_pool_size: core,
            maximum_pool_size: max,
            queue_capacity: capacity,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_properties() {
        assert!(validate_properties(&props("ok", 1, 2, 10)).is_ok());
        assert!(validate_properties(&props("neg-core", -1, 2, 10)).is_err());
        assert!(validate_properties(&props("zero-max", 0, 0, 10)).is_err());
        assert!(validate_properties(&props("max-lt-core", 4, 2, 10)).is_err());

        let mut p = props("neg-keep-alive", 1, 2, 10);
        p.keep_alive_time = -5;
        assert!(validate_properties(&p).is_err());
    }

    #[test]
    fn test_from_properties_rejects_unknown_policy() {
        let mut p = props("p", 1, 2, 10);
        p.rejected_handler_type = "NoSuchPolicy".to_string();
        assert!(matches!(DynamicExecutor::from_properties(&p), Err(DtpError::UnknownPolicy(_))));
    }

    #[tokio::test]
    async fn test_size_setters_keep_max_above_core() {
        let executor = DynamicExecutor::from_properties(&props("sizes", 2, 4, 10)).unwrap();

        assert!(executor.set_core_size(5).is_err());
        assert_eq!(executor.core_size(), 2);

        assert!(executor.set_max_size(1).is_err());
        assert!(executor.set_max_size(0).is_err());
        assert_eq!(executor.max_size(), 4);

        executor.set_max_size(8).unwrap();
        executor.set_core_size(6).unwrap();
        assert_eq!((executor.core_size(), executor.max_size()), (6, 8));
    }

    #[tokio::test]
    async fn test_core_timeout_requires_keep_alive() {
        let mut p = props("ka", 1, 2, 10);
        p.keep_alive_time = 0;
        let executor = DynamicExecutor::from_properties(&p).unwrap();
        assert!(executor.set_allow_core_timeout(true).is_err());

        executor.set_keep_alive(Duration::from_millis(50)).unwrap();
        executor.set_allow_core_timeout(true).unwrap();
        assert!(executor.set_keep_alive(Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_retiring_last_worker_stays_for_queued_task() {
        let mut p = props("retire", 1, 1, 10);
        p.allow_core_thread_timeout = true;
        p.keep_alive_time = 1;
        p.unit = dtp_common::TimeUnit::Milliseconds;
        let executor = DynamicExecutor::from_properties(&p).unwrap();

        // A worker that has just polled an empty queue...
        assert!(executor.reserve_worker(1));
        // ...while a submitter queues a task and sees that worker still live
        let (tx, rx) = tokio::sync::oneshot::channel();
        let queued = executor.queue.offer(Box::pin(async move {
            let _ = tx.send(());
        }));
        assert!(queued.is_ok());

        assert!(!executor.retire(|_| true));
        assert_eq!(executor.pool_size(), 1);

        let task = executor.next_task().await.unwrap();
        task.await;
        rx.await.unwrap();

        assert!(executor.retire(|_| true));
        assert_eq!(executor.pool_size(), 0);
    }

    #[tokio::test]
    async fn test_huge_keep_alive_saturates() {
        let executor = DynamicExecutor::from_properties(&props("huge", 1, 2, 10)).unwrap();
        executor.set_keep_alive(Duration::MAX).unwrap();
        assert_eq!(executor.keep_alive(), Duration::from_millis(u64::MAX));
    }
}
