//! Executor Tests
//!
//! Task submission and worker lifecycle of DynamicExecutor:
//! - Core workers, queueing, growth to max size
//! - Rejection policies when saturated
//! - Live size changes while tasks are queued
//! - Keep-alive retirement and shutdown

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use common::{executor_props, wait_until};
use dtp_common::{ExecutorProperties, QueueType, TimeUnit};
use dtp_core::{DtpError, DynamicExecutor, RejectPolicy};

fn gated(gate: &Arc<Semaphore>) -> impl std::future::Future<Output = ()> + Send + 'static {
    let gate = gate.clone();
    async move {
        let _permit = gate.acquire().await;
    }
}

fn counting(counter: &Arc<AtomicUsize>) -> impl std::future::Future<Output = ()> + Send + 'static {
    let counter = counter.clone();
    async move {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

fn saturating_props(policy: &str) -> ExecutorProperties {
    let mut props = executor_props("saturated", 1, 1);
    props.queue_capacity = 1;
    props.rejected_handler_type = policy.to_string();
    props
}

#[tokio::test]
async fn test_tasks_run_to_completion() {
    let executor = DynamicExecutor::from_properties(&executor_props("run", 2, 4)).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        executor.execute(counting(&counter)).await.unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || counter.load(Ordering::SeqCst) == 20).await);
    assert!(wait_until(Duration::from_secs(2), || executor.completed_task_count() == 20).await);
    assert!(executor.largest_pool_size() <= 4);
}

#[tokio::test]
async fn test_abort_policy_rejects_when_saturated() {
    let executor = DynamicExecutor::from_properties(&saturating_props("AbortPolicy")).unwrap();
    let gate = Arc::new(Semaphore::new(0));

    executor.execute(gated(&gate)).await.unwrap();
    executor.execute(gated(&gate)).await.unwrap();
    assert_eq!(executor.queue_size(), 1);

    let result = executor.execute(async {}).await;
    assert!(matches!(result, Err(DtpError::Rejected(name)) if name == "saturated"));
    assert_eq!(executor.reject_count(), 1);

    gate.add_permits(10);
}

#[tokio::test]
async fn test_caller_runs_policy_runs_inline() {
    let executor = DynamicExecutor::from_properties(&saturating_props("CallerRunsPolicy")).unwrap();
    let gate = Arc::new(Semaphore::new(0));

    executor.execute(gated(&gate)).await.unwrap();
    executor.execute(gated(&gate)).await.unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    executor
        .execute(async move { flag.store(true, Ordering::SeqCst) })
        .await
        .unwrap();

    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(executor.reject_count(), 1);

    gate.add_permits(10);
}

#[tokio::test]
async fn test_discard_oldest_replaces_queued_task() {
    let executor = DynamicExecutor::from_properties(&saturating_props("DiscardOldestPolicy")).unwrap();
    let gate = Arc::new(Semaphore::new(0));

    executor.execute(gated(&gate)).await.unwrap();

    let oldest = Arc::new(AtomicBool::new(false));
    let newest = Arc::new(AtomicBool::new(false));
    let (o, n) = (oldest.clone(), newest.clone());
    executor.execute(async move { o.store(true, Ordering::SeqCst) }).await.unwrap();
    executor.execute(async move { n.store(true, Ordering::SeqCst) }).await.unwrap();

    gate.add_permits(10);
    assert!(wait_until(Duration::from_secs(2), || newest.load(Ordering::SeqCst)).await);
    assert!(!oldest.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_discard_policy_drops_silently() {
    let executor = DynamicExecutor::from_properties(&saturating_props("DiscardPolicy")).unwrap();
    let gate = Arc::new(Semaphore::new(0));

    executor.execute(gated(&gate)).await.unwrap();
    executor.execute(gated(&gate)).await.unwrap();
    assert!(executor.execute(async {}).await.is_ok());
    assert_eq!(executor.reject_count(), 1);

    gate.add_permits(10);
}

#[tokio::test]
async fn test_policy_change_takes_effect_on_next_rejection() {
    let executor = DynamicExecutor::from_properties(&saturating_props("AbortPolicy")).unwrap();
    let gate = Arc::new(Semaphore::new(0));

    executor.execute(gated(&gate)).await.unwrap();
    executor.execute(gated(&gate)).await.unwrap();
    assert!(executor.execute(async {}).await.is_err());

    executor.set_reject_policy(RejectPolicy::Discard);
    assert!(executor.execute(async {}).await.is_ok());
    assert_eq!(executor.reject_count(), 2);

    gate.add_permits(10);
}

#[tokio::test]
async fn test_raising_core_size_drains_backlog() {
    let executor = DynamicExecutor::from_properties(&executor_props("grow", 1, 4)).unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let counter = Arc::new(AtomicUsize::new(0));

    executor.execute(gated(&gate)).await.unwrap();
    for _ in 0..3 {
        executor.execute(counting(&counter)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(executor.pool_size(), 1);

    executor.set_core_size(4).unwrap();

    assert!(wait_until(Duration::from_secs(2), || counter.load(Ordering::SeqCst) == 3).await);
    gate.add_permits(10);
}

#[tokio::test]
async fn test_queue_capacity_grows_live() {
    let executor = DynamicExecutor::from_properties(&saturating_props("AbortPolicy")).unwrap();
    let gate = Arc::new(Semaphore::new(0));

    executor.execute(gated(&gate)).await.unwrap();
    executor.execute(gated(&gate)).await.unwrap();
    assert!(executor.execute(gated(&gate)).await.is_err());

    executor.set_queue_capacity(3).unwrap();
    assert!(executor.execute(gated(&gate)).await.is_ok());
    assert_eq!(executor.queue_size(), 2);

    gate.add_permits(10);
}

#[tokio::test]
async fn test_fixed_queue_rejects_capacity_change() {
    let mut props = executor_props("fixed", 1, 2);
    props.queue_type = QueueType::ArrayBlockingQueue;
    let executor = DynamicExecutor::from_properties(&props).unwrap();

    assert!(matches!(
        executor.set_queue_capacity(50),
        Err(DtpError::CapacityMismatch { executor, .. }) if executor == "fixed"
    ));
    assert_eq!(executor.queue_capacity(), 100);
}

#[tokio::test]
async fn test_idle_workers_above_core_retire() {
    let mut props = executor_props("elastic", 1, 3);
    props.queue_capacity = 0;
    props.keep_alive_time = 100;
    props.unit = TimeUnit::Milliseconds;
    let executor = DynamicExecutor::from_properties(&props).unwrap();
    let gate = Arc::new(Semaphore::new(0));

    for _ in 0..3 {
        executor.execute(gated(&gate)).await.unwrap();
    }
    assert_eq!(executor.pool_size(), 3);

    gate.add_permits(10);
    assert!(wait_until(Duration::from_secs(3), || executor.pool_size() == 1).await);
}

#[tokio::test]
async fn test_synchronous_queue_hands_off_to_new_workers() {
    let mut props = executor_props("handoff", 0, 2);
    props.queue_type = QueueType::SynchronousQueue;
    let executor = DynamicExecutor::from_properties(&props).unwrap();
    let gate = Arc::new(Semaphore::new(0));

    executor.execute(gated(&gate)).await.unwrap();
    executor.execute(gated(&gate)).await.unwrap();
    assert!(executor.execute(gated(&gate)).await.is_err());

    gate.add_permits(10);
}

#[tokio::test]
async fn test_panicking_task_does_not_kill_worker() {
    let executor = DynamicExecutor::from_properties(&executor_props("panics", 1, 1)).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    executor.execute(async { panic!("task failure") }).await.unwrap();
    executor.execute(counting(&counter)).await.unwrap();

    assert!(wait_until(Duration::from_secs(2), || counter.load(Ordering::SeqCst) == 1).await);
    assert_eq!(executor.pool_size(), 1);
}

#[tokio::test]
async fn test_graceful_shutdown_runs_queued_tasks() {
    let mut props = executor_props("graceful", 1, 1);
    props.wait_for_tasks_to_complete_on_shutdown = true;
    props.await_termination_seconds = 5;
    let executor = DynamicExecutor::from_properties(&props).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let counter = counter.clone();
        executor
            .execute(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
    }

    executor.shutdown().await;

    assert_eq!(counter.load(Ordering::SeqCst), 5);
    assert!(executor.is_terminated());
    assert!(matches!(executor.execute(async {}).await, Err(DtpError::Shutdown(_))));
}

#[tokio::test]
async fn test_immediate_shutdown_drops_queued_tasks() {
    let executor = DynamicExecutor::from_properties(&executor_props("abrupt", 1, 1)).unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let counter = Arc::new(AtomicUsize::new(0));

    executor.execute(gated(&gate)).await.unwrap();
    for _ in 0..3 {
        executor.execute(counting(&counter)).await.unwrap();
    }

    executor.shutdown().await;
    assert_eq!(executor.queue_size(), 0);

    gate.add_permits(10);
    assert!(executor.wait_terminated(Duration::from_secs(3)).await);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}
