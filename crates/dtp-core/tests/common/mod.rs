//! Shared fixtures for dtp-core integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use dtp_common::{DtpProperties, ExecutorProperties, NotifyPlatform, QueueType};
use dtp_core::{
    AlarmLimiter, AlarmNotice, ChangeNotice, DynamicExecutor, ExecutorRegistry, NotificationChannel,
    NotificationDispatcher, Refresher,
};

/// Channel that records every notice it receives
pub struct RecordingChannel {
    platform: String,
    changes: parking_lot::Mutex<Vec<ChangeNotice>>,
    alarms: parking_lot::Mutex<Vec<AlarmNotice>>,
}

impl RecordingChannel {
    pub fn new(platform: &str) -> Self {
        Self {
            platform: platform.to_string(),
            changes: parking_lot::Mutex::new(Vec::new()),
            alarms: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn changes(&self) -> Vec<ChangeNotice> {
        self.changes.lock().clone()
    }

    pub fn alarms(&self) -> Vec<AlarmNotice> {
        self.alarms.lock().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn send_change(&self, notice: &ChangeNotice) -> dtp_core::Result<()> {
        self.changes.lock().push(notice.clone());
        Ok(())
    }

    async fn send_alarm(&self, notice: &AlarmNotice) -> dtp_core::Result<()> {
        self.alarms.lock().push(notice.clone());
        Ok(())
    }
}

pub struct Harness {
    pub registry: Arc<ExecutorRegistry>,
    pub limiter: Arc<AlarmLimiter>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub channel: Arc<RecordingChannel>,
    pub refresher: Refresher,
}

/// Registry, limiter and a dispatcher delivering to one recording "log" channel.
/// Must be called inside a tokio runtime.
pub fn harness() -> Harness {
    let registry = Arc::new(ExecutorRegistry::new());
    let limiter = Arc::new(AlarmLimiter::new());
    let channel = Arc::new(RecordingChannel::new("log"));
    let as_channel: Arc<dyn NotificationChannel> = channel.clone();
    let dispatcher = Arc::new(NotificationDispatcher::with_channels(vec![as_channel], 64));
    let refresher = Refresher::new(registry.clone(), limiter.clone(), dispatcher.clone());

    Harness {
        registry,
        limiter,
        dispatcher,
        channel,
        refresher,
    }
}

pub fn log_platform() -> NotifyPlatform {
    NotifyPlatform {
        platform: "log".to_string(),
        webhook_url: None,
        receivers: vec![],
    }
}

pub fn executor_props(name: &str, core: i64, max: i64) -> ExecutorProperties {
    ExecutorProperties {
        thread_pool_name: name.to_string(),
        core_pool_size: core,
        maximum_pool_size: max,
        queue_capacity: 100,
        queue_type: QueueType::VariableLinkedBlockingQueue,
        ..Default::default()
    }
}

pub fn register(registry: &ExecutorRegistry, props: &ExecutorProperties) -> Arc<DynamicExecutor> {
    let executor = DynamicExecutor::from_properties(props).unwrap();
    registry.register(executor.clone(), "test");
    executor
}

/// A batch with the "log" platform configured
pub fn batch(executors: Vec<ExecutorProperties>) -> DtpProperties {
    DtpProperties {
        enabled: true,
        platforms: vec![log_platform()],
        executors,
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
