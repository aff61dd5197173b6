//! NotificationDispatcher - hands notices to channels off the caller's path
//!
//! A bounded mpsc queue feeds one dedicated worker task. `dispatch` never
//! waits: when the backlog is full the new notice is dropped (drop-newest),
//! logged and counted. Delivery failures are logged inside the worker and
//! never reach the caller.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use dtp_common::NotifyPlatform;

use crate::notification::{channel_for, NotificationChannel, Notice};

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type Channels = Arc<Vec<Arc<dyn NotificationChannel>>>;

/// Result of handing a notice to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Queued for delivery
    Scheduled,
    /// Backlog full or dispatcher stopped; the notice was discarded
    Dropped,
}

pub struct NotificationDispatcher {
    tx: RwLock<Option<mpsc::Sender<Notice>>>,
    channels: Arc<RwLock<Channels>>,
    /// Channels follow the configured platforms; false when injected directly
    managed: bool,
    platforms: Mutex<Vec<NotifyPlatform>>,
    backlog_capacity: usize,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    /// Dispatcher whose channels are built from configured platforms and
    /// rebuilt by `sync_platforms` when they change. Spawns the worker task.
    pub fn from_platforms(platforms: &[NotifyPlatform], backlog_capacity: usize) -> Self {
        let channels = build_channels(platforms);
        let mut dispatcher = Self::spawn(channels, backlog_capacity, true);
        dispatcher.platforms = Mutex::new(platforms.to_vec());
        dispatcher
    }

    /// Dispatcher with a fixed set of channels. Spawns the worker task.
    pub fn with_channels(channels: Vec<Arc<dyn NotificationChannel>>, backlog_capacity: usize) -> Self {
        Self::spawn(channels, backlog_capacity, false)
    }

    fn spawn(channels: Vec<Arc<dyn NotificationChannel>>, backlog_capacity: usize, managed: bool) -> Self {
        let backlog_capacity = backlog_capacity.max(1);
        let (tx, rx) = mpsc::channel(backlog_capacity);
        let channels = Arc::new(RwLock::new(Arc::new(channels)));

        let worker = tokio::spawn(run_worker(rx, Arc::clone(&channels)));

        info!(
            backlog_capacity = backlog_capacity,
            channels = channels.read().len(),
            "NotificationDispatcher started"
        );

        Self {
            tx: RwLock::new(Some(tx)),
            channels,
            managed,
            platforms: Mutex::new(Vec::new()),
            backlog_capacity,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a notice without waiting
    pub fn dispatch(&self, notice: Notice) -> Dispatch {
        let executor = notice.executor().to_string();
        let kind = notice.kind();

        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            warn!(executor = %executor, kind = %kind, "Dispatcher stopped, dropping notification");
            metrics::counter!("dtp_notifications_total", "result" => "dropped").increment(1);
            return Dispatch::Dropped;
        };

        match tx.try_send(notice) {
            Ok(()) => {
                debug!(executor = %executor, kind = %kind, "Notification scheduled");
                metrics::counter!("dtp_notifications_total", "result" => "scheduled").increment(1);
                Dispatch::Scheduled
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    executor = %executor,
                    kind = %kind,
                    backlog_capacity = self.backlog_capacity,
                    "Notification backlog full, dropping notification"
                );
                metrics::counter!("dtp_notifications_total", "result" => "dropped").increment(1);
                Dispatch::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                warn!(executor = %executor, kind = %kind, "Dispatcher worker gone, dropping notification");
                metrics::counter!("dtp_notifications_total", "result" => "dropped").increment(1);
                Dispatch::Dropped
            }
        }
    }

    /// Rebuild channels when the configured platforms changed.
    /// No effect on a dispatcher created with fixed channels.
    pub fn sync_platforms(&self, platforms: &[NotifyPlatform]) {
        if !self.managed {
            return;
        }
        let mut current = self.platforms.lock();
        if current.as_slice() == platforms {
            return;
        }
        *self.channels.write() = Arc::new(build_channels(platforms));
        *current = platforms.to_vec();
        info!(platforms = platforms.len(), "Notification channels rebuilt");
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Notices waiting in the backlog, not counting one being delivered
    pub fn pending(&self) -> usize {
        self.tx
            .read()
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// Stop accepting notices and give the worker a bounded time to deliver
    /// what is already queued.
    pub async fn shutdown(&self) {
        drop(self.tx.write().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            match tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, worker).await {
                Ok(_) => info!("NotificationDispatcher stopped"),
                Err(_) => warn!("NotificationDispatcher did not drain before timeout"),
            }
        }
    }
}

fn build_channels(platforms: &[NotifyPlatform]) -> Vec<Arc<dyn NotificationChannel>> {
    platforms
        .iter()
        .filter_map(channel_for)
        .map(Arc::from)
        .collect()
}

async fn run_worker(mut rx: mpsc::Receiver<Notice>, channels: Arc<RwLock<Channels>>) {
    while let Some(notice) = rx.recv().await {
        let current = Arc::clone(&*channels.read());
        deliver(&current, &notice).await;
    }
    debug!("Notification worker exiting");
}

async fn deliver(channels: &[Arc<dyn NotificationChannel>], notice: &Notice) {
    let targets: Vec<&Arc<dyn NotificationChannel>> = channels
        .iter()
        .filter(|c| {
            notice
                .platforms()
                .iter()
                .any(|p| p.eq_ignore_ascii_case(c.platform()))
        })
        .collect();

    if targets.is_empty() {
        debug!(
            executor = %notice.executor(),
            kind = %notice.kind(),
            "No channel matches notification platforms"
        );
        return;
    }

    for channel in targets {
        let result = match notice {
            Notice::Change(n) => channel.send_change(n).await,
            Notice::Alarm(n) => channel.send_alarm(n).await,
        };
        match result {
            Ok(()) => {
                metrics::counter!("dtp_notifications_total", "result" => "delivered").increment(1);
            }
            Err(e) => {
                error!(
                    executor = %notice.executor(),
                    kind = %notice.kind(),
                    platform = %channel.platform(),
                    error = %e,
                    "Notification delivery failed"
                );
                metrics::counter!("dtp_notifications_total", "result" => "failed").increment(1);
            }
        }
    }
}
