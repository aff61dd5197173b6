//! WorkQueue - the executor's backing task queue
//!
//! All queue types share one implementation; the `QueueType` tag decides
//! which operations are allowed:
//! - Only `VariableLinkedBlockingQueue` accepts a live capacity change
//! - `SynchronousQueue` holds no items of its own; an offer succeeds only
//!   while a worker is parked waiting for work

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use dtp_common::QueueType;

use crate::error::DtpError;

/// A unit of work run by an executor worker
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkQueue {
    queue_type: QueueType,
    items: Mutex<VecDeque<Task>>,
    capacity: AtomicUsize,
    /// Workers currently parked in `take`
    waiting: AtomicUsize,
    available: Notify,
}

impl WorkQueue {
    pub fn new(queue_type: QueueType, capacity: usize) -> Self {
        let capacity = match queue_type {
            QueueType::SynchronousQueue => 0,
            _ => capacity,
        };
        Self {
            queue_type,
            items: Mutex::new(VecDeque::new()),
            capacity: AtomicUsize::new(capacity),
            waiting: AtomicUsize::new(0),
            available: Notify::new(),
        }
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }

    /// Change the capacity of a resizable queue.
    ///
    /// Shrinking below the current length keeps every queued task; new offers
    /// fail until the queue drains below the new capacity.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), DtpError> {
        if !self.queue_type.is_resizable() {
            return Err(DtpError::CapacityMismatch {
                executor: String::new(),
                queue_type: self.queue_type.to_string(),
            });
        }
        self.capacity.store(capacity, Ordering::SeqCst);
        Ok(())
    }

    /// Try to enqueue; hands the task back when there is no room.
    pub fn offer(&self, task: Task) -> Result<(), Task> {
        {
            let mut items = self.items.lock();
            let limit = match self.queue_type {
                QueueType::SynchronousQueue => self.waiting.load(Ordering::SeqCst),
                _ => self.capacity(),
            };
            if items.len() >= limit {
                return Err(task);
            }
            items.push_back(task);
        }
        self.available.notify_one();
        Ok(())
    }

    pub fn poll(&self) -> Option<Task> {
        self.items.lock().pop_front()
    }

    /// Wait for a task for up to `timeout` (forever when `None`).
    ///
    /// Returns `None` on timeout or when woken by `wake_all` without work;
    /// callers re-check their own state and decide whether to wait again.
    pub async fn take(&self, timeout: Option<Duration>) -> Option<Task> {
        if let Some(task) = self.poll() {
            return Some(task);
        }

        let notified = self.available.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        self.waiting.fetch_add(1, Ordering::SeqCst);
        // Re-check after registering so an offer between poll and enable is not missed
        let task = match self.poll() {
            Some(task) => Some(task),
            None => {
                match timeout {
                    Some(limit) => {
                        let _ = tokio::time::timeout(limit, notified).await;
                    }
                    None => notified.await,
                }
                self.poll()
            }
        };
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        task
    }

    /// Wake every parked worker, e.g. on shutdown or a size change
    pub fn wake_all(&self) {
        self.available.notify_waiters();
    }

    /// Remove and return every queued task
    pub fn drain(&self) -> Vec<Task> {
        self.items.lock().drain(..).collect()
    }
}
