//! Bounded worker pool with a bounded wait queue.
//!
//! At most `workers` pipelines run at once and at most `queue_depth` more
//! wait for a slot. Anything beyond that is rejected immediately. Tickets
//! and slots release themselves on drop, so a cancelled request never leaks
//! capacity.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::types::PoolError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub workers: usize,
    pub queue_depth: usize,
    pub running: usize,
    pub queued: usize,
    pub completed: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct PoolShared {
    /// Admitted requests: running plus queued.
    in_flight: AtomicUsize,
    running: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    queue_depth: usize,
    slots: Arc<Semaphore>,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let workers = workers.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            workers,
            queue_depth,
            slots: Arc::new(Semaphore::new(workers)),
            shared: Arc::new(PoolShared::default()),
        }
    }

    /// Admit a request or reject it when running and queued slots are all taken.
    pub fn try_admit(&self) -> Result<QueueTicket, PoolError> {
        let capacity = self.workers.saturating_add(self.queue_depth);
        let admitted = self
            .shared
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            });

        if admitted.is_err() {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::CapacityExceeded {
                running: self.shared.running.load(Ordering::SeqCst),
                queued: self.shared.queued.load(Ordering::SeqCst),
            });
        }

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        Ok(QueueTicket {
            slots: self.slots.clone(),
            shared: Some(self.shared.clone()),
        })
    }

    /// Admit and wait for a worker slot.
    pub async fn acquire(&self) -> Result<WorkerSlot, PoolError> {
        self.try_admit()?.wait().await
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            workers: self.workers,
            queue_depth: self.queue_depth,
            running: self.shared.running.load(Ordering::SeqCst),
            queued: self.shared.queued.load(Ordering::SeqCst),
            completed: self.shared.completed.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }
}

/// An admitted request waiting for a worker slot.
#[derive(Debug)]
pub struct QueueTicket {
    slots: Arc<Semaphore>,
    shared: Option<Arc<PoolShared>>,
}

impl QueueTicket {
    pub async fn wait(mut self) -> Result<WorkerSlot, PoolError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let shared = self.shared.take().ok_or(PoolError::Closed)?;
        shared.queued.fetch_sub(1, Ordering::SeqCst);
        shared.running.fetch_add(1, Ordering::SeqCst);
        Ok(WorkerSlot {
            _permit: permit,
            shared,
        })
    }
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.queued.fetch_sub(1, Ordering::SeqCst);
            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// A running pipeline's hold on a worker.
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
    shared: Arc<PoolShared>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.shared.running.fetch_sub(1, Ordering::SeqCst);
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.shared.completed.fetch_add(1, Ordering::Relaxed);
    }
}
