//! Bounded hand-off worker pool.
//!
//! Tasks run on the blocking threads of a dedicated tokio runtime. A task is
//! admitted only if a worker slot is free right now; otherwise it is refused,
//! the refusal is logged with a snapshot of the pool and the caller retries on
//! a later tick. Nothing is queued inside the pool.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::ConnectorConfig;
use crate::connector::Side;
use crate::error::Result;

/// Counters of a [`WorkerPool`] at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Tasks waiting for a worker, always zero for a hand-off pool
    pub queued: usize,
    pub active: usize,
    pub completed: u64,
    /// Tasks ever admitted
    pub scheduled: u64,
    pub rejected: u64,
    pub min_threads: usize,
    pub max_threads: usize,
    /// Highest number of simultaneously active tasks
    pub largest: usize,
}

/// A reserved worker. Dropping it without spawning frees the worker again.
pub struct Slot {
    permit: OwnedSemaphorePermit,
}

struct Counters {
    active: AtomicUsize,
    largest: AtomicUsize,
    completed: AtomicU64,
    scheduled: AtomicU64,
    rejected: AtomicU64,
}

/// Updates the counters when a task returns or panics.
struct TaskDone {
    counters: Arc<Counters>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for TaskDone {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::AcqRel);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct WorkerPool {
    side: Side,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    permits: Arc<Semaphore>,
    min_threads: usize,
    max_threads: usize,
    shutdown: AtomicBool,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(side: Side, config: &ConnectorConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.min_threads.max(1))
            .max_blocking_threads(config.max_threads)
            .thread_keep_alive(config.thread_max_idle_time())
            .thread_name("conduit-worker")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        debug!(
            side = %side,
            min = config.min_threads,
            max = config.max_threads,
            "Worker pool started"
        );

        Ok(Self {
            side,
            runtime: Mutex::new(Some(runtime)),
            handle,
            permits: Arc::new(Semaphore::new(config.max_threads)),
            min_threads: config.min_threads,
            max_threads: config.max_threads,
            shutdown: AtomicBool::new(false),
            counters: Arc::new(Counters {
                active: AtomicUsize::new(0),
                largest: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                scheduled: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Reserves a worker if one is free right now.
    ///
    /// A refusal is logged with the pool counters. After shutdown, every
    /// reservation is refused quietly.
    pub fn try_reserve(&self, task: &str) -> Option<Slot> {
        if self.is_shutdown() {
            debug!(side = %self.side, task, "Worker pool shut down, task not accepted");
            return None;
        }

        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Some(Slot { permit }),
            Err(_) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                let snapshot = self.snapshot();
                warn!(side = %self.side, task, "Unable to execute task, no worker available");
                warn!(
                    side = %self.side,
                    queued = snapshot.queued,
                    active = snapshot.active,
                    completed = snapshot.completed,
                    scheduled = snapshot.scheduled,
                    rejected = snapshot.rejected,
                    min = snapshot.min_threads,
                    max = snapshot.max_threads,
                    largest = snapshot.largest,
                    "Worker pool state"
                );
                None
            }
        }
    }

    /// Runs `task` on the reserved worker.
    pub fn spawn<F>(&self, slot: Slot, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let counters = Arc::clone(&self.counters);
        let active = counters.active.fetch_add(1, Ordering::AcqRel) + 1;
        counters.largest.fetch_max(active, Ordering::AcqRel);
        counters.scheduled.fetch_add(1, Ordering::Relaxed);

        self.handle.spawn_blocking(move || {
            let _done = TaskDone {
                counters,
                _permit: slot.permit,
            };
            task();
        });
    }

    /// Reserves a worker and runs `task` on it. Returns false when refused.
    pub fn execute<F>(&self, name: &str, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.try_reserve(name) {
            Some(slot) => {
                self.spawn(slot, task);
                true
            }
            None => false,
        }
    }

    /// Indicates if every worker is busy.
    pub fn is_full(&self) -> bool {
        self.permits.available_permits() == 0
    }

    pub fn active_count(&self) -> usize {
        self.counters.active.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            queued: 0,
            active: self.counters.active.load(Ordering::Acquire),
            completed: self.counters.completed.load(Ordering::Relaxed),
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            min_threads: self.min_threads,
            max_threads: self.max_threads,
            largest: self.counters.largest.load(Ordering::Acquire),
        }
    }

    /// Stops accepting tasks. Running tasks carry on.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Waits until every running task returned. Returns false on timeout.
    ///
    /// Must not be called from within the pool's runtime.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let permits = Arc::clone(&self.permits);
        let max = u32::try_from(self.max_threads).unwrap_or(u32::MAX);

        self.handle.block_on(async move {
            matches!(
                tokio::time::timeout(timeout, permits.acquire_many_owned(max)).await,
                Ok(Ok(_))
            )
        })
    }

    /// Runs a future to completion on the pool's runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Tears the runtime down, waiting at most `timeout` for its threads.
    pub fn shutdown_runtime(&self, timeout: Duration) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_timeout(timeout);
        }
    }

    /// Tears the runtime down without waiting.
    pub fn shutdown_background(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which is not allowed inside another one
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}
