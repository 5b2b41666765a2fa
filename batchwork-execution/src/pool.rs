//! Bounded worker pool
//!
//! Submissions first get a fresh worker until `core_pool_size` workers exist,
//! then wait in a bounded queue, and only when the queue is full does the
//! pool grow towards `max_pool_size`. Past that the rejection policy decides
//! whether the caller waits or gets [`PoolError::Saturated`]. Workers above
//! the core size retire after `keep_alive` without work.

use batchwork_config::{ExecutionConfig, RejectionPolicy};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::error::PoolError;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Sizing and saturation behaviour of a [`WorkerPool`]
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub queue_capacity: usize,
    pub keep_alive: Duration,
    pub rejection_policy: RejectionPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for WorkerPoolConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            core_pool_size: config.core_pool_size.max(1),
            max_pool_size: config.max_pool_size.max(config.core_pool_size).max(1),
            queue_capacity: config.queue_capacity.max(1),
            keep_alive: config.keep_alive,
            rejection_policy: config.rejection_policy,
        }
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub active: usize,
    pub queued: usize,
    pub completed: u64,
    pub peak_active: usize,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Task>,
    workers: usize,
    active: usize,
    completed: u64,
    peak_active: usize,
    next_worker_id: usize,
    shutdown: bool,
}

struct PoolInner {
    config: WorkerPoolConfig,
    state: Mutex<PoolState>,
    task_available: Notify,
    space_available: Notify,
    terminated: Notify,
}

/// Shuts the pool down once the last [`WorkerPool`] handle is gone.
/// Workers hold only [`PoolInner`], so they never keep this alive.
struct ShutdownOnDrop(Arc<PoolInner>);

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

/// Runs submitted futures on a bounded set of tokio tasks.
///
/// Cloning shares the pool. Dropping the last clone shuts it down; queued
/// work still runs and idle workers exit.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    _shutdown_guard: Arc<ShutdownOnDrop>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        info!(
            core = config.core_pool_size,
            max = config.max_pool_size,
            queue = config.queue_capacity,
            policy = %config.rejection_policy,
            "Creating worker pool"
        );
        let inner = Arc::new(PoolInner {
            config,
            state: Mutex::new(PoolState::default()),
            task_available: Notify::new(),
            space_available: Notify::new(),
            terminated: Notify::new(),
        });
        Self {
            _shutdown_guard: Arc::new(ShutdownOnDrop(inner.clone())),
            inner,
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.inner.config
    }

    /// Hand a future to the pool.
    ///
    /// Returns once the future is queued or owned by a worker; it does not
    /// wait for the future to finish. Must be called from within a tokio
    /// runtime.
    pub async fn submit<F>(&self, future: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut task: Task = Box::pin(future);
        loop {
            let space = self.inner.space_available.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.try_submit(task) {
                Ok(()) => return Ok(()),
                Err((returned, error)) => match (error, self.inner.config.rejection_policy) {
                    (PoolError::Saturated { .. }, RejectionPolicy::Block) => {
                        debug!("Worker pool saturated, waiting for queue room");
                        task = returned;
                    }
                    (error, _) => return Err(error),
                },
            }

            space.await;
        }
    }

    fn try_submit(&self, task: Task) -> Result<(), (Task, PoolError)> {
        let config = &self.inner.config;
        let mut state = self.inner.state.lock();
        if state.shutdown {
            return Err((task, PoolError::ShutDown));
        }

        if state.workers < config.core_pool_size {
            self.spawn_worker(&mut state, task);
            return Ok(());
        }

        if state.queue.len() < config.queue_capacity {
            state.queue.push_back(task);
            drop(state);
            self.inner.task_available.notify_one();
            return Ok(());
        }

        if state.workers < config.max_pool_size {
            self.spawn_worker(&mut state, task);
            return Ok(());
        }

        let error = PoolError::Saturated {
            workers: state.workers,
            queued: state.queue.len(),
        };
        Err((task, error))
    }

    fn spawn_worker(&self, state: &mut PoolState, first: Task) {
        state.workers += 1;
        state.next_worker_id += 1;
        let worker_id = state.next_worker_id;
        debug!(worker_id, workers = state.workers, "Starting worker");
        tokio::spawn(worker_loop(self.inner.clone(), worker_id, first));
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            workers: state.workers,
            active: state.active,
            queued: state.queue.len(),
            completed: state.completed,
            peak_active: state.peak_active,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Stop accepting submissions; queued work still runs
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Wait until every worker has exited after [`shutdown`](Self::shutdown)
    pub async fn await_termination(&self) {
        loop {
            let terminated = self.inner.terminated.notified();
            tokio::pin!(terminated);
            terminated.as_mut().enable();
            {
                let state = self.inner.state.lock();
                if state.shutdown && state.workers == 0 {
                    return;
                }
            }
            terminated.await;
        }
    }
}

impl PoolInner {
    fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        info!(queued = state.queue.len(), "Worker pool shutting down");
        drop(state);
        self.task_available.notify_waiters();
        self.space_available.notify_waiters();
    }

    /// Next queued task, or `None` when this worker should exit
    async fn next_task(&self, worker_id: usize) -> Option<Task> {
        let mut idle_expired = false;
        loop {
            let available = self.task_available.notified();
            tokio::pin!(available);
            available.as_mut().enable();

            let may_retire = {
                let mut state = self.state.lock();
                if let Some(task) = state.queue.pop_front() {
                    drop(state);
                    self.space_available.notify_one();
                    return Some(task);
                }
                let above_core = state.workers > self.config.core_pool_size;
                if state.shutdown || (above_core && idle_expired) {
                    self.retire(&mut state, worker_id);
                    return None;
                }
                above_core
            };

            if may_retire {
                idle_expired = tokio::time::timeout(self.config.keep_alive, available)
                    .await
                    .is_err();
            } else {
                available.await;
            }
        }
    }

    fn retire(&self, state: &mut PoolState, worker_id: usize) {
        state.workers -= 1;
        debug!(worker_id, workers = state.workers, "Worker exiting");
        if state.workers == 0 && state.shutdown {
            self.terminated.notify_waiters();
        }
    }
}

async fn worker_loop(inner: Arc<PoolInner>, worker_id: usize, first: Task) {
    let mut next = Some(first);
    loop {
        let task = match next.take() {
            Some(task) => task,
            None => match inner.next_task(worker_id).await {
                Some(task) => task,
                None => return,
            },
        };

        {
            let mut state = inner.state.lock();
            state.active += 1;
            state.peak_active = state.peak_active.max(state.active);
        }

        if AssertUnwindSafe(task).catch_unwind().await.is_err() {
            error!(worker_id, "Task panicked on worker");
        }

        let mut state = inner.state.lock();
        state.active -= 1;
        state.completed += 1;
    }
}
