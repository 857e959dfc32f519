//! Thread-pool bulkhead for offloaded work
//!
//! A bounded pool of OS threads with the classic executor admission order:
//!
//! 1. fewer than `core_pool_size` workers: start a worker for the task
//! 2. otherwise queue the task if the queue has room
//! 3. otherwise start an extra worker while below `max_pool_size`
//! 4. otherwise reject with [`ResilienceError::BulkheadFull`]
//!
//! Workers above the core size exit after `keep_alive` without work. Results
//! travel back through a tokio oneshot, so async callers await a
//! [`PoolHandle`] without tying up a runtime thread and sync callers can
//! block on it.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Sizing of a [`ThreadPoolBulkhead`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPoolConfig {
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub queue_capacity: usize,
    /// Idle time after which a non-core worker exits
    pub keep_alive: Duration,
    /// Worker thread name prefix
    pub thread_name: String,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 4,
            max_pool_size: 8,
            queue_capacity: 50,
            keep_alive: Duration::from_secs(60),
            thread_name: "relaygate-bulkhead".to_string(),
        }
    }
}

impl ThreadPoolConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::invalid("max_pool_size must be greater than 0"));
        }
        if self.core_pool_size > self.max_pool_size {
            return Err(ConfigError::invalid("core_pool_size must not exceed max_pool_size"));
        }
        Ok(())
    }
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ThreadPoolMetrics {
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    /// Live worker threads
    pub pool_size: usize,
    /// Workers currently running a task
    pub active_count: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub remaining_queue_capacity: usize,
    pub completed_tasks: u64,
    pub rejected_tasks: u64,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    workers: usize,
    active: usize,
    next_worker_id: u64,
    completed: u64,
    rejected: u64,
    shutdown: bool,
}

struct Shared {
    config: ThreadPoolConfig,
    state: Mutex<PoolState>,
    work_ready: Condvar,
}

/// Result of a task submitted to a [`ThreadPoolBulkhead`]
///
/// Await it from async code or call [`PoolHandle::wait`] from a plain thread.
#[must_use = "the task result is lost if the handle is dropped"]
pub struct PoolHandle<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> PoolHandle<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Block the current thread until the task finishes
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> ResilienceResult<T, E> {
        Self::settle(self.rx.blocking_recv())
    }

    fn settle(received: Result<Result<T, E>, oneshot::error::RecvError>) -> ResilienceResult<T, E> {
        match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(ResilienceError::OperationFailed { source }),
            Err(_) => Err(ResilienceError::TaskAborted),
        }
    }
}

impl<T, E> Future for PoolHandle<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    type Output = ResilienceResult<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Self::settle)
    }
}

impl<T, E> fmt::Debug for PoolHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle").finish_non_exhaustive()
    }
}

/// Bounded thread pool that rejects instead of growing without limit
///
/// Dropping the pool stops accepting work; queued tasks still run and the
/// workers exit once the queue is empty.
pub struct ThreadPoolBulkhead {
    shared: Arc<Shared>,
}

impl ThreadPoolBulkhead {
    pub fn new(config: ThreadPoolConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(PoolState::default()),
                work_ready: Condvar::new(),
            }),
        })
    }

    pub fn config(&self) -> &ThreadPoolConfig {
        &self.shared.config
    }

    /// Submit a task, returning a handle to its result
    ///
    /// Fails immediately with `BulkheadFull` when workers and queue are
    /// saturated.
    pub fn submit<F, T, E>(&self, task: F) -> ResilienceResult<PoolHandle<T, E>, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // Receiver may have been dropped; nothing to deliver to then
            let _ = tx.send(task());
        });

        if self.dispatch(job) {
            Ok(PoolHandle { rx })
        } else {
            Err(ResilienceError::BulkheadFull {
                capacity: self.shared.config.max_pool_size,
                waited: Duration::ZERO,
            })
        }
    }

    /// Submit a task and await its result
    pub async fn execute<F, T, E>(&self, task: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.submit(task)?.await
    }

    pub fn metrics(&self) -> ThreadPoolMetrics {
        let config = &self.shared.config;
        let state = self.shared.state.lock();
        ThreadPoolMetrics {
            core_pool_size: config.core_pool_size,
            max_pool_size: config.max_pool_size,
            pool_size: state.workers,
            active_count: state.active,
            queue_depth: state.queue.len(),
            queue_capacity: config.queue_capacity,
            remaining_queue_capacity: config.queue_capacity.saturating_sub(state.queue.len()),
            completed_tasks: state.completed,
            rejected_tasks: state.rejected,
        }
    }

    /// Stop accepting tasks; workers drain the queue and exit
    pub fn shutdown(&self) {
        self.shared.state.lock().shutdown = true;
        self.shared.work_ready.notify_all();
    }

    fn dispatch(&self, job: Job) -> bool {
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();

        if state.shutdown {
            state.rejected += 1;
            return false;
        }
        if state.workers < config.core_pool_size {
            return self.spawn_worker(&mut state, job);
        }
        if state.queue.len() < config.queue_capacity {
            if state.workers == 0 {
                // Queued work needs at least one worker to drain it
                return self.spawn_worker(&mut state, job);
            }
            state.queue.push_back(job);
            drop(state);
            self.shared.work_ready.notify_one();
            return true;
        }
        if state.workers < config.max_pool_size {
            return self.spawn_worker(&mut state, job);
        }

        state.rejected += 1;
        warn!(
            pool = %config.thread_name,
            workers = state.workers,
            queued = state.queue.len(),
            "Thread pool bulkhead saturated, rejecting task"
        );
        false
    }

    fn spawn_worker(&self, state: &mut PoolState, first: Job) -> bool {
        let id = state.next_worker_id;
        state.next_worker_id += 1;
        state.workers += 1;
        state.active += 1;

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-{id}", self.shared.config.thread_name))
            .spawn(move || worker_loop(&shared, first));

        match spawned {
            Ok(_) => {
                debug!(pool = %self.shared.config.thread_name, worker = id, "Started worker");
                true
            }
            Err(e) => {
                error!(pool = %self.shared.config.thread_name, error = %e, "Failed to start worker");
                state.workers -= 1;
                state.active -= 1;
                state.rejected += 1;
                false
            }
        }
    }
}

impl Drop for ThreadPoolBulkhead {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPoolBulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolBulkhead").field("config", &self.shared.config).finish()
    }
}

fn worker_loop(shared: &Shared, first: Job) {
    run_job(first);
    let mut state = shared.state.lock();
    state.active -= 1;
    state.completed += 1;

    loop {
        if let Some(job) = state.queue.pop_front() {
            state.active += 1;
            drop(state);
            run_job(job);
            state = shared.state.lock();
            state.active -= 1;
            state.completed += 1;
            continue;
        }
        if state.shutdown {
            break;
        }
        if state.workers > shared.config.core_pool_size {
            let timed_out =
                shared.work_ready.wait_for(&mut state, shared.config.keep_alive).timed_out();
            if timed_out && state.queue.is_empty() && state.workers > shared.config.core_pool_size
            {
                break;
            }
        } else {
            shared.work_ready.wait(&mut state);
        }
    }

    state.workers -= 1;
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Offloaded task panicked");
    }
}
