//! Bounded worker pool.

use crate::runtime::{RuntimeError, RuntimeResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Pool execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Tasks accepted
    pub tasks_spawned: u64,
    /// Tasks that ran to completion
    pub tasks_executed: u64,
    /// Total execution time
    pub total_execution_time: Duration,
    /// Average execution time
    pub avg_execution_time: Duration,
    /// Tasks currently holding a slot
    pub active_tasks: usize,
    /// Highest observed `active_tasks`
    pub peak_active_tasks: usize,
}

/// Runs futures on tokio tasks, at most `max_concurrent` at a time.
///
/// Spawned tasks are detached from the caller: dropping the returned handle
/// does not cancel the work.
///
/// ```rust
/// use plexus_core::runtime::WorkerPool;
///
/// # tokio_test::block_on(async {
/// let pool = WorkerPool::new(4);
/// let answer = pool.run(async { 6 * 7 }).await.unwrap();
/// assert_eq!(answer, 42);
/// assert_eq!(pool.stats().tasks_executed, 1);
/// # });
/// ```
#[derive(Debug)]
pub struct WorkerPool {
    max_concurrent: usize,
    permits: Arc<Semaphore>,
    stats: Arc<Mutex<PoolStats>>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Create a pool with `max_concurrent` slots.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            stats: Arc::new(Mutex::new(PoolStats::default())),
            is_running: AtomicBool::new(true),
        }
    }

    /// Number of slots.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Free slots right now.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Whether new work is accepted.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Spawn `future`; it starts once a slot is free.
    pub fn spawn<F, T>(&self, future: F) -> RuntimeResult<JoinHandle<RuntimeResult<T>>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.is_running() {
            return Err(RuntimeError::NotRunning);
        }

        let permits = Arc::clone(&self.permits);
        let stats = Arc::clone(&self.stats);
        stats.lock().tasks_spawned += 1;

        Ok(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|_| RuntimeError::NotRunning)?;
            {
                let mut stats = stats.lock();
                stats.active_tasks += 1;
                stats.peak_active_tasks = stats.peak_active_tasks.max(stats.active_tasks);
            }

            let started = Instant::now();
            let output = future.await;
            let elapsed = started.elapsed();

            let mut stats = stats.lock();
            stats.active_tasks = stats.active_tasks.saturating_sub(1);
            stats.tasks_executed += 1;
            stats.total_execution_time += elapsed;
            stats.avg_execution_time = stats.total_execution_time / stats.tasks_executed.min(u32::MAX as u64) as u32;
            Ok(output)
        }))
    }

    /// Spawn `future` and wait for its output.
    pub async fn run<F, T>(&self, future: F) -> RuntimeResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match self.spawn(future)?.await {
            Ok(output) => output,
            Err(e) => Err(RuntimeError::TaskFailed { reason: e.to_string() }),
        }
    }

    /// Stop accepting work; queued tasks that have not started fail with
    /// `NotRunning`.
    pub fn close(&self) {
        if self.is_running.swap(false, Ordering::AcqRel) {
            self.permits.close();
            tracing::debug!("Worker pool closed");
        }
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        self.stats.lock().clone()
    }
}
