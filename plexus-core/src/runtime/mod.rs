//! Task execution for plugin work.
//!
//! Lifecycle operations run on a bounded [`WorkerPool`] so callers never
//! block on plugin code. Contract calls go through [`PluginExecutor`], which
//! races each call against a host-side timeout on its own task.
//!
//! ```text
//! caller ──submit──► WorkerPool (semaphore-bounded tokio tasks)
//!                        │
//!                        └──► PluginExecutor::call ──spawn──► contract call
//!                                   │                             │
//!                                   └──── timeout / abort ◄───────┘
//! ```

pub mod executor;
pub mod pool;

pub use executor::{CallFailure, ExecutionOutcome, PluginExecutor};
pub use pool::{PoolStats, WorkerPool};

use crate::plugin::error::PluginError;
use thiserror::Error;

/// Worker pool errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The pool was closed
    #[error("Worker pool is not running")]
    NotRunning,

    /// A pooled task panicked or was cancelled
    #[error("Worker task failed: {reason}")]
    TaskFailed {
        /// Join failure
        reason: String,
    },
}

/// Common result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl From<RuntimeError> for PluginError {
    fn from(error: RuntimeError) -> Self {
        PluginError::internal("worker_pool", error.to_string())
    }
}
