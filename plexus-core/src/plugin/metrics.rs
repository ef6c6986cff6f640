//! Per-plugin call metrics.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Outcome of a tracked contract call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Call completed successfully
    Success,
    /// Call returned an error
    Failure,
    /// Call exceeded its timeout
    Timeout,
}

/// Atomic counters for contract calls made on one plugin.
///
/// Updated on the hot path without locking; read through
/// [`CallMetrics::snapshot`].
#[derive(Debug)]
pub struct CallMetrics {
    invocations: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    total_duration_us: AtomicU64,
    max_duration_us: AtomicU64,
    created_at: Instant,
}

impl CallMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            total_duration_us: AtomicU64::new(0),
            max_duration_us: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// Record one call.
    pub fn record(&self, outcome: CallOutcome, duration: Duration) {
        let duration_us = duration.as_micros().min(u64::MAX as u128) as u64;

        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.total_duration_us.fetch_add(duration_us, Ordering::Relaxed);
        self.max_duration_us.fetch_max(duration_us, Ordering::Relaxed);

        match outcome {
            CallOutcome::Success => {}
            CallOutcome::Failure => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
            CallOutcome::Timeout => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Total calls.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Calls that returned an error.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Calls that timed out.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Immutable snapshot.
    pub fn snapshot(&self) -> CallMetricsSnapshot {
        let invocations = self.invocations();
        let total_us = self.total_duration_us.load(Ordering::Relaxed);
        let average_latency_us = if invocations > 0 { total_us / invocations } else { 0 };
        let errors = self.failures() + self.timeouts();

        CallMetricsSnapshot {
            invocations,
            failures: self.failures(),
            timeouts: self.timeouts(),
            error_rate: if invocations > 0 {
                errors as f64 / invocations as f64
            } else {
                0.0
            },
            average_latency_us,
            max_latency_us: self.max_duration_us.load(Ordering::Relaxed),
            uptime_seconds: self.created_at.elapsed().as_secs(),
        }
    }
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`CallMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMetricsSnapshot {
    /// Total calls
    pub invocations: u64,
    /// Calls that returned an error
    pub failures: u64,
    /// Calls that timed out
    pub timeouts: u64,
    /// (failures + timeouts) / invocations
    pub error_rate: f64,
    /// Mean call latency
    pub average_latency_us: u64,
    /// Slowest call
    pub max_latency_us: u64,
    /// Seconds since the plugin was admitted
    pub uptime_seconds: u64,
}

/// Host-side and plugin-reported metrics for one plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetricsReport {
    /// Plugin id
    pub plugin_id: String,
    /// Host-side call counters
    pub calls: CallMetricsSnapshot,
    /// Lifecycle transitions made so far
    pub transitions: u64,
    /// Metrics reported by the plugin
    pub reported: HashMap<String, f64>,
}
