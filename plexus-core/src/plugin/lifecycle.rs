//! Plugin lifecycle state machine.
//!
//! States are plain values; the legal edges live in [`allowed_transitions`],
//! a pure lookup table that the tracker consults before every change.
//!
//! ```text
//! Unloaded -> Loading -> Loaded -> Initializing -> Initialized -> Starting -> Running
//!                |          |           |               |             |          |
//!                v          |           v               v             v          v
//!              Error        |         Error          Stopping       Error   Paused | Debug
//!                           v                           |                   Updating | Stopping
//!                       Unloading <------------------ Stopped
//!                           |
//!                           v
//!                       Unloaded
//! ```

use crate::plugin::error::{LifecycleError, LifecycleResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Number of transitions kept per plugin for inspection.
const TRANSITION_HISTORY_LIMIT: usize = 64;

/// Lifecycle state of a loaded plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PluginState {
    /// Not loaded (initial state)
    #[default]
    Unloaded,
    /// Artifact is being loaded
    Loading,
    /// Instance exists but has not been initialized
    Loaded,
    /// `initialize` in progress
    Initializing,
    /// Initialized and ready to start
    Initialized,
    /// `start` in progress
    Starting,
    /// Active
    Running,
    /// Suspended while keeping its state
    Paused,
    /// `stop` in progress
    Stopping,
    /// Stopped, may be started again
    Stopped,
    /// `destroy` in progress
    Unloading,
    /// A contract call failed
    Error,
    /// Being replaced by a new version
    Updating,
    /// Running under diagnostics
    Debug,
}

/// Legal successor states of `state`.
pub fn allowed_transitions(state: PluginState) -> &'static [PluginState] {
    use PluginState::*;

    match state {
        Unloaded => &[Loading],
        Loading => &[Loaded, Error],
        Loaded => &[Initializing, Unloading],
        Initializing => &[Initialized, Error],
        Initialized => &[Starting, Stopping],
        Starting => &[Running, Error],
        Running => &[Paused, Stopping, Updating, Debug, Error],
        Paused => &[Running, Stopping],
        Stopping => &[Stopped, Error],
        Stopped => &[Starting, Unloading],
        Unloading => &[Unloaded, Error],
        Error => &[Stopping, Unloading],
        Updating => &[Running, Error],
        Debug => &[Running, Paused, Stopping],
    }
}

impl PluginState {
    /// Every state.
    pub const ALL: [PluginState; 14] = [
        PluginState::Unloaded,
        PluginState::Loading,
        PluginState::Loaded,
        PluginState::Initializing,
        PluginState::Initialized,
        PluginState::Starting,
        PluginState::Running,
        PluginState::Paused,
        PluginState::Stopping,
        PluginState::Stopped,
        PluginState::Unloading,
        PluginState::Error,
        PluginState::Updating,
        PluginState::Debug,
    ];

    /// Check if a transition to `target` is legal.
    pub fn can_transition_to(&self, target: PluginState) -> bool {
        allowed_transitions(*self).contains(&target)
    }

    /// In-flight asynchronous work.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Self::Loading
                | Self::Initializing
                | Self::Starting
                | Self::Stopping
                | Self::Unloading
                | Self::Updating
        )
    }

    /// Plugin is consuming resources.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Debug)
    }

    /// Safe rest point.
    pub fn is_stable(&self) -> bool {
        !self.is_transitional()
    }

    /// Whether the plugin has completed initialization and not since been torn down.
    pub fn is_initialized_or_better(&self) -> bool {
        matches!(
            self,
            Self::Initialized
                | Self::Starting
                | Self::Running
                | Self::Paused
                | Self::Debug
                | Self::Updating
                | Self::Stopping
                | Self::Stopped
        )
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Source state
    pub from: PluginState,
    /// Target state
    pub to: PluginState,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// Per-plugin state tracker.
///
/// Owned by the registry entry; every mutation goes through
/// [`PluginLifecycle::transition_to`], which rejects edges outside the table
/// without touching the current state.
#[derive(Debug)]
pub struct PluginLifecycle {
    plugin_id: String,
    current_state: PluginState,
    previous_state: Option<PluginState>,
    history: VecDeque<TransitionRecord>,
    entered_at: Instant,
    stats: LifecycleStats,
}

impl PluginLifecycle {
    /// Create a tracker in the `Unloaded` state.
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            current_state: PluginState::Unloaded,
            previous_state: None,
            history: VecDeque::new(),
            entered_at: Instant::now(),
            stats: LifecycleStats::new(),
        }
    }

    /// Plugin id.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Current state.
    pub fn current_state(&self) -> PluginState {
        self.current_state
    }

    /// Previous state, if any transition happened.
    pub fn previous_state(&self) -> Option<PluginState> {
        self.previous_state
    }

    /// Time spent in the current state.
    pub fn time_in_state(&self) -> Duration {
        self.entered_at.elapsed()
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.history.iter()
    }

    /// Transition to `target`.
    pub fn transition_to(&mut self, target: PluginState) -> LifecycleResult<PluginState> {
        let current = self.current_state;

        if !current.can_transition_to(target) {
            return Err(LifecycleError::InvalidTransition {
                plugin_id: self.plugin_id.clone(),
                from: current.to_string(),
                to: target.to_string(),
            });
        }

        self.previous_state = Some(current);
        self.current_state = target;
        self.entered_at = Instant::now();
        self.stats.record_transition();
        if target == PluginState::Error {
            self.stats.record_error();
        }

        if self.history.len() == TRANSITION_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(TransitionRecord {
            from: current,
            to: target,
            at: Utc::now(),
        });

        tracing::debug!(
            plugin_id = %self.plugin_id,
            from_state = ?current,
            to_state = ?target,
            "Plugin state transition"
        );

        Ok(current)
    }

    /// Apply a sequence of transitions, stopping at the first illegal edge.
    pub fn transition_through(&mut self, path: &[PluginState]) -> LifecycleResult<()> {
        for state in path {
            self.transition_to(*state)?;
        }
        Ok(())
    }

    /// Lifecycle statistics.
    pub fn stats(&self) -> &LifecycleStats {
        &self.stats
    }
}

/// Lifecycle counters feeding the health score.
#[derive(Debug)]
pub struct LifecycleStats {
    total_transitions: AtomicU64,
    error_transitions: AtomicU64,
    crashes: AtomicU64,
    timeouts: AtomicU64,
    created_at: Instant,
}

impl LifecycleStats {
    fn new() -> Self {
        Self {
            total_transitions: AtomicU64::new(0),
            error_transitions: AtomicU64::new(0),
            crashes: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    fn record_transition(&self) {
        self.total_transitions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.error_transitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed or panicked contract call.
    pub fn record_crash(&self) {
        self.crashes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a contract call that exceeded its timeout.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Total transitions.
    pub fn total_transitions(&self) -> u64 {
        self.total_transitions.load(Ordering::Relaxed)
    }

    /// Transitions into `Error`.
    pub fn error_transitions(&self) -> u64 {
        self.error_transitions.load(Ordering::Relaxed)
    }

    /// Crash count.
    pub fn crash_count(&self) -> u64 {
        self.crashes.load(Ordering::Relaxed)
    }

    /// Timeout count.
    pub fn timeout_count(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Time since the tracker was created.
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Immutable snapshot.
    pub fn snapshot(&self) -> LifecycleStatsSnapshot {
        LifecycleStatsSnapshot {
            total_transitions: self.total_transitions(),
            error_transitions: self.error_transitions(),
            crash_count: self.crash_count(),
            timeout_count: self.timeout_count(),
            uptime_seconds: self.uptime().as_secs(),
        }
    }
}

/// Immutable snapshot of lifecycle statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStatsSnapshot {
    pub total_transitions: u64,
    pub error_transitions: u64,
    pub crash_count: u64,
    pub timeout_count: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_successors() {
        let expected = [
            PluginState::Paused,
            PluginState::Stopping,
            PluginState::Updating,
            PluginState::Debug,
            PluginState::Error,
        ];
        for target in PluginState::ALL {
            assert_eq!(
                PluginState::Running.can_transition_to(target),
                expected.contains(&target),
                "Running -> {target}"
            );
        }
    }

    #[test]
    fn test_state_classes() {
        for state in PluginState::ALL {
            assert_ne!(state.is_transitional(), state.is_stable());
        }
        assert!(PluginState::Debug.is_active());
        assert!(PluginState::Paused.is_active());
        assert!(!PluginState::Stopped.is_active());
        assert!(PluginState::Updating.is_transitional());
        assert!(PluginState::Error.is_stable());
    }

    #[test]
    fn test_every_state_reachable_from_unloaded() {
        let mut seen = vec![PluginState::Unloaded];
        let mut frontier = vec![PluginState::Unloaded];
        while let Some(state) = frontier.pop() {
            for next in allowed_transitions(state) {
                if !seen.contains(next) {
                    seen.push(*next);
                    frontier.push(*next);
                }
            }
        }
        assert_eq!(seen.len(), PluginState::ALL.len());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut lifecycle = PluginLifecycle::new("reader");
        lifecycle
            .transition_through(&[
                PluginState::Loading,
                PluginState::Loaded,
                PluginState::Initializing,
                PluginState::Initialized,
                PluginState::Starting,
                PluginState::Running,
                PluginState::Stopping,
                PluginState::Stopped,
                PluginState::Unloading,
                PluginState::Unloaded,
            ])
            .unwrap();

        assert_eq!(lifecycle.current_state(), PluginState::Unloaded);
        assert_eq!(lifecycle.previous_state(), Some(PluginState::Unloading));
        assert_eq!(lifecycle.stats().total_transitions(), 10);
        assert_eq!(lifecycle.history().count(), 10);
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let mut lifecycle = PluginLifecycle::new("reader");
        lifecycle
            .transition_through(&[
                PluginState::Loading,
                PluginState::Loaded,
                PluginState::Initializing,
                PluginState::Initialized,
                PluginState::Starting,
                PluginState::Running,
            ])
            .unwrap();

        let error = lifecycle.transition_to(PluginState::Unloaded).unwrap_err();
        assert!(matches!(error, LifecycleError::InvalidTransition { .. }));
        assert_eq!(lifecycle.current_state(), PluginState::Running);
        assert_eq!(lifecycle.stats().total_transitions(), 6);
    }

    #[test]
    fn test_error_transitions_counted() {
        let mut lifecycle = PluginLifecycle::new("reader");
        lifecycle
            .transition_through(&[PluginState::Loading, PluginState::Error])
            .unwrap();
        lifecycle.stats().record_crash();

        let snapshot = lifecycle.stats().snapshot();
        assert_eq!(snapshot.error_transitions, 1);
        assert_eq!(snapshot.crash_count, 1);
        assert_eq!(snapshot.timeout_count, 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut lifecycle = PluginLifecycle::new("reader");
        lifecycle
            .transition_through(&[
                PluginState::Loading,
                PluginState::Loaded,
                PluginState::Initializing,
                PluginState::Initialized,
                PluginState::Starting,
                PluginState::Running,
            ])
            .unwrap();
        for _ in 0..40 {
            lifecycle
                .transition_through(&[PluginState::Paused, PluginState::Running])
                .unwrap();
        }
        assert_eq!(lifecycle.history().count(), TRANSITION_HISTORY_LIMIT);
    }
}
