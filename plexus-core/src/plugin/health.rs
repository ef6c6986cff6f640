//! Derived plugin health.
//!
//! The score is observational: it is computed from the tracked lifecycle
//! state, the crash and timeout counters, and the plugin's own report, and
//! never gates a transition.

use crate::plugin::lifecycle::PluginState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const CRASH_PENALTY: u32 = 20;
const TIMEOUT_PENALTY: u32 = 10;
const STATE_MISMATCH_PENALTY: u32 = 25;

/// Discrete health level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthLevel {
    /// Score >= 90
    Healthy,
    /// Score >= 70
    Warning,
    /// Score >= 30
    Critical,
    /// Score < 30
    Unhealthy,
    /// No instance to observe
    Unknown,
}

impl HealthLevel {
    /// Map a score in [0, 100] to a level.
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => Self::Healthy,
            70..=89 => Self::Warning,
            30..=69 => Self::Critical,
            _ => Self::Unhealthy,
        }
    }

    /// Critical and unhealthy plugins are routed to anomaly handling.
    pub fn requires_attention(&self) -> bool {
        matches!(self, Self::Critical | Self::Unhealthy)
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Healthy => "HEALTHY",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Unhealthy => "UNHEALTHY",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Base score for a lifecycle state.
pub fn state_score(state: PluginState) -> u8 {
    match state {
        PluginState::Running => 100,
        PluginState::Paused | PluginState::Initialized | PluginState::Stopped => 95,
        PluginState::Debug | PluginState::Loaded => 90,
        PluginState::Loading
        | PluginState::Initializing
        | PluginState::Starting
        | PluginState::Stopping
        | PluginState::Unloading
        | PluginState::Updating => 80,
        PluginState::Unloaded => 50,
        PluginState::Error => 10,
    }
}

/// Monitored signals feeding the score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSignals {
    /// Failed or panicked contract calls
    pub crash_count: u64,
    /// Contract calls that exceeded their timeout
    pub timeout_count: u64,
    /// The plugin reported a state different from the tracked one
    pub state_mismatch: bool,
}

/// Compute the host-side score.
///
/// The plugin's own score, when present, caps the result.
pub fn compute_score(state: PluginState, signals: &HealthSignals, reported: Option<u8>) -> u8 {
    let mut penalty = signals.crash_count.min(5) as u32 * CRASH_PENALTY
        + signals.timeout_count.min(10) as u32 * TIMEOUT_PENALTY;
    if signals.state_mismatch {
        penalty += STATE_MISMATCH_PENALTY;
    }

    let score = (state_score(state) as u32).saturating_sub(penalty) as u8;
    match reported {
        Some(reported) => score.min(reported.min(100)),
        None => score,
    }
}

/// Health as reported by the plugin itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHealth {
    /// Self-assessed score in [0, 100]
    pub score: u8,
    /// Human-readable summary
    pub message: String,
    /// When the report was produced
    pub timestamp: DateTime<Utc>,
    /// Additional details
    pub details: HashMap<String, String>,
}

impl PluginHealth {
    /// A fully healthy report.
    pub fn healthy() -> Self {
        Self::with_score(100, "Plugin is healthy")
    }

    /// A report with the given score.
    pub fn with_score(score: u8, message: impl Into<String>) -> Self {
        Self {
            score: score.min(100),
            message: message.into(),
            timestamp: Utc::now(),
            details: HashMap::new(),
        }
    }
}

impl Default for PluginHealth {
    fn default() -> Self {
        Self::healthy()
    }
}

/// Host-side health view of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Plugin identifier
    pub plugin_id: String,
    /// Tracked lifecycle state
    pub state: PluginState,
    /// Combined score
    pub score: u8,
    /// Level derived from the score
    pub level: HealthLevel,
    /// Signals used
    pub signals: HealthSignals,
    /// Plugin's own report, if it answered in time
    pub reported: Option<PluginHealth>,
    /// Report time
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Build a report.
    pub fn new(
        plugin_id: impl Into<String>,
        state: PluginState,
        signals: HealthSignals,
        reported: Option<PluginHealth>,
    ) -> Self {
        let score = compute_score(state, &signals, reported.as_ref().map(|r| r.score));
        let level = if state == PluginState::Unloaded {
            HealthLevel::Unknown
        } else {
            HealthLevel::from_score(score)
        };

        Self {
            plugin_id: plugin_id.into(),
            state,
            score,
            level,
            signals,
            reported,
            timestamp: Utc::now(),
        }
    }

    /// Whether the report should be forwarded to anomaly handling.
    pub fn requires_attention(&self) -> bool {
        self.level.requires_attention()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_thresholds() {
        assert_eq!(HealthLevel::from_score(100), HealthLevel::Healthy);
        assert_eq!(HealthLevel::from_score(90), HealthLevel::Healthy);
        assert_eq!(HealthLevel::from_score(89), HealthLevel::Warning);
        assert_eq!(HealthLevel::from_score(70), HealthLevel::Warning);
        assert_eq!(HealthLevel::from_score(69), HealthLevel::Critical);
        assert_eq!(HealthLevel::from_score(30), HealthLevel::Critical);
        assert_eq!(HealthLevel::from_score(29), HealthLevel::Unhealthy);
        assert_eq!(HealthLevel::from_score(0), HealthLevel::Unhealthy);
    }

    #[test]
    fn test_requires_attention() {
        assert!(HealthLevel::Critical.requires_attention());
        assert!(HealthLevel::Unhealthy.requires_attention());
        assert!(!HealthLevel::Warning.requires_attention());
        assert!(!HealthLevel::Unknown.requires_attention());
    }

    #[test]
    fn test_signal_penalties() {
        let clean = HealthSignals::default();
        assert_eq!(compute_score(PluginState::Running, &clean, None), 100);

        let flaky = HealthSignals {
            crash_count: 1,
            timeout_count: 2,
            state_mismatch: false,
        };
        assert_eq!(compute_score(PluginState::Running, &flaky, None), 60);

        let broken = HealthSignals {
            crash_count: 10,
            timeout_count: 10,
            state_mismatch: true,
        };
        assert_eq!(compute_score(PluginState::Running, &broken, None), 0);
    }

    #[test]
    fn test_reported_score_caps_result() {
        let clean = HealthSignals::default();
        assert_eq!(compute_score(PluginState::Running, &clean, Some(40)), 40);
        assert_eq!(compute_score(PluginState::Error, &clean, Some(100)), 10);
    }

    #[test]
    fn test_report_levels() {
        let report = HealthReport::new("p", PluginState::Error, HealthSignals::default(), None);
        assert_eq!(report.level, HealthLevel::Unhealthy);
        assert!(report.requires_attention());

        let report = HealthReport::new("p", PluginState::Unloaded, HealthSignals::default(), None);
        assert_eq!(report.level, HealthLevel::Unknown);
    }
}
