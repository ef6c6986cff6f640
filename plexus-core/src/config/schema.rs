//! Runtime configuration schema.
//!
//! Every section deserializes with defaults so partial files and
//! environment overrides only need to name the keys they change. Durations
//! are stored as milliseconds and exposed as [`Duration`] accessors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Root configuration for a [`crate::plugin::PluginRuntime`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker pool and contract-call timeouts
    #[validate(nested)]
    pub execution: ExecutionConfig,

    /// Artifact loading
    #[validate(nested)]
    pub loader: LoaderConfig,

    /// Security checks, permissions and anomaly thresholds
    #[validate(nested)]
    pub security: SecurityConfig,

    /// Orchestration, history and persistence roots
    #[validate(nested)]
    pub orchestrator: OrchestratorConfig,

    /// Logging output
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Production preset: signatures required, JSON logs.
    pub fn production() -> Self {
        let mut config = Self::default();
        config.security.require_signatures = true;
        config.logging = LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Json,
        };
        config
    }

    /// Development preset: relaxed timeouts, verbose pretty logs.
    pub fn development() -> Self {
        let mut config = Self::default();
        config.execution.call_timeout_ms = 30_000;
        config.execution.transition_timeout_ms = 60_000;
        config.orchestrator.health_check_interval_ms = 5_000;
        config.logging = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
        };
        config
    }
}

/// Worker pool and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum lifecycle operations and contract calls in flight
    #[validate(range(min = 1, max = 4096))]
    pub max_concurrent_operations: usize,

    /// Timeout for individual contract calls (`execute`, events, health)
    #[validate(range(min = 1))]
    pub call_timeout_ms: u64,

    /// Timeout for lifecycle contract calls (`initialize`, `start`, ...)
    #[validate(range(min = 1))]
    pub transition_timeout_ms: u64,
}

impl ExecutionConfig {
    /// Contract call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Lifecycle call timeout.
    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 16,
            call_timeout_ms: 5_000,
            transition_timeout_ms: 10_000,
        }
    }
}

/// Artifact loading settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoaderConfig {
    /// Manifest entry name inside the artifact
    #[validate(length(min = 1))]
    pub manifest_name: String,

    /// Artifacts above this size are rejected before parsing
    #[validate(range(min = 1))]
    pub max_artifact_size: u64,

    /// Host API version plugins are checked against
    pub host_api_version: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            manifest_name: "plugin.toml".to_string(),
            max_artifact_size: 50 * 1024 * 1024,
            host_api_version: 1,
        }
    }
}

/// Security layer settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SecurityConfig {
    /// Reject artifacts without a signature
    pub require_signatures: bool,

    /// Hex-encoded HMAC keys accepted for signatures
    pub trusted_keys: Vec<String>,

    /// Hex SHA-256 content digests that are never admitted
    pub blocked_digests: Vec<String>,

    /// Byte patterns identifying known malware
    pub threat_signatures: Vec<String>,

    /// Byte patterns flagged by static code analysis
    pub suspicious_code_patterns: Vec<String>,

    /// Lifetime of temporary permission grants
    #[validate(range(min = 1))]
    pub temporary_grant_ttl_ms: u64,

    /// Interval of the expiry sweep
    #[validate(range(min = 10))]
    pub sweep_interval_ms: u64,

    /// Audit ring capacity
    #[validate(range(min = 1))]
    pub max_audit_entries: usize,

    /// Runtime anomaly thresholds
    #[validate(nested)]
    pub thresholds: ActivityThresholds,
}

impl SecurityConfig {
    /// Temporary grant lifetime.
    pub fn temporary_grant_ttl(&self) -> Duration {
        Duration::from_millis(self.temporary_grant_ttl_ms)
    }

    /// Expiry sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_signatures: false,
            trusted_keys: Vec::new(),
            blocked_digests: Vec::new(),
            threat_signatures: vec!["EICAR-STANDARD-ANTIVIRUS-TEST-FILE".to_string()],
            suspicious_code_patterns: [
                "Runtime.getRuntime().exec",
                "ProcessBuilder",
                "System.loadLibrary",
                "dlopen",
                "eval(",
                "/system/bin/su",
                "DexClassLoader",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            temporary_grant_ttl_ms: 60 * 60 * 1000,
            sweep_interval_ms: 1_000,
            max_audit_entries: 10_000,
            thresholds: ActivityThresholds::default(),
        }
    }
}

/// Limits above which runtime activity is considered anomalous.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ActivityThresholds {
    /// CPU usage in percent
    #[validate(range(min = 0.0, max = 100.0))]
    pub max_cpu_percent: f64,

    /// Resident memory in bytes
    pub max_memory_bytes: u64,

    /// Outbound network requests per minute
    pub max_network_requests_per_minute: u32,

    /// File operations per minute
    pub max_file_operations_per_minute: u32,
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self {
            max_cpu_percent: 80.0,
            max_memory_bytes: 100 * 1024 * 1024,
            max_network_requests_per_minute: 100,
            max_file_operations_per_minute: 50,
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Prior artifacts retained per plugin for rollback
    #[validate(range(max = 100))]
    pub max_history_per_plugin: usize,

    /// Directory receiving artifact copies for rollback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,

    /// Persistence root for plugin configuration documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,

    /// Root of the per-plugin data directories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Periodic health check interval; 0 disables the monitor
    pub health_check_interval_ms: u64,

    /// Capacity of the runtime event channel
    #[validate(range(min = 1))]
    pub event_capacity: usize,
}

impl OrchestratorConfig {
    /// Health monitor interval, `None` when disabled.
    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_ms > 0).then(|| Duration::from_millis(self.health_check_interval_ms))
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_history_per_plugin: 5,
            backup_dir: None,
            config_dir: None,
            data_dir: None,
            health_check_interval_ms: 30_000,
            event_capacity: 256,
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `plexus_core=debug`
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output
    Pretty,
    /// Single-line human-readable output
    Compact,
    /// JSON lines
    Json,
}
