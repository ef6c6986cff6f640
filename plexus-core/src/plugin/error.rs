//! Error types for the plugin runtime.
//!
//! Each pipeline stage owns an error enum ([`LoadError`], [`SecurityError`],
//! [`DependencyError`], [`LifecycleError`]); [`PluginError`] wraps them so
//! every orchestration call fails through a single type while callers can
//! still branch on [`PluginError::kind`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level plugin runtime error.
#[derive(Error, Debug, Clone)]
pub enum PluginError {
    /// Artifact could not be turned into a live instance
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Security layer rejected the plugin or an operation
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// Dependency graph rejected the plugin
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    /// Lifecycle state machine or contract call failure
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Contract call exceeded its allotted time
    #[error("Plugin timeout: {plugin_id}, operation: {operation}, timeout: {timeout_ms}ms")]
    Timeout {
        /// Plugin identifier
        plugin_id: String,
        /// Operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Plugin configuration rejected
    #[error("Plugin configuration error: {plugin_id}, key: {key}, reason: {reason}")]
    Configuration {
        /// Plugin identifier
        plugin_id: String,
        /// Offending configuration key (empty for document-level errors)
        key: String,
        /// Reason for the rejection
        reason: String,
    },

    /// Internal runtime error
    #[error("Internal plugin runtime error: operation: {operation}, reason: {reason}")]
    Internal {
        /// Operation that failed
        operation: String,
        /// Failure reason
        reason: String,
    },
}

/// Type alias for plugin runtime results.
pub type PluginResult<T> = Result<T, PluginError>;

/// Coarse classification of a [`PluginError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Artifact unreadable or contract not implemented
    Load,
    /// Signature/integrity failure, malware, permission denied
    Security,
    /// Missing dependency, version mismatch, cycle
    Dependency,
    /// Invalid transition or unknown plugin
    Lifecycle,
    /// Contract call timed out
    Timeout,
    /// Configuration rejected
    Configuration,
    /// Runtime internal failure
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "load",
            Self::Security => "security",
            Self::Dependency => "dependency",
            Self::Lifecycle => "lifecycle",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl PluginError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Load(_) => ErrorKind::Load,
            Self::Security(_) => ErrorKind::Security,
            Self::Dependency(_) => ErrorKind::Dependency,
            Self::Lifecycle(_) => ErrorKind::Lifecycle,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Create an unknown-plugin error.
    pub fn not_found(plugin_id: impl Into<String>) -> Self {
        LifecycleError::UnknownPlugin {
            plugin_id: plugin_id.into(),
        }
        .into()
    }

    /// Create a timeout error.
    pub fn timeout(plugin_id: impl Into<String>, operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            plugin_id: plugin_id.into(),
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a configuration error.
    pub fn configuration(
        plugin_id: impl Into<String>,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            plugin_id: plugin_id.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Internal {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from malware detection or a blocked artifact.
    ///
    /// Such rejections are never retried automatically.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Security(SecurityError::MalwareDetected { .. })
                | Self::Security(SecurityError::ArtifactBlocked { .. })
        )
    }
}

/// Artifact loading errors.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    /// Artifact could not be read or is not a valid archive
    #[error("Plugin artifact unreadable: {path}, reason: {reason}")]
    ArtifactUnreadable {
        /// Artifact path
        path: String,
        /// Failure reason
        reason: String,
    },

    /// Artifact exceeds the configured size limit
    #[error("Plugin artifact too large: {path}, size: {size}, limit: {limit}")]
    ArtifactTooLarge {
        /// Artifact path
        path: String,
        /// Artifact size in bytes
        size: u64,
        /// Configured limit in bytes
        limit: u64,
    },

    /// Manifest missing or invalid
    #[error("Invalid plugin manifest: {path}, field: {field}, reason: {reason}")]
    InvalidManifest {
        /// Artifact path
        path: String,
        /// Offending manifest field
        field: String,
        /// Validation failure reason
        reason: String,
    },

    /// Entry point does not produce a conforming plugin
    #[error("Contract violation: {plugin_id}, entry point: {entry_point}, reason: {reason}")]
    ContractViolation {
        /// Plugin identifier
        plugin_id: String,
        /// Entry point identifier
        entry_point: String,
        /// Violation description
        reason: String,
    },

    /// Plugin targets a host API range that excludes this host
    #[error("Incompatible host API: {plugin_id}, supported: {min}..={max}, host: {host}")]
    IncompatibleHost {
        /// Plugin identifier
        plugin_id: String,
        /// Minimum supported host API version
        min: u32,
        /// Maximum supported host API version
        max: u32,
        /// Host API version
        host: u32,
    },
}

/// Type alias for loader results.
pub type LoadResult<T> = Result<T, LoadError>;

/// Security layer errors.
#[derive(Error, Debug, Clone)]
pub enum SecurityError {
    /// Signature missing or not produced by a trusted key
    #[error("Signature verification failed: {plugin_id}, reason: {reason}")]
    SignatureInvalid {
        /// Plugin identifier
        plugin_id: String,
        /// Failure reason
        reason: String,
    },

    /// Content digest differs from the declared checksum
    #[error("Integrity check failed: {plugin_id}, expected: {expected}, actual: {actual}")]
    IntegrityFailure {
        /// Plugin identifier
        plugin_id: String,
        /// Declared digest
        expected: String,
        /// Computed digest
        actual: String,
    },

    /// Threat scan matched known malware
    #[error("Malware detected: {plugin_id}, threats: {threats:?}")]
    MalwareDetected {
        /// Plugin identifier
        plugin_id: String,
        /// Threat descriptions
        threats: Vec<String>,
    },

    /// Artifact digest was previously blocked
    #[error("Artifact blocked: {plugin_id}, digest: {digest}")]
    ArtifactBlocked {
        /// Plugin identifier
        plugin_id: String,
        /// Blocked content digest
        digest: String,
    },

    /// Permission outside the plugin's security level
    #[error("Permission denied: {plugin_id}, permission: {permission}, reason: {reason}")]
    PermissionDenied {
        /// Plugin identifier
        plugin_id: String,
        /// Requested permission
        permission: String,
        /// Denial reason
        reason: String,
    },

    /// Plugin has no security profile
    #[error("Plugin not registered with the security layer: {plugin_id}")]
    NotRegistered {
        /// Plugin identifier
        plugin_id: String,
    },

    /// Plugin was disabled after an anomaly
    #[error("Plugin disabled by security layer: {plugin_id}")]
    Disabled {
        /// Plugin identifier
        plugin_id: String,
    },
}

/// Type alias for security results.
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Dependency graph errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    /// Required plugin is not registered
    #[error("Missing dependency: {plugin_id} requires {dependency}")]
    Missing {
        /// Plugin identifier
        plugin_id: String,
        /// Missing dependency
        dependency: String,
    },

    /// Registered dependency is older than required
    #[error("Dependency version mismatch: {plugin_id} requires {dependency}>={required}, found {actual}")]
    VersionMismatch {
        /// Plugin identifier
        plugin_id: String,
        /// Dependency identifier
        dependency: String,
        /// Minimum required version
        required: String,
        /// Registered version
        actual: String,
    },

    /// Adding the edges would close a cycle
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    CycleDetected {
        /// Plugin identifier whose registration was rejected
        plugin_id: String,
        /// Ids along the detected cycle
        cycle: Vec<String>,
    },

    /// Plugin pair reported itself incompatible
    #[error("Incompatible dependency: {plugin_id} and {dependency}, reason: {reason}")]
    Incompatible {
        /// Plugin identifier
        plugin_id: String,
        /// Dependency identifier
        dependency: String,
        /// Reason reported by the compatibility check
        reason: String,
    },

    /// Dependency has not reached the required lifecycle state
    #[error("Dependency not ready: {plugin_id} requires {dependency}, state: {state}")]
    NotReady {
        /// Plugin identifier
        plugin_id: String,
        /// Dependency identifier
        dependency: String,
        /// Dependency's current state
        state: String,
    },

    /// Plugin still has loaded dependents
    #[error("Plugin has dependents: {plugin_id}, dependents: {dependents:?}")]
    HasDependents {
        /// Plugin identifier
        plugin_id: String,
        /// Loaded dependents
        dependents: Vec<String>,
    },
}

/// Type alias for dependency results.
pub type DependencyResult<T> = Result<T, DependencyError>;

/// Lifecycle errors.
#[derive(Error, Debug, Clone)]
pub enum LifecycleError {
    /// Transition outside the transition table
    #[error("Invalid state transition: plugin {plugin_id}, from {from} to {to}")]
    InvalidTransition {
        /// Plugin identifier
        plugin_id: String,
        /// Source state
        from: String,
        /// Requested target state
        to: String,
    },

    /// No plugin with this id is loaded
    #[error("Plugin not found: {plugin_id}")]
    UnknownPlugin {
        /// Plugin identifier
        plugin_id: String,
    },

    /// A plugin with this id is already loaded
    #[error("Plugin already loaded: {plugin_id}")]
    AlreadyLoaded {
        /// Plugin identifier
        plugin_id: String,
    },

    /// Contract call failed
    #[error("Plugin operation failed: {plugin_id}, operation: {operation}, reason: {reason}")]
    OperationFailed {
        /// Plugin identifier
        plugin_id: String,
        /// Contract operation
        operation: String,
        /// Failure reason reported by the plugin
        reason: String,
    },

    /// Rollback requested without retained history
    #[error("No rollback history: {plugin_id}, version: {version}")]
    NoRollbackHistory {
        /// Plugin identifier
        plugin_id: String,
        /// Requested version
        version: String,
    },

    /// Runtime is shutting down
    #[error("Runtime is shutting down")]
    ShuttingDown,
}

/// Type alias for lifecycle results.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

impl From<serde_json::Error> for PluginError {
    fn from(error: serde_json::Error) -> Self {
        Self::Internal {
            operation: "serde_json".to_string(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_error_kinds() {
        let error: PluginError = LoadError::ContractViolation {
            plugin_id: "reader".to_string(),
            entry_point: "com.example.Reader".to_string(),
            reason: "entry point not registered".to_string(),
        }
        .into();
        assert_eq!(error.kind(), ErrorKind::Load);
        assert!(error.to_string().contains("com.example.Reader"));

        let error = PluginError::timeout("reader", "initialize", 500);
        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert!(error.to_string().contains("500ms"));

        let error = PluginError::not_found("ghost");
        assert_eq!(error.kind(), ErrorKind::Lifecycle);
        assert!(error.to_string().contains("ghost"));
    }

    #[test]
    fn test_cycle_error_message() {
        let error = DependencyError::CycleDetected {
            plugin_id: "x".to_string(),
            cycle: vec!["x".to_string(), "y".to_string(), "x".to_string()],
        };
        assert_eq!(error.to_string(), "Dependency cycle detected: x -> y -> x");
    }

    #[test]
    fn test_permanent_errors() {
        let malware: PluginError = SecurityError::MalwareDetected {
            plugin_id: "evil".to_string(),
            threats: vec!["eicar".to_string()],
        }
        .into();
        assert!(malware.is_permanent());

        let denied: PluginError = SecurityError::PermissionDenied {
            plugin_id: "p".to_string(),
            permission: "network_access".to_string(),
            reason: "level".to_string(),
        }
        .into();
        assert!(!denied.is_permanent());
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: PluginError = parse.into();
        assert_eq!(error.kind(), ErrorKind::Internal);
    }
}
