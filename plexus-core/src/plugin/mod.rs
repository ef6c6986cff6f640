//! Plugin system with comprehensive lifecycle management.
//!
//! ```text
//! artifact (.zip) ─► loader ─► security checks ─► dependency graph
//!                                                      │
//!            registry ◄── lifecycle tracker ◄──────────┘
//!                │
//!   PluginRuntime (orchestrator) ─► worker pool ─► contract calls
//! ```
//!
//! Hosts interact with [`PluginRuntime`]; the other types are exposed for
//! plugin authors ([`Plugin`], [`HostContext`]) and for inspection.

pub mod audit;
pub mod config;
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod health;
pub mod history;
pub mod lifecycle;
pub mod loader;
pub mod metrics;
pub mod orchestrator;
pub mod permissions;
pub mod registry;
pub mod scanner;
pub mod security;
pub mod traits;
pub mod version;

// Plugin contract
pub use traits::{
    ConfigMap, HostContext, Plugin, PluginEvent, PluginMetadata, PluginResponse, ResponseStatus,
};

// Error handling
pub use error::{
    DependencyError, ErrorKind, LifecycleError, LoadError, PluginError, PluginResult,
    SecurityError,
};

// Orchestration
pub use orchestrator::{ArtifactRef, PluginRuntime, RuntimeEvent};

// Loading and metadata
pub use descriptor::{DependencySpec, PluginDescriptor, PluginManifest};
pub use loader::{FactoryTable, LoadScope, PluginArtifact, PluginLoader};
pub use version::PluginVersion;

// Lifecycle and health
pub use health::{HealthLevel, HealthReport, PluginHealth};
pub use lifecycle::{PluginLifecycle, PluginState};

// Security
pub use audit::{AuditEntry, AuditEvent};
pub use permissions::{Permission, PermissionSet, SecurityLevel};
pub use security::{ActivityReport, AnomalyFinding, AnomalySeverity, BehaviorPattern, MitigationAction};

// Registry and metrics
pub use dependency::DependencyResolver;
pub use metrics::PluginMetricsReport;
pub use registry::PluginSummary;
