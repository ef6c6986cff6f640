//! The capability contract every plugin implements.

use crate::plugin::descriptor::DependencySpec;
use crate::plugin::error::{SecurityError, SecurityResult};
use crate::plugin::health::PluginHealth;
use crate::plugin::lifecycle::PluginState;
use crate::plugin::loader::LoadScope;
use crate::plugin::permissions::Permission;
use crate::plugin::security::SecurityManager;
use crate::plugin::version::PluginVersion;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A plugin configuration document.
pub type ConfigMap = serde_json::Map<String, Value>;

/// Core plugin trait for all plugin implementations.
///
/// Instances are shared behind `Arc<dyn Plugin>` and driven by the host
/// through `&self`; implementations keep mutable state behind their own
/// locks. Every asynchronous call may be raced against a host-side timeout,
/// so implementations must tolerate being dropped mid-call.
///
/// # Examples
///
/// ```rust
/// use plexus_core::plugin::*;
/// use async_trait::async_trait;
/// use parking_lot::Mutex;
///
/// pub struct Greeter {
///     state: Mutex<PluginState>,
/// }
///
/// #[async_trait]
/// impl Plugin for Greeter {
///     fn metadata(&self) -> PluginMetadata {
///         PluginMetadata::new("greeter", "Greeter", "1.0.0")
///     }
///
///     async fn initialize(&self, _context: HostContext, _config: ConfigMap) -> anyhow::Result<()> {
///         *self.state.lock() = PluginState::Initialized;
///         Ok(())
///     }
///
///     async fn start(&self) -> anyhow::Result<()> {
///         *self.state.lock() = PluginState::Running;
///         Ok(())
///     }
///
///     async fn stop(&self) -> anyhow::Result<()> {
///         *self.state.lock() = PluginState::Stopped;
///         Ok(())
///     }
///
///     async fn destroy(&self) -> anyhow::Result<()> {
///         Ok(())
///     }
///
///     fn state(&self) -> PluginState {
///         *self.state.lock()
///     }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Identity reported by the instance.
    ///
    /// The loader rejects instances whose id or version disagrees with the
    /// artifact manifest.
    fn metadata(&self) -> PluginMetadata;

    /// Permissions the plugin expects to hold.
    fn required_permissions(&self) -> Vec<Permission> {
        Vec::new()
    }

    /// Dependencies the plugin expects to be loaded.
    fn dependencies(&self) -> Vec<DependencySpec> {
        Vec::new()
    }

    /// JSON schema for the plugin's configuration document.
    fn configuration_schema(&self) -> Option<Value> {
        None
    }

    /// One-time setup.
    ///
    /// # Parameters
    /// - `context`: Host services scoped to this plugin
    /// - `config`: Validated configuration document
    async fn initialize(&self, context: HostContext, config: ConfigMap) -> anyhow::Result<()>;

    /// Resume active behavior. Calling it while running must succeed.
    async fn start(&self) -> anyhow::Result<()>;

    /// Suspend active behavior. Calling it while stopped must succeed.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Release all resources. The instance is unusable afterwards.
    async fn destroy(&self) -> anyhow::Result<()>;

    /// React to a host-dispatched event.
    ///
    /// Unknown event types return [`PluginResponse::not_handled`].
    async fn handle_event(&self, event: &PluginEvent) -> anyhow::Result<PluginResponse> {
        Ok(PluginResponse::not_handled(&event.event_type))
    }

    /// State as seen by the plugin itself.
    fn state(&self) -> PluginState;

    /// Self-reported health.
    async fn health(&self) -> PluginHealth {
        PluginHealth::healthy()
    }

    /// Plugin-defined metrics.
    fn metrics(&self) -> HashMap<String, f64> {
        HashMap::new()
    }

    /// Current configuration as seen by the plugin.
    fn configuration(&self) -> ConfigMap {
        ConfigMap::new()
    }

    /// Apply a new configuration without a restart.
    async fn update_configuration(&self, _config: ConfigMap) -> anyhow::Result<()> {
        Ok(())
    }

    /// Pairwise compatibility with another loaded plugin.
    fn is_compatible_with(&self, _other_id: &str, _other_version: &PluginVersion) -> bool {
        true
    }
}

/// Identity reported by a plugin instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Plugin id
    pub id: String,
    /// Display name
    pub name: String,
    /// Version
    pub version: PluginVersion,
}

impl PluginMetadata {
    /// Create metadata.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<PluginVersion>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Outcome status of a contract call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// Call succeeded
    Success,
    /// Call failed
    Error,
    /// Call completed with caveats
    Warning,
}

/// The only shape plugins use to report outcomes to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginResponse {
    /// Outcome status
    pub status: ResponseStatus,
    /// Human-readable message
    pub message: String,
    /// Structured results
    pub data: HashMap<String, Value>,
}

impl PluginResponse {
    /// Successful response.
    pub fn success(message: impl Into<String>) -> Self {
        Self::with_status(ResponseStatus::Success, message)
    }

    /// Failed response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(ResponseStatus::Error, message)
    }

    /// Response with caveats.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_status(ResponseStatus::Warning, message)
    }

    /// Response for an event type the plugin does not handle.
    pub fn not_handled(event_type: &str) -> Self {
        Self::warning(format!("Event '{event_type}' not handled"))
            .with_data("handled", Value::Bool(false))
    }

    fn with_status(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: HashMap::new(),
        }
    }

    /// Attach a structured value.
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Whether the status is `Success`.
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Whether the status is `Error`.
    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }

    /// False only when the plugin declined the event.
    pub fn is_handled(&self) -> bool {
        self.data.get("handled") != Some(&Value::Bool(false))
    }
}

/// Host-dispatched event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEvent {
    /// Event type
    pub event_type: String,
    /// Event payload
    pub payload: Value,
    /// Dispatch time
    pub timestamp: DateTime<Utc>,
}

impl PluginEvent {
    /// Create an event.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Host services handed to a plugin at initialization.
///
/// Scoped to a single plugin: resources resolve only inside the plugin's own
/// load scope and permission checks are made against its own profile.
#[derive(Clone)]
pub struct HostContext {
    plugin_id: String,
    data_dir: Option<PathBuf>,
    scope: Arc<LoadScope>,
    security: Arc<SecurityManager>,
}

impl HostContext {
    /// Create a context for `plugin_id`.
    pub fn new(
        plugin_id: impl Into<String>,
        data_dir: Option<PathBuf>,
        scope: Arc<LoadScope>,
        security: Arc<SecurityManager>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            data_dir,
            scope,
            security,
        }
    }

    /// Plugin this context belongs to.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Per-plugin data directory, when the host provides one.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// A resource packaged inside the plugin's own artifact.
    pub fn resource(&self, name: &str) -> Option<&[u8]> {
        self.scope.resource(name)
    }

    /// Names of the packaged resources.
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.scope.resource_names()
    }

    /// Audited permission check.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.security.check_permission(&self.plugin_id, permission)
    }

    /// Fail with `PermissionDenied` unless `permission` is held.
    pub fn require_permission(&self, permission: Permission) -> SecurityResult<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(SecurityError::PermissionDenied {
                plugin_id: self.plugin_id.clone(),
                permission: permission.to_string(),
                reason: "permission not granted".to_string(),
            })
        }
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("plugin_id", &self.plugin_id)
            .field("data_dir", &self.data_dir)
            .field("scope", &self.scope.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_handled_response() {
        let response = PluginResponse::not_handled("page.turned");
        assert_eq!(response.status, ResponseStatus::Warning);
        assert!(!response.is_handled());
        assert!(response.message.contains("page.turned"));

        let response = PluginResponse::success("ok").with_data("count", Value::from(3));
        assert!(response.is_handled());
        assert!(response.is_success());
        assert_eq!(response.data["count"], Value::from(3));
    }

    #[test]
    fn test_response_serialization() {
        let response = PluginResponse::error("boom");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "Error");
        assert_eq!(json["message"], "boom");
    }
}
