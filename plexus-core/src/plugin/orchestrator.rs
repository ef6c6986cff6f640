//! Runtime orchestrator.
//!
//! [`PluginRuntime`] is the single entry point for hosts. It owns the
//! registry and drives the loader, security layer, dependency resolver and
//! lifecycle trackers:
//!
//! ```text
//! load:   read artifact -> security check -> instantiate -> register deps
//!         -> security profile -> configuration -> registry (Loaded)
//! init:   sandbox present + deps Initialized -> initialize() (Initialized)
//! start:  start stopped dependencies -> start() (Running)
//! stop:   stop running dependents -> stop() (Stopped)
//! unload: stop -> destroy() -> purge profile, edges, configuration
//! update: unload (edges kept) -> admit -> restore configuration -> init -> start
//! ```
//!
//! Lifecycle operations are submitted to a bounded worker pool. A caller that
//! gives up after the transition timeout gets `PluginError::Timeout`, but the
//! submitted operation still runs to completion. Operations on the same
//! plugin are serialized by a per-plugin lock; no lock is held while another
//! plugin's lock is taken.

use crate::config::RuntimeConfig;
use crate::config::validator::ConfigValidator;
use crate::plugin::audit::AuditEntry;
use crate::plugin::config::ConfigStore;
use crate::plugin::dependency::DependencyResolver;
use crate::plugin::descriptor::{DependencySpec, PluginDescriptor};
use crate::plugin::error::{
    DependencyError, LifecycleError, LoadError, PluginError, PluginResult, SecurityError,
};
use crate::plugin::health::{HealthLevel, HealthReport, HealthSignals};
use crate::plugin::history::{ArtifactHistory, ArtifactRecord};
use crate::plugin::lifecycle::PluginState;
use crate::plugin::loader::{FactoryTable, PluginArtifact, PluginLoader};
use crate::plugin::metrics::{CallOutcome, PluginMetricsReport};
use crate::plugin::permissions::{Permission, PermissionSet};
use crate::plugin::registry::{PluginEntry, PluginRegistry, PluginSummary};
use crate::plugin::security::{
    ActivityReport, AnomalyFinding, AnomalySeverity, MitigationAction, SecurityManager,
};
use crate::plugin::traits::{ConfigMap, HostContext, Plugin, PluginEvent, PluginResponse};
use crate::plugin::version::PluginVersion;
use crate::runtime::{CallFailure, PluginExecutor, PoolStats, WorkerPool};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tokio::task::JoinHandle;

/// Notification published on the runtime's event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A plugin was admitted
    Loaded {
        /// Plugin id
        plugin_id: String,
        /// Admitted version
        version: PluginVersion,
    },
    /// A lifecycle transition happened
    StateChanged {
        /// Plugin id
        plugin_id: String,
        /// Previous state
        from: PluginState,
        /// New state
        to: PluginState,
    },
    /// The active configuration changed
    ConfigurationChanged {
        /// Plugin id
        plugin_id: String,
    },
    /// A plugin was replaced by another version
    Updated {
        /// Plugin id
        plugin_id: String,
        /// Replaced version
        from_version: PluginVersion,
        /// New version
        to_version: PluginVersion,
    },
    /// A plugin was restored from history
    RolledBack {
        /// Plugin id
        plugin_id: String,
        /// Restored version
        version: PluginVersion,
    },
    /// A plugin was unloaded and purged
    Unloaded {
        /// Plugin id
        plugin_id: String,
    },
    /// Anomaly detection found something
    AnomalyDetected {
        /// Plugin id
        plugin_id: String,
        /// Finding severity
        severity: AnomalySeverity,
        /// Mitigation applied
        action: MitigationAction,
    },
    /// A health check flagged a plugin
    HealthAttention {
        /// Plugin id
        plugin_id: String,
        /// Health level
        level: HealthLevel,
        /// Health score
        score: u8,
    },
}

/// An artifact to load together with the entry point to instantiate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    /// Artifact path
    pub path: PathBuf,
    /// Entry point; empty uses the manifest's `main-class`
    pub entry_point: String,
}

impl ArtifactRef {
    /// Create a reference.
    pub fn new(path: impl Into<PathBuf>, entry_point: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry_point: entry_point.into(),
        }
    }
}

fn merged_dependencies(descriptor: &PluginDescriptor, declared: Vec<DependencySpec>) -> Vec<DependencySpec> {
    let mut dependencies = descriptor.dependencies.clone();
    for spec in declared {
        if !dependencies.iter().any(|existing| existing.id == spec.id) {
            dependencies.push(spec);
        }
    }
    dependencies
}

struct RuntimeInner {
    config: RuntimeConfig,
    loader: PluginLoader,
    security: Arc<SecurityManager>,
    dependencies: DependencyResolver,
    registry: PluginRegistry,
    configs: ConfigStore,
    history: ArtifactHistory,
    pool: WorkerPool,
    executor: PluginExecutor,
    events: broadcast::Sender<RuntimeEvent>,
    op_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
    started_at: Instant,
}

impl RuntimeInner {
    fn emit(&self, event: RuntimeEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn op_lock(&self, plugin_id: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.op_locks.entry(plugin_id.to_string()).or_default().value())
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn transition(&self, entry: &PluginEntry, target: PluginState) -> PluginResult<()> {
        let from = entry.transition(target)?;
        self.emit(RuntimeEvent::StateChanged {
            plugin_id: entry.id().to_string(),
            from,
            to: target,
        });
        Ok(())
    }

    /// Run one contract call under the call timeout.
    ///
    /// A failure is counted and moves the plugin to `Error` when the current
    /// state allows it.
    async fn invoke<F, Fut>(&self, entry: &PluginEntry, operation: &'static str, call: F) -> PluginResult<()>
    where
        F: FnOnce(Arc<dyn Plugin>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let timeout = self.config.execution.call_timeout();
        let started = Instant::now();
        let result = self
            .executor
            .call(timeout, call(Arc::clone(entry.instance())))
            .await;

        let failure = match result {
            Ok(()) => {
                entry.metrics().record(CallOutcome::Success, started.elapsed());
                return Ok(());
            }
            Err(failure) => failure,
        };

        entry.metrics().record(failure.outcome(), started.elapsed());
        let from = entry.state();
        let moved = match failure {
            CallFailure::TimedOut { .. } => {
                entry.record_timeout();
                entry.transition(PluginState::Error).is_ok()
            }
            CallFailure::Failed(_) | CallFailure::Panicked(_) => entry.mark_failed(),
        };
        if moved {
            self.emit(RuntimeEvent::StateChanged {
                plugin_id: entry.id().to_string(),
                from,
                to: PluginState::Error,
            });
        }

        tracing::warn!(
            plugin_id = %entry.id(),
            operation = operation,
            error = %failure,
            "Plugin contract call failed"
        );

        Err(match failure {
            CallFailure::TimedOut { timeout_ms } => PluginError::timeout(entry.id(), operation, timeout_ms),
            other => LifecycleError::OperationFailed {
                plugin_id: entry.id().to_string(),
                operation: operation.to_string(),
                reason: other.to_string(),
            }
            .into(),
        })
    }

    fn ensure_enabled(&self, plugin_id: &str) -> PluginResult<()> {
        if !self.security.is_registered(plugin_id) {
            return Err(SecurityError::NotRegistered {
                plugin_id: plugin_id.to_string(),
            }
            .into());
        }
        if self.security.is_disabled(plugin_id) {
            return Err(SecurityError::Disabled {
                plugin_id: plugin_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    // Loading

    async fn load(&self, path: &Path, entry_point: &str) -> PluginResult<PluginDescriptor> {
        let artifact = self.loader.read_artifact(path).await?;
        self.admit(artifact, entry_point).await
    }

    async fn admit(&self, artifact: PluginArtifact, entry_point: &str) -> PluginResult<PluginDescriptor> {
        let plugin_id = artifact.plugin_id().to_string();
        let lock = self.op_lock(&plugin_id);
        let _guard = lock.lock().await;

        if self.registry.contains(&plugin_id) {
            return Err(LifecycleError::AlreadyLoaded { plugin_id }.into());
        }

        self.security.verify_artifact(&artifact)?;
        let loaded = self.loader.instantiate(artifact, entry_point)?;
        let entry = Arc::new(PluginEntry::new(loaded));

        entry.transition(PluginState::Loading)?;
        if let Err(e) = self.register_entry(&entry) {
            tracing::warn!(plugin_id = %plugin_id, error = %e, "Plugin rejected during admission");
            return Err(e);
        }
        self.reattach_dependents(&plugin_id);
        self.transition(&entry, PluginState::Loaded)?;

        let descriptor = entry.descriptor().clone();
        if let Err(e) = self
            .history
            .record(
                &plugin_id,
                &descriptor.version,
                entry.source(),
                &descriptor.entry_point,
                entry.digest(),
            )
            .await
        {
            tracing::warn!(plugin_id = %plugin_id, error = %e, "Could not record artifact history");
        }

        tracing::info!(
            plugin_id = %plugin_id,
            version = %descriptor.version,
            scope = %entry.scope().id(),
            "Plugin loaded"
        );
        self.emit(RuntimeEvent::Loaded {
            plugin_id,
            version: descriptor.version.clone(),
        });
        Ok(descriptor)
    }

    /// Register edges, security profile, configuration and registry entry,
    /// undoing every completed step when a later one fails.
    fn register_entry(&self, entry: &Arc<PluginEntry>) -> PluginResult<()> {
        let descriptor = entry.descriptor();
        let plugin_id = descriptor.id.as_str();

        let dependencies = merged_dependencies(descriptor, entry.instance().dependencies());
        self.dependencies
            .register_dependencies(plugin_id, &descriptor.version, &dependencies)?;

        if let Err(e) = self.check_compatibility(entry, &dependencies) {
            self.dependencies.unregister(plugin_id);
            return Err(e);
        }

        let mut requested = descriptor.permissions.clone();
        requested.extend(entry.instance().required_permissions());
        requested.sort();
        requested.dedup();
        self.security
            .register_plugin(plugin_id, &requested, descriptor.security_level);

        if let Err(e) = self
            .configs
            .register(plugin_id, entry.instance().configuration_schema(), None)
        {
            self.security.unregister_plugin(plugin_id);
            self.dependencies.unregister(plugin_id);
            return Err(e);
        }

        if let Err(e) = self.registry.insert(Arc::clone(entry)) {
            self.configs.remove(plugin_id);
            self.security.unregister_plugin(plugin_id);
            self.dependencies.unregister(plugin_id);
            return Err(e.into());
        }

        Ok(())
    }

    /// Restore the edges of loaded plugins that declare `plugin_id` and lost
    /// them when it was unloaded.
    fn reattach_dependents(&self, plugin_id: &str) {
        let attached = self.dependencies.dependents_of(plugin_id);
        for entry in self.registry.entries() {
            let dependent = entry.id();
            if dependent == plugin_id || attached.iter().any(|id| id == dependent) {
                continue;
            }
            let declared = merged_dependencies(entry.descriptor(), entry.instance().dependencies());
            if !declared.iter().any(|spec| spec.id == plugin_id) {
                continue;
            }
            if let Err(e) = self
                .dependencies
                .register_dependencies(dependent, &entry.descriptor().version, &declared)
            {
                tracing::warn!(
                    plugin_id = %dependent,
                    dependency = %plugin_id,
                    error = %e,
                    "Could not restore dependency edges"
                );
            }
        }
    }

    fn check_compatibility(&self, entry: &PluginEntry, dependencies: &[DependencySpec]) -> PluginResult<()> {
        let descriptor = entry.descriptor();
        for spec in dependencies {
            let Some(other) = self.registry.get(&spec.id) else {
                continue;
            };
            let other_descriptor = other.descriptor();

            let reason = if !entry
                .instance()
                .is_compatible_with(&other_descriptor.id, &other_descriptor.version)
            {
                Some(format!(
                    "{} rejects {}@{}",
                    descriptor.id, other_descriptor.id, other_descriptor.version
                ))
            } else if !other
                .instance()
                .is_compatible_with(&descriptor.id, &descriptor.version)
            {
                Some(format!(
                    "{} rejects {}@{}",
                    other_descriptor.id, descriptor.id, descriptor.version
                ))
            } else {
                None
            };

            if let Some(reason) = reason {
                return Err(DependencyError::Incompatible {
                    plugin_id: descriptor.id.clone(),
                    dependency: spec.id.clone(),
                    reason,
                }
                .into());
            }
        }
        Ok(())
    }

    // Initialization and state changes

    /// Fail with `Missing` when a declared dependency is not loaded.
    ///
    /// Unloading a dependency removes its edges, so this reads the
    /// declarations rather than the graph.
    fn ensure_declared_present(&self, entry: &PluginEntry) -> PluginResult<()> {
        let declared = merged_dependencies(entry.descriptor(), entry.instance().dependencies());
        match declared.into_iter().find(|spec| !self.registry.contains(&spec.id)) {
            Some(spec) => Err(DependencyError::Missing {
                plugin_id: entry.id().to_string(),
                dependency: spec.id,
            }
            .into()),
            None => Ok(()),
        }
    }

    fn ensure_dependencies_ready(&self, entry: &PluginEntry) -> PluginResult<()> {
        let plugin_id = entry.id();
        self.ensure_declared_present(entry)?;
        self.dependencies.check_dependencies(entry.descriptor())?;

        for dependency in self.dependencies.dependencies_of(plugin_id) {
            match self.registry.get(&dependency).map(|other| other.state()) {
                Some(state) if state.is_initialized_or_better() => {}
                Some(state) => {
                    return Err(DependencyError::NotReady {
                        plugin_id: plugin_id.to_string(),
                        dependency,
                        state: state.to_string(),
                    }
                    .into());
                }
                None => {
                    return Err(DependencyError::Missing {
                        plugin_id: plugin_id.to_string(),
                        dependency,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    async fn data_dir(&self, plugin_id: &str) -> PluginResult<Option<PathBuf>> {
        let Some(root) = &self.config.orchestrator.data_dir else {
            return Ok(None);
        };
        let dir = root.join(plugin_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PluginError::internal("create_data_dir", format!("{}: {e}", dir.display())))?;
        Ok(Some(dir))
    }

    async fn initialize(&self, plugin_id: &str, config: Option<ConfigMap>) -> PluginResult<()> {
        let lock = self.op_lock(plugin_id);
        let _guard = lock.lock().await;
        let entry = self.registry.require(plugin_id)?;

        self.ensure_enabled(plugin_id)?;
        if entry.state().is_initialized_or_better() {
            tracing::debug!(plugin_id = %plugin_id, "Plugin already initialized");
            return Ok(());
        }
        self.ensure_dependencies_ready(&entry)?;

        if let Some(config) = config {
            self.configs.replace(plugin_id, config)?;
        }
        let config = self.configs.get(plugin_id)?;
        let context = HostContext::new(
            plugin_id,
            self.data_dir(plugin_id).await?,
            Arc::clone(entry.scope()),
            Arc::clone(&self.security),
        );

        self.transition(&entry, PluginState::Initializing)?;
        self.invoke(&entry, "initialize", move |plugin| async move {
            plugin.initialize(context, config).await
        })
        .await?;
        self.transition(&entry, PluginState::Initialized)?;

        tracing::info!(plugin_id = %plugin_id, "Plugin initialized");
        Ok(())
    }

    async fn start_one(&self, plugin_id: &str) -> PluginResult<()> {
        let lock = self.op_lock(plugin_id);
        let _guard = lock.lock().await;
        let entry = self.registry.require(plugin_id)?;

        self.ensure_enabled(plugin_id)?;
        if entry.state() == PluginState::Running {
            return Ok(());
        }

        self.transition(&entry, PluginState::Starting)?;
        self.invoke(&entry, "start", |plugin| async move { plugin.start().await })
            .await?;
        self.transition(&entry, PluginState::Running)?;

        tracing::info!(plugin_id = %plugin_id, "Plugin started");
        Ok(())
    }

    fn dependency_closure(&self, plugin_id: &str) -> Vec<String> {
        let mut closure = vec![plugin_id.to_string()];
        let mut frontier = vec![plugin_id.to_string()];
        while let Some(id) = frontier.pop() {
            for dependency in self.dependencies.dependencies_of(&id) {
                if !closure.contains(&dependency) {
                    closure.push(dependency.clone());
                    frontier.push(dependency);
                }
            }
        }
        closure
    }

    async fn start(&self, plugin_id: &str) -> PluginResult<()> {
        self.registry.require(plugin_id)?;

        let closure = self.dependency_closure(plugin_id);
        for id in &closure {
            if let Some(entry) = self.registry.get(id) {
                self.ensure_declared_present(&entry)?;
            }
        }

        let order = self.dependencies.compute_load_order(&closure)?;
        for dependency in order.iter().filter(|id| id.as_str() != plugin_id) {
            let state = self
                .registry
                .get(dependency)
                .map(|entry| entry.state())
                .ok_or_else(|| DependencyError::Missing {
                    plugin_id: plugin_id.to_string(),
                    dependency: dependency.clone(),
                })?;

            match state {
                PluginState::Running | PluginState::Paused | PluginState::Debug => {}
                PluginState::Initialized | PluginState::Stopped => self.start_one(dependency).await?,
                other => {
                    return Err(DependencyError::NotReady {
                        plugin_id: plugin_id.to_string(),
                        dependency: dependency.clone(),
                        state: other.to_string(),
                    }
                    .into());
                }
            }
        }

        self.start_one(plugin_id).await
    }

    /// Drive an entry to `Stopped`; the caller holds its lock.
    async fn stop_entry(&self, entry: &PluginEntry) -> PluginResult<()> {
        self.transition(entry, PluginState::Stopping)?;
        self.invoke(entry, "stop", |plugin| async move { plugin.stop().await })
            .await?;
        self.transition(entry, PluginState::Stopped)?;
        tracing::info!(plugin_id = %entry.id(), "Plugin stopped");
        Ok(())
    }

    async fn stop_one(&self, plugin_id: &str) -> PluginResult<()> {
        let lock = self.op_lock(plugin_id);
        let _guard = lock.lock().await;
        let entry = self.registry.require(plugin_id)?;

        match entry.state() {
            PluginState::Stopped | PluginState::Loaded => Ok(()),
            _ => self.stop_entry(&entry).await,
        }
    }

    async fn stop(&self, plugin_id: &str) -> PluginResult<()> {
        self.registry.require(plugin_id)?;

        let mut ids = self.dependencies.transitive_dependents(plugin_id);
        ids.push(plugin_id.to_string());
        let order = self.dependencies.compute_load_order(&ids)?;

        for dependent in order.iter().rev().filter(|id| id.as_str() != plugin_id) {
            let active = self
                .registry
                .get(dependent)
                .is_some_and(|entry| entry.state().is_active());
            if active {
                self.stop_one(dependent).await?;
            }
        }

        self.stop_one(plugin_id).await
    }

    async fn change_state(&self, plugin_id: &str, target: PluginState) -> PluginResult<()> {
        let lock = self.op_lock(plugin_id);
        let _guard = lock.lock().await;
        let entry = self.registry.require(plugin_id)?;

        if target == PluginState::Running {
            self.ensure_enabled(plugin_id)?;
        }
        self.transition(&entry, target)?;
        tracing::info!(plugin_id = %plugin_id, state = %target, "Plugin state changed");
        Ok(())
    }

    // Unloading

    /// Stop, destroy and purge an entry; the caller holds its lock.
    ///
    /// Dependency edges are left to the caller: a plain unload has already
    /// removed them, an update keeps them for the replacement.
    async fn unload_entry(&self, entry: &PluginEntry) -> PluginResult<()> {
        let plugin_id = entry.id().to_string();

        if matches!(
            entry.state(),
            PluginState::Running | PluginState::Paused | PluginState::Debug | PluginState::Initialized
        ) {
            if let Err(e) = self.stop_entry(entry).await {
                tracing::warn!(plugin_id = %plugin_id, error = %e, "Stop failed during unload");
            }
        }

        self.transition(entry, PluginState::Unloading)?;
        if let Err(e) = self
            .invoke(entry, "destroy", |plugin| async move { plugin.destroy().await })
            .await
        {
            tracing::warn!(plugin_id = %plugin_id, error = %e, "Destroy failed; purging anyway");
            self.transition(entry, PluginState::Unloading)?;
        }
        self.transition(entry, PluginState::Unloaded)?;

        self.registry.remove(&plugin_id);
        self.security.unregister_plugin(&plugin_id);
        self.configs.remove(&plugin_id);

        tracing::info!(plugin_id = %plugin_id, "Plugin unloaded");
        self.emit(RuntimeEvent::Unloaded { plugin_id });
        Ok(())
    }

    async fn unload(&self, plugin_id: &str, force: bool) -> PluginResult<()> {
        let lock = self.op_lock(plugin_id);
        let _guard = lock.lock().await;
        let entry = self.registry.require(plugin_id)?;

        if force {
            self.dependencies.unregister(plugin_id);
            return self.unload_entry(&entry).await;
        }

        // Refusing and removing in one step keeps a concurrent admission
        // from registering a new dependent in between.
        self.dependencies.unregister_if_unreferenced(plugin_id)?;
        let result = self.unload_entry(&entry).await;
        if result.is_err() && self.registry.contains(plugin_id) {
            let dependencies = merged_dependencies(entry.descriptor(), entry.instance().dependencies());
            if let Err(e) = self
                .dependencies
                .register_dependencies(plugin_id, &entry.descriptor().version, &dependencies)
            {
                tracing::warn!(plugin_id = %plugin_id, error = %e, "Could not restore dependency edges");
            }
        }
        result
    }

    /// Unload whatever is registered under `plugin_id`, logging failures.
    async fn discard(&self, plugin_id: &str) {
        let lock = self.op_lock(plugin_id);
        let _guard = lock.lock().await;
        self.dependencies.unregister(plugin_id);
        if let Some(entry) = self.registry.get(plugin_id) {
            if let Err(e) = self.unload_entry(&entry).await {
                tracing::warn!(plugin_id = %plugin_id, error = %e, "Could not discard plugin");
            }
        }
    }

    // Update and rollback

    async fn update(&self, plugin_id: &str, path: &Path, entry_point: &str) -> PluginResult<PluginDescriptor> {
        let artifact = self.loader.read_artifact(path).await?;
        self.replace(plugin_id, artifact, entry_point).await
    }

    /// Swap the loaded instance of `plugin_id` for `artifact`.
    ///
    /// The old instance is unloaded with its dependency edges kept, so
    /// dependents stay attached to the replacement. Any failure after that
    /// leaves the plugin unloaded.
    async fn replace(
        &self,
        plugin_id: &str,
        artifact: PluginArtifact,
        entry_point: &str,
    ) -> PluginResult<PluginDescriptor> {
        if artifact.plugin_id() != plugin_id {
            return Err(LoadError::ContractViolation {
                plugin_id: plugin_id.to_string(),
                entry_point: entry_point.to_string(),
                reason: format!("artifact declares plugin '{}'", artifact.plugin_id()),
            }
            .into());
        }

        let old = self.registry.require(plugin_id)?;
        let from_version = old.descriptor().version.clone();
        let saved_configuration = self.configs.export(plugin_id).ok();
        {
            let lock = self.op_lock(plugin_id);
            let _guard = lock.lock().await;
            self.unload_entry(&old).await?;
        }
        drop(old);

        let result: PluginResult<PluginDescriptor> = async {
            let descriptor = self.admit(artifact, entry_point).await?;
            if let Some(document) = saved_configuration {
                self.configs.import(plugin_id, document)?;
            }
            self.initialize(plugin_id, None).await?;
            self.start(plugin_id).await?;
            Ok(descriptor)
        }
        .await;

        match result {
            Ok(descriptor) => {
                tracing::info!(
                    plugin_id = %plugin_id,
                    from_version = %from_version,
                    to_version = %descriptor.version,
                    "Plugin updated"
                );
                self.emit(RuntimeEvent::Updated {
                    plugin_id: plugin_id.to_string(),
                    from_version,
                    to_version: descriptor.version.clone(),
                });
                Ok(descriptor)
            }
            Err(e) => {
                tracing::warn!(plugin_id = %plugin_id, error = %e, "Update failed; plugin left unloaded");
                self.discard(plugin_id).await;
                Err(e)
            }
        }
    }

    async fn restore(
        &self,
        plugin_id: &str,
        artifact: PluginArtifact,
        entry_point: &str,
    ) -> PluginResult<PluginDescriptor> {
        let result: PluginResult<PluginDescriptor> = async {
            let descriptor = self.admit(artifact, entry_point).await?;
            self.initialize(plugin_id, None).await?;
            self.start(plugin_id).await?;
            Ok(descriptor)
        }
        .await;

        if result.is_err() {
            self.discard(plugin_id).await;
        }
        result
    }

    /// Read the artifact behind `record`, failing without side effects when
    /// the file no longer holds what was recorded.
    async fn retained_artifact(&self, plugin_id: &str, record: &ArtifactRecord) -> PluginResult<PluginArtifact> {
        let artifact = match self.loader.read_artifact(&record.path).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(
                    plugin_id = %plugin_id,
                    path = %record.path.display(),
                    error = %e,
                    "Retained artifact unreadable"
                );
                return Err(LifecycleError::NoRollbackHistory {
                    plugin_id: plugin_id.to_string(),
                    version: record.version.to_string(),
                }
                .into());
            }
        };

        let descriptor = artifact.descriptor();
        if descriptor.id != plugin_id || descriptor.version != record.version {
            tracing::warn!(
                plugin_id = %plugin_id,
                path = %record.path.display(),
                found = %descriptor.version,
                "Retained artifact was replaced"
            );
            return Err(LifecycleError::NoRollbackHistory {
                plugin_id: plugin_id.to_string(),
                version: record.version.to_string(),
            }
            .into());
        }
        if artifact.digest() != record.digest {
            return Err(SecurityError::IntegrityFailure {
                plugin_id: plugin_id.to_string(),
                expected: record.digest.clone(),
                actual: artifact.digest().to_string(),
            }
            .into());
        }
        Ok(artifact)
    }

    async fn rollback(&self, plugin_id: &str, version: &str) -> PluginResult<PluginDescriptor> {
        let record = self
            .history
            .find(plugin_id, version)
            .ok_or_else(|| LifecycleError::NoRollbackHistory {
                plugin_id: plugin_id.to_string(),
                version: version.to_string(),
            })?;

        let artifact = self.retained_artifact(plugin_id, &record).await?;
        let descriptor = if self.registry.contains(plugin_id) {
            self.replace(plugin_id, artifact, &record.entry_point).await?
        } else {
            self.restore(plugin_id, artifact, &record.entry_point).await?
        };

        tracing::info!(plugin_id = %plugin_id, version = %descriptor.version, "Plugin rolled back");
        self.emit(RuntimeEvent::RolledBack {
            plugin_id: plugin_id.to_string(),
            version: descriptor.version.clone(),
        });
        Ok(descriptor)
    }

    // Configuration

    /// Apply a change to the stored configuration and push the result to the
    /// plugin. A plugin that is `Running` passes through `Updating`; if it
    /// rejects the configuration the stored documents are restored.
    async fn change_configuration<F>(&self, plugin_id: &str, change: F) -> PluginResult<ConfigMap>
    where
        F: FnOnce(&ConfigStore) -> PluginResult<ConfigMap> + Send,
    {
        let lock = self.op_lock(plugin_id);
        let _guard = lock.lock().await;
        let entry = self.registry.require(plugin_id)?;

        let snapshot = self.configs.export(plugin_id)?;
        let applied = change(&self.configs)?;

        let state = entry.state();
        if state.is_initialized_or_better() {
            let running = state == PluginState::Running;
            if running {
                self.transition(&entry, PluginState::Updating)?;
            }

            let pushed = applied.clone();
            let result = self
                .invoke(&entry, "update_configuration", move |plugin| async move {
                    plugin.update_configuration(pushed).await
                })
                .await;

            if let Err(e) = result {
                if let Err(restore) = self.configs.import(plugin_id, snapshot) {
                    tracing::warn!(plugin_id = %plugin_id, error = %restore, "Could not restore configuration");
                }
                return Err(e);
            }
            if running {
                self.transition(&entry, PluginState::Running)?;
            }
        }

        tracing::debug!(plugin_id = %plugin_id, "Plugin configuration changed");
        self.emit(RuntimeEvent::ConfigurationChanged {
            plugin_id: plugin_id.to_string(),
        });
        Ok(applied)
    }

    // Health and anomalies

    async fn health(&self, plugin_id: &str) -> PluginResult<HealthReport> {
        let entry = self.registry.require(plugin_id)?;
        let tracked = entry.state();

        let instance = Arc::clone(entry.instance());
        let reported = match self
            .executor
            .call(self.config.execution.call_timeout(), async move {
                Ok::<_, anyhow::Error>(instance.health().await)
            })
            .await
        {
            Ok(health) => Some(health),
            Err(failure) => {
                if matches!(failure, CallFailure::TimedOut { .. }) {
                    entry.record_timeout();
                }
                tracing::debug!(plugin_id = %plugin_id, error = %failure, "Health query failed");
                None
            }
        };

        let state_mismatch = tracked.is_stable() && entry.instance().state() != tracked;
        let signals = entry.with_lifecycle(|lifecycle| HealthSignals {
            crash_count: lifecycle.stats().crash_count(),
            timeout_count: lifecycle.stats().timeout_count(),
            state_mismatch,
        });

        Ok(HealthReport::new(plugin_id, tracked, signals, reported))
    }

    async fn check_health_all(self: &Arc<Self>) -> Vec<HealthReport> {
        let mut reports = Vec::new();
        for plugin_id in self.registry.ids() {
            let report = match self.health(&plugin_id).await {
                Ok(report) => report,
                Err(_) => continue,
            };

            if report.requires_attention() {
                tracing::warn!(
                    plugin_id = %plugin_id,
                    level = %report.level,
                    score = report.score,
                    "Plugin health requires attention"
                );
                self.emit(RuntimeEvent::HealthAttention {
                    plugin_id: plugin_id.clone(),
                    level: report.level,
                    score: report.score,
                });
                let activity = ActivityReport {
                    health_level: Some(report.level),
                    ..ActivityReport::default()
                };
                if let Err(e) = self.report_activity(&plugin_id, &activity) {
                    tracing::debug!(plugin_id = %plugin_id, error = %e, "Anomaly routing skipped");
                }
            }
            reports.push(report);
        }
        reports
    }

    fn report_activity(self: &Arc<Self>, plugin_id: &str, report: &ActivityReport) -> PluginResult<AnomalyFinding> {
        self.registry.require(plugin_id)?;
        let finding = self.security.detect_suspicious_activity(plugin_id, report)?;

        if finding.severity > AnomalySeverity::None {
            self.emit(RuntimeEvent::AnomalyDetected {
                plugin_id: plugin_id.to_string(),
                severity: finding.severity,
                action: finding.action.clone(),
            });
        }

        if finding.action == MitigationAction::Disabled {
            let inner = Arc::clone(self);
            let id = plugin_id.to_string();
            self.track(tokio::spawn(async move {
                if let Err(e) = inner.stop_one(&id).await {
                    tracing::warn!(plugin_id = %id, error = %e, "Could not stop disabled plugin");
                }
            }));
        }

        Ok(finding)
    }

    fn spawn_health_monitor(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let interval = self.config.orchestrator.health_check_interval()?;
        let weak: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                let reports = inner.check_health_all().await;
                tracing::debug!(plugins = reports.len(), "Health check completed");
            }
        }))
    }

    async fn shutdown(&self) {
        let ids = self.registry.ids();
        let order = self
            .dependencies
            .compute_load_order(&ids)
            .unwrap_or_else(|_| ids.clone());

        for plugin_id in order.iter().rev() {
            self.discard(plugin_id).await;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.pool.close();
        tracing::info!("Plugin runtime shut down");
    }
}

/// Plugin runtime façade.
///
/// Cheap to clone; clones share the same runtime. Created once by the host
/// and passed by reference to whatever needs it.
///
/// # Examples
///
/// ```rust,no_run
/// use plexus_core::config::RuntimeConfig;
/// use plexus_core::plugin::{FactoryTable, PluginRuntime};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let factories = FactoryTable::new();
/// // factories.register("notes.Main", || std::sync::Arc::new(Notes::default()));
///
/// let runtime = PluginRuntime::new(RuntimeConfig::default(), factories)?;
/// runtime.start_background_tasks();
///
/// let descriptor = runtime.load_plugin("plugins/notes.zip", "").await?;
/// runtime.initialize_plugin(&descriptor.id, None).await?;
/// runtime.start_plugin(&descriptor.id).await?;
///
/// runtime.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PluginRuntime {
    inner: Arc<RuntimeInner>,
}

impl PluginRuntime {
    /// Build a runtime from a validated configuration.
    pub fn new(config: RuntimeConfig, factories: FactoryTable) -> crate::Result<Self> {
        ConfigValidator::validate(&config)?;

        let security = Arc::new(SecurityManager::new(config.security.clone()));
        let configs = match &config.orchestrator.config_dir {
            Some(dir) => ConfigStore::with_root(dir),
            None => ConfigStore::new(),
        };
        let (events, _) = broadcast::channel(config.orchestrator.event_capacity.max(1));

        let inner = RuntimeInner {
            loader: PluginLoader::new(config.loader.clone(), factories),
            security,
            dependencies: DependencyResolver::new(),
            registry: PluginRegistry::new(),
            configs,
            history: ArtifactHistory::new(
                config.orchestrator.max_history_per_plugin,
                config.orchestrator.backup_dir.clone(),
            ),
            pool: WorkerPool::new(config.execution.max_concurrent_operations),
            executor: PluginExecutor::new(config.execution.call_timeout()),
            events,
            op_locks: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            started_at: Instant::now(),
            config,
        };

        tracing::info!(
            max_concurrent_operations = inner.config.execution.max_concurrent_operations,
            host_api_version = inner.config.loader.host_api_version,
            "Plugin runtime created"
        );
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Spawn the temporary-grant sweeper and, when configured, the health
    /// monitor. Must be called inside a tokio runtime.
    pub fn start_background_tasks(&self) -> usize {
        let mut spawned = 0;
        self.inner.track(self.inner.security.spawn_expiry_sweeper());
        spawned += 1;
        if let Some(monitor) = self.inner.spawn_health_monitor() {
            self.inner.track(monitor);
            spawned += 1;
        }
        tracing::debug!(tasks = spawned, "Background tasks started");
        spawned
    }

    async fn submit<T, Fut>(&self, operation: &'static str, plugin_id: &str, work: Fut) -> PluginResult<T>
    where
        Fut: Future<Output = PluginResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(LifecycleError::ShuttingDown.into());
        }

        let handle = self.inner.pool.spawn(work)?;
        let timeout = self.inner.config.execution.transition_timeout();
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => Err(PluginError::internal(operation, e.to_string())),
            Err(_) => {
                tracing::warn!(
                    plugin_id = %plugin_id,
                    operation = operation,
                    "Caller timed out; operation continues in the background"
                );
                Err(PluginError::timeout(
                    plugin_id,
                    operation,
                    timeout.as_millis().min(u64::MAX as u128) as u64,
                ))
            }
        }
    }

    /// Runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Entry-point factory table.
    pub fn factories(&self) -> &FactoryTable {
        self.inner.loader.factories()
    }

    /// Security layer.
    pub fn security(&self) -> &Arc<SecurityManager> {
        &self.inner.security
    }

    /// Dependency resolver.
    pub fn dependencies(&self) -> &DependencyResolver {
        &self.inner.dependencies
    }

    /// Subscribe to runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.inner.events.subscribe()
    }

    /// Worker pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Time since the runtime was created.
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Whether `shutdown` has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    // Lifecycle

    /// Load, check and admit the artifact at `path`.
    ///
    /// An empty `entry_point` uses the manifest's `main-class`. A failure at
    /// any stage leaves nothing registered.
    pub async fn load_plugin(&self, path: impl AsRef<Path>, entry_point: &str) -> PluginResult<PluginDescriptor> {
        let path = path.as_ref().to_path_buf();
        let label = path.display().to_string();
        let entry_point = entry_point.to_string();
        let inner = Arc::clone(&self.inner);
        self.submit("load", &label, async move { inner.load(&path, &entry_point).await })
            .await
    }

    /// Load several artifacts, admit them in dependency order and then
    /// initialize them in that order.
    ///
    /// Stops at the first failure; plugins admitted before it stay loaded.
    /// Two artifacts declaring the same id fail the batch before anything
    /// is admitted.
    pub async fn load_plugins(&self, batch: Vec<ArtifactRef>) -> PluginResult<Vec<PluginDescriptor>> {
        let mut artifacts: HashMap<String, (PluginArtifact, String)> = HashMap::new();
        let mut descriptors = Vec::new();
        for artifact_ref in batch {
            let artifact = self.inner.loader.read_artifact(&artifact_ref.path).await?;
            let plugin_id = artifact.plugin_id().to_string();
            if artifacts.contains_key(&plugin_id) {
                return Err(LifecycleError::AlreadyLoaded { plugin_id }.into());
            }
            descriptors.push(artifact.descriptor().clone());
            artifacts.insert(plugin_id, (artifact, artifact_ref.entry_point));
        }

        let refs: Vec<&PluginDescriptor> = descriptors.iter().collect();
        let order = DependencyResolver::order_descriptors(&refs)?;
        tracing::debug!(order = ?order, "Batch load order");

        let mut loaded = Vec::new();
        for plugin_id in &order {
            let Some((artifact, entry_point)) = artifacts.remove(plugin_id) else {
                continue;
            };
            let inner = Arc::clone(&self.inner);
            let descriptor = self
                .submit("load", plugin_id, async move { inner.admit(artifact, &entry_point).await })
                .await?;
            loaded.push(descriptor);
        }

        for descriptor in &loaded {
            self.initialize_plugin(&descriptor.id, None).await?;
        }
        Ok(loaded)
    }

    /// Initialize a loaded plugin.
    ///
    /// Requires a security profile that is not disabled and every dependency
    /// at `Initialized` or better. `config` replaces the active profile
    /// before the call; `None` uses the stored configuration.
    pub async fn initialize_plugin(&self, plugin_id: &str, config: Option<ConfigMap>) -> PluginResult<()> {
        let inner = Arc::clone(&self.inner);
        let id = plugin_id.to_string();
        self.submit("initialize", plugin_id, async move { inner.initialize(&id, config).await })
            .await
    }

    /// Initialize `ids` in load order, each completing before the next begins.
    pub async fn initialize_plugins(&self, ids: &[String]) -> PluginResult<Vec<String>> {
        let order = self.inner.dependencies.compute_load_order(ids)?;
        for plugin_id in &order {
            self.initialize_plugin(plugin_id, None).await?;
        }
        Ok(order)
    }

    /// Start a plugin, first starting its stopped dependencies.
    pub async fn start_plugin(&self, plugin_id: &str) -> PluginResult<()> {
        let inner = Arc::clone(&self.inner);
        let id = plugin_id.to_string();
        self.submit("start", plugin_id, async move { inner.start(&id).await })
            .await
    }

    /// Stop a plugin, first stopping its running dependents.
    pub async fn stop_plugin(&self, plugin_id: &str) -> PluginResult<()> {
        let inner = Arc::clone(&self.inner);
        let id = plugin_id.to_string();
        self.submit("stop", plugin_id, async move { inner.stop(&id).await })
            .await
    }

    async fn change_state(&self, operation: &'static str, plugin_id: &str, target: PluginState) -> PluginResult<()> {
        let inner = Arc::clone(&self.inner);
        let id = plugin_id.to_string();
        self.submit(operation, plugin_id, async move { inner.change_state(&id, target).await })
            .await
    }

    /// Suspend a running plugin.
    pub async fn pause_plugin(&self, plugin_id: &str) -> PluginResult<()> {
        self.change_state("pause", plugin_id, PluginState::Paused).await
    }

    /// Resume a paused or debugging plugin.
    pub async fn resume_plugin(&self, plugin_id: &str) -> PluginResult<()> {
        self.change_state("resume", plugin_id, PluginState::Running).await
    }

    /// Put a running plugin under diagnostics.
    pub async fn enter_debug(&self, plugin_id: &str) -> PluginResult<()> {
        self.change_state("debug", plugin_id, PluginState::Debug).await
    }

    /// Unload a plugin that no loaded plugin depends on.
    pub async fn unload_plugin(&self, plugin_id: &str) -> PluginResult<()> {
        let inner = Arc::clone(&self.inner);
        let id = plugin_id.to_string();
        self.submit("unload", plugin_id, async move { inner.unload(&id, false).await })
            .await
    }

    /// Unload a plugin even when loaded plugins depend on it.
    pub async fn force_unload_plugin(&self, plugin_id: &str) -> PluginResult<()> {
        let inner = Arc::clone(&self.inner);
        let id = plugin_id.to_string();
        self.submit("unload", plugin_id, async move { inner.unload(&id, true).await })
            .await
    }

    /// Replace a plugin with the artifact at `path`.
    ///
    /// Unloads the old instance, loads the new one, restores the previous
    /// configuration, initializes it and starts it when the old one was
    /// active. Any failure leaves the plugin unloaded.
    pub async fn update_plugin(
        &self,
        plugin_id: &str,
        path: impl AsRef<Path>,
        entry_point: &str,
    ) -> PluginResult<PluginDescriptor> {
        let inner = Arc::clone(&self.inner);
        let id = plugin_id.to_string();
        let path = path.as_ref().to_path_buf();
        let entry_point = entry_point.to_string();
        self.submit("update", plugin_id, async move { inner.update(&id, &path, &entry_point).await })
            .await
    }

    /// Restore a retained version.
    ///
    /// # Errors
    /// `LifecycleError::NoRollbackHistory` when `version` was never
    /// retained for this plugin.
    pub async fn rollback_plugin(&self, plugin_id: &str, version: &str) -> PluginResult<PluginDescriptor> {
        let inner = Arc::clone(&self.inner);
        let id = plugin_id.to_string();
        let version = version.to_string();
        self.submit("rollback", plugin_id, async move { inner.rollback(&id, &version).await })
            .await
    }

    /// Versions retained for rollback, oldest first.
    pub fn retained_versions(&self, plugin_id: &str) -> Vec<PluginVersion> {
        self.inner.history.versions(plugin_id)
    }

    /// Consult the resolver for a descriptor's dependencies.
    pub fn check_dependencies(&self, descriptor: &PluginDescriptor) -> PluginResult<()> {
        Ok(self.inner.dependencies.check_dependencies(descriptor)?)
    }

    /// Topological order of `ids`, dependencies first.
    pub fn compute_load_order(&self, ids: &[String]) -> PluginResult<Vec<String>> {
        Ok(self.inner.dependencies.compute_load_order(ids)?)
    }

    // Calls

    /// Deliver an event with a timeout; failures come back as error
    /// responses.
    ///
    /// # Errors
    /// Fails only when the plugin is unknown, disabled or not running.
    pub async fn execute(
        &self,
        plugin_id: &str,
        event: PluginEvent,
        timeout: Option<Duration>,
    ) -> PluginResult<PluginResponse> {
        let entry = self.inner.registry.require(plugin_id)?;
        if self.inner.security.is_disabled(plugin_id) {
            return Err(SecurityError::Disabled {
                plugin_id: plugin_id.to_string(),
            }
            .into());
        }

        let state = entry.state();
        if !matches!(state, PluginState::Running | PluginState::Debug) {
            return Err(LifecycleError::OperationFailed {
                plugin_id: plugin_id.to_string(),
                operation: "execute".to_string(),
                reason: format!("plugin is {state}, not running"),
            }
            .into());
        }

        let outcome = self
            .inner
            .executor
            .execute(plugin_id, Arc::clone(entry.instance()), event, timeout)
            .await;
        entry.metrics().record(outcome.outcome, outcome.elapsed);
        if outcome.outcome == CallOutcome::Timeout {
            entry.record_timeout();
        }
        Ok(outcome.response)
    }

    /// Deliver an event with the default call timeout.
    pub async fn dispatch_event(
        &self,
        plugin_id: &str,
        event_type: &str,
        payload: Value,
    ) -> PluginResult<PluginResponse> {
        self.execute(plugin_id, PluginEvent::new(event_type, payload), None)
            .await
    }

    /// Deliver an event to every running plugin concurrently.
    pub async fn broadcast_event(&self, event_type: &str, payload: Value) -> Vec<(String, PluginResponse)> {
        let ids = self.inner.registry.ids_in_state(PluginState::Running);
        let calls = ids.into_iter().map(|plugin_id| {
            let event = PluginEvent::new(event_type, payload.clone());
            async move {
                let response = self.execute(&plugin_id, event, None).await;
                (plugin_id, response)
            }
        });

        futures::future::join_all(calls)
            .await
            .into_iter()
            .filter_map(|(plugin_id, response)| response.ok().map(|response| (plugin_id, response)))
            .collect()
    }

    // Introspection

    /// Tracked lifecycle state.
    pub fn get_state(&self, plugin_id: &str) -> PluginResult<PluginState> {
        Ok(self.inner.registry.require(plugin_id)?.state())
    }

    /// Descriptor of a loaded plugin.
    pub fn get_descriptor(&self, plugin_id: &str) -> PluginResult<PluginDescriptor> {
        Ok(self.inner.registry.require(plugin_id)?.descriptor().clone())
    }

    /// Host score blended with the plugin's own report.
    pub async fn get_health(&self, plugin_id: &str) -> PluginResult<HealthReport> {
        self.inner.health(plugin_id).await
    }

    /// Host-side call metrics plus plugin-reported metrics.
    pub fn get_metrics(&self, plugin_id: &str) -> PluginResult<PluginMetricsReport> {
        let entry = self.inner.registry.require(plugin_id)?;
        Ok(PluginMetricsReport {
            plugin_id: plugin_id.to_string(),
            calls: entry.metrics().snapshot(),
            transitions: entry.with_lifecycle(|lifecycle| lifecycle.stats().total_transitions()),
            reported: entry.instance().metrics(),
        })
    }

    /// Every loaded plugin.
    pub fn list_plugins(&self) -> Vec<PluginSummary> {
        self.inner.registry.list()
    }

    /// Plugins whose name, description or tags contain `query`.
    pub fn search_plugins(&self, query: &str) -> Vec<PluginSummary> {
        self.inner.registry.search(query)
    }

    /// Plugins with the given type tag.
    pub fn plugins_by_type(&self, plugin_type: &str) -> Vec<PluginSummary> {
        self.inner.registry.by_type(plugin_type)
    }

    /// Whether `plugin_id` is loaded.
    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.inner.registry.contains(plugin_id)
    }

    /// Security audit trail of one plugin.
    pub fn audit_log(&self, plugin_id: &str) -> Vec<AuditEntry> {
        self.inner.security.audit_entries(plugin_id)
    }

    // Permissions

    /// Audited permission check.
    pub fn check_permission(&self, plugin_id: &str, permission: Permission) -> bool {
        self.inner.security.check_permission(plugin_id, permission)
    }

    /// Grant a permission within the plugin's security level.
    pub fn grant_permission(&self, plugin_id: &str, permission: Permission, temporary: bool) -> PluginResult<()> {
        Ok(self
            .inner
            .security
            .grant_permission(plugin_id, permission, temporary)?)
    }

    /// Remove a permission.
    pub fn revoke_permission(&self, plugin_id: &str, permission: Permission) -> bool {
        self.inner.security.revoke_permission(plugin_id, permission)
    }

    /// Currently held permissions.
    pub fn granted_permissions(&self, plugin_id: &str) -> PermissionSet {
        self.inner.security.granted_permissions(plugin_id)
    }

    // Configuration

    /// Active configuration.
    pub fn get_configuration(&self, plugin_id: &str) -> PluginResult<ConfigMap> {
        self.inner.configs.get(plugin_id)
    }

    async fn change_configuration<F>(&self, plugin_id: &str, change: F) -> PluginResult<ConfigMap>
    where
        F: FnOnce(&ConfigStore) -> PluginResult<ConfigMap> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let id = plugin_id.to_string();
        self.submit("configure", plugin_id, async move {
            inner.change_configuration(&id, change).await
        })
        .await
    }

    /// Replace the active profile and push it to the plugin.
    pub async fn update_configuration(&self, plugin_id: &str, config: ConfigMap) -> PluginResult<ConfigMap> {
        let id = plugin_id.to_string();
        self.change_configuration(plugin_id, move |store| store.replace(&id, config))
            .await
    }

    /// Set a single key of the active profile.
    pub async fn set_configuration_value(&self, plugin_id: &str, key: &str, value: Value) -> PluginResult<ConfigMap> {
        let id = plugin_id.to_string();
        let key = key.to_string();
        self.change_configuration(plugin_id, move |store| store.set_value(&id, &key, value))
            .await
    }

    /// Create a profile; `None` copies the active profile.
    pub fn create_profile(&self, plugin_id: &str, name: &str, config: Option<ConfigMap>) -> PluginResult<()> {
        self.inner.configs.create_profile(plugin_id, name, config)
    }

    /// Activate a profile without reloading the plugin.
    pub async fn switch_profile(&self, plugin_id: &str, name: &str) -> PluginResult<ConfigMap> {
        let id = plugin_id.to_string();
        let name = name.to_string();
        self.change_configuration(plugin_id, move |store| store.switch_profile(&id, &name))
            .await
    }

    /// Delete an inactive profile.
    pub fn delete_profile(&self, plugin_id: &str, name: &str) -> PluginResult<()> {
        self.inner.configs.delete_profile(plugin_id, name)
    }

    /// Profile names.
    pub fn list_profiles(&self, plugin_id: &str) -> PluginResult<Vec<String>> {
        self.inner.configs.list_profiles(plugin_id)
    }

    /// Export every profile as an opaque document.
    pub fn export_configuration(&self, plugin_id: &str) -> PluginResult<Value> {
        self.inner.configs.export(plugin_id)
    }

    /// Import an exported document and push the active profile.
    pub async fn import_configuration(&self, plugin_id: &str, document: Value) -> PluginResult<ConfigMap> {
        let id = plugin_id.to_string();
        self.change_configuration(plugin_id, move |store| store.import(&id, document))
            .await
    }

    // Anomalies and health

    /// Route observed activity to anomaly detection and apply the
    /// mitigation. A high-severity finding disables the plugin and stops it
    /// in the background.
    pub fn report_activity(&self, plugin_id: &str, report: &ActivityReport) -> PluginResult<AnomalyFinding> {
        self.inner.report_activity(plugin_id, report)
    }

    /// Health of every loaded plugin; attention-worthy levels are forwarded
    /// to anomaly detection.
    pub async fn check_health_all(&self) -> Vec<HealthReport> {
        self.inner.check_health_all().await
    }

    /// Stop and unload everything in reverse load order, then stop
    /// background tasks and close the worker pool.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(plugins = self.inner.registry.len(), "Shutting down plugin runtime");
        self.inner.shutdown().await;
    }
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("plugins", &self.inner.registry.ids())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
