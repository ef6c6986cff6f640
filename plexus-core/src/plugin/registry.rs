//! Registry of loaded plugins.
//!
//! Maps plugin id to the live instance, its descriptor, isolated scope,
//! lifecycle tracker and call metrics. Reads are lock-free through
//! `DashMap`; each entry's lifecycle sits behind its own short-lived mutex,
//! never held across an await point.

use crate::plugin::descriptor::PluginDescriptor;
use crate::plugin::error::{LifecycleError, LifecycleResult};
use crate::plugin::lifecycle::{PluginLifecycle, PluginState};
use crate::plugin::loader::{LoadScope, LoadedPlugin};
use crate::plugin::metrics::CallMetrics;
use crate::plugin::traits::Plugin;
use crate::plugin::version::PluginVersion;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One loaded plugin.
pub struct PluginEntry {
    instance: Arc<dyn Plugin>,
    descriptor: PluginDescriptor,
    scope: Arc<LoadScope>,
    lifecycle: Mutex<PluginLifecycle>,
    metrics: CallMetrics,
    source: PathBuf,
    digest: String,
    loaded_at: DateTime<Utc>,
}

impl PluginEntry {
    /// Wrap a freshly loaded plugin; its lifecycle starts at `Unloaded`.
    pub fn new(loaded: LoadedPlugin) -> Self {
        let LoadedPlugin {
            instance,
            descriptor,
            scope,
            artifact,
        } = loaded;

        Self {
            instance,
            lifecycle: Mutex::new(PluginLifecycle::new(descriptor.id.clone())),
            descriptor,
            scope,
            metrics: CallMetrics::new(),
            source: artifact.source().to_path_buf(),
            digest: artifact.digest().to_string(),
            loaded_at: Utc::now(),
        }
    }

    /// Plugin id.
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Live instance.
    pub fn instance(&self) -> &Arc<dyn Plugin> {
        &self.instance
    }

    /// Static descriptor.
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Isolated resource scope.
    pub fn scope(&self) -> &Arc<LoadScope> {
        &self.scope
    }

    /// Host-side call metrics.
    pub fn metrics(&self) -> &CallMetrics {
        &self.metrics
    }

    /// Artifact path.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Artifact content digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Admission time.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Tracked lifecycle state.
    pub fn state(&self) -> PluginState {
        self.lifecycle.lock().current_state()
    }

    /// Apply one transition; returns the previous state.
    pub fn transition(&self, target: PluginState) -> LifecycleResult<PluginState> {
        self.lifecycle.lock().transition_to(target)
    }

    /// Move to `Error` when the current state allows it.
    pub fn mark_failed(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.stats().record_crash();
        lifecycle.transition_to(PluginState::Error).is_ok()
    }

    /// Count a contract call timeout.
    pub fn record_timeout(&self) {
        self.lifecycle.lock().stats().record_timeout();
    }

    /// Run `f` with the lifecycle tracker locked.
    pub fn with_lifecycle<R>(&self, f: impl FnOnce(&PluginLifecycle) -> R) -> R {
        f(&self.lifecycle.lock())
    }

    /// Listing view.
    pub fn summary(&self) -> PluginSummary {
        PluginSummary {
            id: self.descriptor.id.clone(),
            name: self.descriptor.name.clone(),
            version: self.descriptor.version.clone(),
            plugin_type: self.descriptor.plugin_type.clone(),
            state: self.state(),
            loaded_at: self.loaded_at,
        }
    }
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEntry")
            .field("id", &self.descriptor.id)
            .field("version", &self.descriptor.version)
            .field("state", &self.state())
            .field("scope", &self.scope.id())
            .finish()
    }
}

/// Row returned by listing queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSummary {
    /// Plugin id
    pub id: String,
    /// Display name
    pub name: String,
    /// Version
    pub version: PluginVersion,
    /// Type tag
    pub plugin_type: String,
    /// Current state
    pub state: PluginState,
    /// Admission time
    pub loaded_at: DateTime<Utc>,
}

/// Loaded plugins keyed by id.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, Arc<PluginEntry>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an entry; fails if the id is taken.
    pub fn insert(&self, entry: Arc<PluginEntry>) -> LifecycleResult<()> {
        use dashmap::mapref::entry::Entry;

        match self.plugins.entry(entry.id().to_string()) {
            Entry::Occupied(_) => Err(LifecycleError::AlreadyLoaded {
                plugin_id: entry.id().to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Look up an entry.
    pub fn get(&self, plugin_id: &str) -> Option<Arc<PluginEntry>> {
        self.plugins.get(plugin_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up an entry or fail with `UnknownPlugin`.
    pub fn require(&self, plugin_id: &str) -> LifecycleResult<Arc<PluginEntry>> {
        self.get(plugin_id).ok_or_else(|| LifecycleError::UnknownPlugin {
            plugin_id: plugin_id.to_string(),
        })
    }

    /// Remove an entry, releasing the registry's hold on its scope.
    pub fn remove(&self, plugin_id: &str) -> Option<Arc<PluginEntry>> {
        self.plugins.remove(plugin_id).map(|(_, entry)| entry)
    }

    /// Whether `plugin_id` is loaded.
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.plugins.contains_key(plugin_id)
    }

    /// Loaded ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.plugins.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Every entry, sorted by id.
    pub fn entries(&self) -> Vec<Arc<PluginEntry>> {
        let mut entries: Vec<Arc<PluginEntry>> =
            self.plugins.iter().map(|entry| Arc::clone(entry.value())).collect();
        entries.sort_by(|a, b| a.id().cmp(b.id()));
        entries
    }

    /// Number of loaded plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Summaries of every loaded plugin.
    pub fn list(&self) -> Vec<PluginSummary> {
        self.entries().iter().map(|entry| entry.summary()).collect()
    }

    /// Plugins whose name, description or tags match `query`.
    pub fn search(&self, query: &str) -> Vec<PluginSummary> {
        self.entries()
            .iter()
            .filter(|entry| entry.descriptor().matches_query(query))
            .map(|entry| entry.summary())
            .collect()
    }

    /// Plugins with the given type tag.
    pub fn by_type(&self, plugin_type: &str) -> Vec<PluginSummary> {
        self.entries()
            .iter()
            .filter(|entry| entry.descriptor().plugin_type.eq_ignore_ascii_case(plugin_type))
            .map(|entry| entry.summary())
            .collect()
    }

    /// Ids currently in `state`.
    pub fn ids_in_state(&self, state: PluginState) -> Vec<String> {
        self.entries()
            .iter()
            .filter(|entry| entry.state() == state)
            .map(|entry| entry.id().to_string())
            .collect()
    }
}
