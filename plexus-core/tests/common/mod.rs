//! Shared fixtures: zip artifacts on disk and a scriptable test plugin.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use plexus_core::config::RuntimeConfig;
use plexus_core::plugin::loader::{ResourceMap, content_digest};
use plexus_core::plugin::{
    ConfigMap, FactoryTable, HostContext, Plugin, PluginEvent, PluginHealth, PluginMetadata,
    PluginResponse, PluginRuntime, PluginState,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Builder for a plugin artifact written as a zip archive.
#[derive(Debug, Clone)]
pub struct ArtifactBuilder {
    id: String,
    version: String,
    main_class: String,
    security_level: Option<String>,
    dependencies: Vec<String>,
    permissions: Vec<String>,
    tags: Vec<String>,
    plugin_type: Option<String>,
    checksum: Option<String>,
    signature: Option<String>,
    resources: ResourceMap,
}

impl ArtifactBuilder {
    pub fn new(id: &str, version: &str) -> Self {
        let mut resources = ResourceMap::new();
        resources.insert("classes.bin".to_string(), format!("{id}-{version}").into_bytes());
        Self {
            id: id.to_string(),
            version: version.to_string(),
            main_class: format!("{id}.Main"),
            security_level: None,
            dependencies: Vec::new(),
            permissions: Vec::new(),
            tags: Vec::new(),
            plugin_type: None,
            checksum: None,
            signature: None,
            resources,
        }
    }

    pub fn main_class(mut self, main_class: &str) -> Self {
        self.main_class = main_class.to_string();
        self
    }

    pub fn level(mut self, level: &str) -> Self {
        self.security_level = Some(level.to_string());
        self
    }

    pub fn depends_on(mut self, dependency: &str) -> Self {
        self.dependencies.push(dependency.to_string());
        self
    }

    pub fn permission(mut self, permission: &str) -> Self {
        self.permissions.push(permission.to_string());
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn plugin_type(mut self, plugin_type: &str) -> Self {
        self.plugin_type = Some(plugin_type.to_string());
        self
    }

    pub fn resource(mut self, name: &str, content: &[u8]) -> Self {
        self.resources.insert(name.to_string(), content.to_vec());
        self
    }

    pub fn checksum(mut self, checksum: &str) -> Self {
        self.checksum = Some(checksum.to_string());
        self
    }

    pub fn signature(mut self, signature: &str) -> Self {
        self.signature = Some(signature.to_string());
        self
    }

    /// Digest the loader will compute for this artifact.
    pub fn digest(&self) -> String {
        content_digest(&self.resources)
    }

    fn manifest(&self) -> String {
        let list = |items: &[String]| {
            items
                .iter()
                .map(|item| format!("\"{item}\""))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut manifest = format!(
            "id = \"{}\"\nname = \"{} plugin\"\nversion = \"{}\"\nauthor = \"Plexus tests\"\nmain-class = \"{}\"\ndescription = \"Fixture for {}\"\n",
            self.id, self.id, self.version, self.main_class, self.id
        );
        manifest.push_str(&format!("dependencies = [{}]\n", list(&self.dependencies)));
        manifest.push_str(&format!("permissions = [{}]\n", list(&self.permissions)));
        manifest.push_str(&format!("tags = [{}]\n", list(&self.tags)));
        if let Some(level) = &self.security_level {
            manifest.push_str(&format!("security-level = \"{level}\"\n"));
        }
        if let Some(plugin_type) = &self.plugin_type {
            manifest.push_str(&format!("type = \"{plugin_type}\"\n"));
        }
        if let Some(checksum) = &self.checksum {
            manifest.push_str(&format!("checksum = \"{checksum}\"\n"));
        }
        if let Some(signature) = &self.signature {
            manifest.push_str(&format!("signature = \"{signature}\"\n"));
        }
        manifest
    }

    /// Write the archive to `dir/{file_name}`.
    pub fn write_as(&self, dir: &Path, file_name: &str) -> PathBuf {
        let path = dir.join(file_name);
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);

        zip.start_file("plugin.toml", options).unwrap();
        zip.write_all(self.manifest().as_bytes()).unwrap();
        for (name, content) in &self.resources {
            zip.start_file(name.as_str(), options).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    /// Write the archive to `dir/{id}-{version}.zip`.
    pub fn write(&self, dir: &Path) -> PathBuf {
        self.write_as(dir, &format!("{}-{}.zip", self.id, self.version))
    }
}

/// How a [`TestPlugin`] misbehaves.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub fail_start: bool,
    pub hang_start: bool,
    pub reject_configuration: bool,
    pub schema: Option<Value>,
    pub health_score: Option<u8>,
}

/// Observations shared between a test and every instance it creates.
#[derive(Debug, Default)]
pub struct Journal {
    pub calls: Mutex<Vec<String>>,
    pub configs: Mutex<Vec<ConfigMap>>,
}

impl Journal {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

/// Plugin whose contract calls are recorded in a [`Journal`].
pub struct TestPlugin {
    id: String,
    version: String,
    behavior: Behavior,
    journal: Arc<Journal>,
    state: Mutex<PluginState>,
}

impl TestPlugin {
    pub fn new(id: &str, version: &str, behavior: Behavior, journal: Arc<Journal>) -> Self {
        Self {
            id: id.to_string(),
            version: version.to_string(),
            behavior,
            journal,
            state: Mutex::new(PluginState::Loaded),
        }
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(self.id.clone(), format!("{} plugin", self.id), self.version.as_str())
    }

    fn configuration_schema(&self) -> Option<Value> {
        self.behavior.schema.clone()
    }

    async fn initialize(&self, context: HostContext, config: ConfigMap) -> anyhow::Result<()> {
        self.journal.record(format!("initialize:{}", context.plugin_id()));
        self.journal.configs.lock().push(config);
        *self.state.lock() = PluginState::Initialized;
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.journal.record(format!("start:{}", self.id));
        if self.behavior.hang_start {
            std::future::pending::<()>().await;
        }
        if self.behavior.fail_start {
            anyhow::bail!("{} refuses to start", self.id);
        }
        *self.state.lock() = PluginState::Running;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.journal.record(format!("stop:{}", self.id));
        *self.state.lock() = PluginState::Stopped;
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.journal.record(format!("destroy:{}", self.id));
        *self.state.lock() = PluginState::Unloaded;
        Ok(())
    }

    async fn handle_event(&self, event: &PluginEvent) -> anyhow::Result<PluginResponse> {
        match event.event_type.as_str() {
            "echo" => Ok(PluginResponse::success("echo").with_data("payload", event.payload.clone())),
            "version" => Ok(PluginResponse::success(self.version.clone())),
            "hang" => std::future::pending().await,
            "sleep" => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(PluginResponse::success("slept"))
            }
            _ => Ok(PluginResponse::not_handled(&event.event_type)),
        }
    }

    fn state(&self) -> PluginState {
        *self.state.lock()
    }

    async fn health(&self) -> PluginHealth {
        match self.behavior.health_score {
            Some(score) => PluginHealth::with_score(score, "scripted"),
            None => PluginHealth::healthy(),
        }
    }

    fn metrics(&self) -> HashMap<String, f64> {
        HashMap::from([("events_seen".to_string(), 1.0)])
    }

    async fn update_configuration(&self, config: ConfigMap) -> anyhow::Result<()> {
        if self.behavior.reject_configuration {
            anyhow::bail!("configuration rejected");
        }
        self.journal.configs.lock().push(config);
        Ok(())
    }
}

/// Register a [`TestPlugin`] factory under `{id}.Main`.
pub fn register(factories: &FactoryTable, id: &str, version: &str, behavior: Behavior, journal: &Arc<Journal>) {
    register_as(factories, &format!("{id}.Main"), id, version, behavior, journal);
}

/// Register a [`TestPlugin`] factory under an explicit entry point.
pub fn register_as(
    factories: &FactoryTable,
    entry_point: &str,
    id: &str,
    version: &str,
    behavior: Behavior,
    journal: &Arc<Journal>,
) {
    let id = id.to_string();
    let version = version.to_string();
    let journal = Arc::clone(journal);
    factories.register(entry_point, move || {
        Arc::new(TestPlugin::new(&id, &version, behavior.clone(), Arc::clone(&journal))) as Arc<dyn Plugin>
    });
}

/// Configuration suited to tests: short timeouts, no health monitor.
pub fn test_config(dir: &TempDir) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.execution.call_timeout_ms = 1_000;
    config.execution.transition_timeout_ms = 3_000;
    config.orchestrator.health_check_interval_ms = 0;
    config.orchestrator.backup_dir = Some(dir.path().join("backups"));
    config
}

pub fn runtime(dir: &TempDir, factories: FactoryTable) -> PluginRuntime {
    PluginRuntime::new(test_config(dir), factories).unwrap()
}

/// Poll until `plugin_id` reaches `state` or a second has passed.
pub async fn wait_for_state(runtime: &PluginRuntime, plugin_id: &str, state: PluginState) -> bool {
    for _ in 0..100 {
        if runtime.get_state(plugin_id).ok() == Some(state) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub fn object(value: Value) -> ConfigMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

pub fn notes_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "theme": { "type": "string", "default": "light", "enum": ["light", "dark"] },
            "font_size": { "type": "integer", "default": 12, "minimum": 8, "maximum": 32 },
            "sync": { "type": "boolean", "default": false }
        },
        "required": ["theme"]
    })
}
