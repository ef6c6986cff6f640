//! Artifact loading and contract verification.
//!
//! An artifact is a zip archive carrying a TOML manifest plus the plugin's
//! resources. Code is never loaded from the archive: the manifest's entry
//! point names a constructor registered by the host in a [`FactoryTable`].
//! Each loaded plugin gets its own [`LoadScope`] so resources with the same
//! name in different artifacts never collide.

use crate::config::LoaderConfig;
use crate::plugin::descriptor::{PluginDescriptor, PluginManifest};
use crate::plugin::error::{LoadError, LoadResult};
use crate::plugin::traits::Plugin;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Packaged resources keyed by entry name.
pub type ResourceMap = BTreeMap<String, Vec<u8>>;

/// Hex SHA-256 over every resource in name order (name bytes, then content).
pub fn content_digest(resources: &ResourceMap) -> String {
    let mut hasher = Sha256::new();
    for (name, content) in resources {
        hasher.update(name.as_bytes());
        hasher.update(content);
    }
    hex::encode(hasher.finalize())
}

/// A parsed plugin artifact.
#[derive(Debug, Clone)]
pub struct PluginArtifact {
    source: PathBuf,
    size: u64,
    descriptor: PluginDescriptor,
    resources: Arc<ResourceMap>,
    digest: String,
}

impl PluginArtifact {
    /// Read and parse the artifact at `path`.
    pub async fn open(path: impl AsRef<Path>, config: &LoaderConfig) -> LoadResult<Self> {
        let path = path.as_ref().to_path_buf();
        let unreadable = |reason: String| LoadError::ArtifactUnreadable {
            path: path.display().to_string(),
            reason,
        };

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        if metadata.len() > config.max_artifact_size {
            return Err(LoadError::ArtifactTooLarge {
                path: path.display().to_string(),
                size: metadata.len(),
                limit: config.max_artifact_size,
            });
        }

        let bytes = tokio::fs::read(&path).await.map_err(|e| unreadable(e.to_string()))?;
        let config = config.clone();
        let source = path.clone();
        tokio::task::spawn_blocking(move || Self::from_bytes(source, bytes, &config))
            .await
            .map_err(|e| unreadable(e.to_string()))?
    }

    /// Parse an artifact already held in memory.
    ///
    /// `source` names the artifact in errors and supplies the fallback id
    /// (its file stem).
    pub fn from_bytes(source: impl Into<PathBuf>, bytes: Vec<u8>, config: &LoaderConfig) -> LoadResult<Self> {
        let source = source.into();
        let label = source.display().to_string();
        let size = bytes.len() as u64;

        if size > config.max_artifact_size {
            return Err(LoadError::ArtifactTooLarge {
                path: label,
                size,
                limit: config.max_artifact_size,
            });
        }

        let unreadable = |reason: String| LoadError::ArtifactUnreadable {
            path: label.clone(),
            reason,
        };

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| unreadable(e.to_string()))?;
        let mut resources = ResourceMap::new();
        let mut manifest_text = None;
        let mut expanded: u64 = 0;

        for index in 0..archive.len() {
            let mut file = archive.by_index(index).map_err(|e| unreadable(e.to_string()))?;
            if file.is_dir() {
                continue;
            }

            expanded = expanded.saturating_add(file.size());
            if expanded > config.max_artifact_size {
                return Err(LoadError::ArtifactTooLarge {
                    path: label.clone(),
                    size: expanded,
                    limit: config.max_artifact_size,
                });
            }

            let name = file.name().to_string();
            let mut content = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut content).map_err(|e| unreadable(format!("{name}: {e}")))?;

            if name == config.manifest_name {
                let text = String::from_utf8(content).map_err(|_| LoadError::InvalidManifest {
                    path: label.clone(),
                    field: config.manifest_name.clone(),
                    reason: "manifest is not valid UTF-8".to_string(),
                })?;
                manifest_text = Some(text);
            } else {
                resources.insert(name, content);
            }
        }

        let manifest_text = manifest_text.ok_or_else(|| LoadError::InvalidManifest {
            path: label.clone(),
            field: config.manifest_name.clone(),
            reason: "manifest entry not found".to_string(),
        })?;

        let fallback_id = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let manifest = PluginManifest::parse(&label, &manifest_text)?;
        let descriptor = PluginDescriptor::from_manifest(&label, &fallback_id, manifest)?;
        let digest = content_digest(&resources);

        tracing::debug!(
            plugin_id = %descriptor.id,
            artifact = %label,
            size,
            resources = resources.len(),
            "Parsed plugin artifact"
        );

        Ok(Self {
            source,
            size,
            descriptor,
            resources: Arc::new(resources),
            digest,
        })
    }

    /// Where the artifact came from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Archive size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Descriptor built from the manifest.
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Plugin id declared by the artifact.
    pub fn plugin_id(&self) -> &str {
        &self.descriptor.id
    }

    /// Packaged resources, manifest excluded.
    pub fn resources(&self) -> &ResourceMap {
        &self.resources
    }

    /// Hex content digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Constructor registered for an entry point.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Entry-point identifier to constructor mapping.
///
/// Cloning shares the table.
#[derive(Clone, Default)]
pub struct FactoryTable {
    factories: Arc<DashMap<String, PluginFactory>>,
}

impl FactoryTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `entry_point`, replacing any previous one.
    pub fn register<F>(&self, entry_point: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        let entry_point = entry_point.into();
        tracing::debug!(entry_point = %entry_point, "Registered plugin factory");
        self.factories.insert(entry_point, Arc::new(factory));
    }

    /// Remove the factory for `entry_point`.
    pub fn unregister(&self, entry_point: &str) -> bool {
        self.factories.remove(entry_point).is_some()
    }

    /// Whether `entry_point` has a factory.
    pub fn contains(&self, entry_point: &str) -> bool {
        self.factories.contains_key(entry_point)
    }

    /// Registered entry points, sorted.
    pub fn entry_points(&self) -> Vec<String> {
        let mut entry_points: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        entry_points.sort();
        entry_points
    }

    /// Construct a fresh instance.
    pub fn create(&self, entry_point: &str) -> Option<Arc<dyn Plugin>> {
        let factory = self.factories.get(entry_point).map(|f| Arc::clone(f.value()))?;
        Some(factory())
    }
}

impl fmt::Debug for FactoryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryTable")
            .field("entry_points", &self.entry_points())
            .finish()
    }
}

/// Per-plugin resource namespace.
///
/// Owned by the registry entry and released when the plugin is unloaded.
#[derive(Debug)]
pub struct LoadScope {
    id: Uuid,
    plugin_id: String,
    entry_point: String,
    resources: Arc<ResourceMap>,
    created_at: DateTime<Utc>,
}

impl LoadScope {
    fn new(plugin_id: &str, entry_point: &str, resources: Arc<ResourceMap>) -> Self {
        Self {
            id: Uuid::new_v4(),
            plugin_id: plugin_id.to_string(),
            entry_point: entry_point.to_string(),
            resources,
            created_at: Utc::now(),
        }
    }

    /// Unique scope id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Plugin owning the scope.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Entry point the instance was created from.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Look up a packaged resource.
    pub fn resource(&self, name: &str) -> Option<&[u8]> {
        self.resources.get(name).map(Vec::as_slice)
    }

    /// Resource names in order.
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }
}

/// A verified live instance and the metadata it was loaded with.
#[derive(Clone)]
pub struct LoadedPlugin {
    /// Live instance
    pub instance: Arc<dyn Plugin>,
    /// Descriptor, with the entry point actually used
    pub descriptor: PluginDescriptor,
    /// Isolated resource scope
    pub scope: Arc<LoadScope>,
    /// Source artifact
    pub artifact: PluginArtifact,
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("plugin_id", &self.descriptor.id)
            .field("version", &self.descriptor.version)
            .field("scope", &self.scope.id())
            .finish()
    }
}

/// Turns artifacts into verified plugin instances.
#[derive(Debug, Clone)]
pub struct PluginLoader {
    config: LoaderConfig,
    factories: FactoryTable,
}

impl PluginLoader {
    /// Create a loader resolving entry points through `factories`.
    pub fn new(config: LoaderConfig, factories: FactoryTable) -> Self {
        Self { config, factories }
    }

    /// Loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Factory table.
    pub fn factories(&self) -> &FactoryTable {
        &self.factories
    }

    /// Read and parse an artifact without instantiating it.
    pub async fn read_artifact(&self, path: impl AsRef<Path>) -> LoadResult<PluginArtifact> {
        PluginArtifact::open(path, &self.config).await
    }

    /// Read `path` and instantiate `entry_point`.
    pub async fn load(&self, path: impl AsRef<Path>, entry_point: &str) -> LoadResult<LoadedPlugin> {
        let artifact = self.read_artifact(path).await?;
        self.instantiate(artifact, entry_point)
    }

    /// Instantiate `entry_point` for an already parsed artifact.
    ///
    /// # Errors
    /// - `IncompatibleHost`: the manifest's host range excludes this host
    /// - `ContractViolation`: no factory is registered, or the instance's
    ///   reported id or version disagrees with the manifest
    pub fn instantiate(&self, artifact: PluginArtifact, entry_point: &str) -> LoadResult<LoadedPlugin> {
        let mut descriptor = artifact.descriptor().clone();
        let plugin_id = descriptor.id.clone();

        if !descriptor.supports_host(self.config.host_api_version) {
            return Err(LoadError::IncompatibleHost {
                plugin_id,
                min: descriptor.min_host_version,
                max: descriptor.max_host_version,
                host: self.config.host_api_version,
            });
        }

        let entry_point = entry_point.trim();
        let entry_point = if entry_point.is_empty() {
            descriptor.entry_point.clone()
        } else {
            entry_point.to_string()
        };
        if entry_point != descriptor.entry_point {
            tracing::warn!(
                plugin_id = %plugin_id,
                requested = %entry_point,
                manifest = %descriptor.entry_point,
                "Entry point differs from manifest; using requested entry point"
            );
            descriptor.entry_point = entry_point.clone();
        }

        let violation = |reason: String| LoadError::ContractViolation {
            plugin_id: plugin_id.clone(),
            entry_point: entry_point.clone(),
            reason,
        };

        let instance = self
            .factories
            .create(&entry_point)
            .ok_or_else(|| violation("no factory registered for entry point".to_string()))?;

        let metadata = instance.metadata();
        if metadata.id != descriptor.id {
            return Err(violation(format!(
                "instance reports id '{}', manifest declares '{}'",
                metadata.id, descriptor.id
            )));
        }
        if metadata.version != descriptor.version {
            return Err(violation(format!(
                "instance reports version '{}', manifest declares '{}'",
                metadata.version, descriptor.version
            )));
        }

        let scope = Arc::new(LoadScope::new(&plugin_id, &entry_point, Arc::clone(&artifact.resources)));

        tracing::info!(
            plugin_id = %plugin_id,
            version = %descriptor.version,
            entry_point = %entry_point,
            scope = %scope.id(),
            "Plugin instance created"
        );

        Ok(LoadedPlugin {
            instance,
            descriptor,
            scope,
            artifact,
        })
    }
}
