//! Retained artifacts for rollback.

use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::version::PluginVersion;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// One admitted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Plugin version the artifact declared
    pub version: PluginVersion,
    /// Where the artifact can be read from
    pub path: PathBuf,
    /// Entry point it was instantiated with
    pub entry_point: String,
    /// Content digest
    pub digest: String,
    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Per-plugin artifact history, newest last.
///
/// With a backup directory, artifacts are copied to
/// `{backup_dir}/{plugin_id}/{version}-{digest prefix}.zip` so the record
/// stays valid after the original file is replaced.
#[derive(Debug)]
pub struct ArtifactHistory {
    max_per_plugin: usize,
    backup_dir: Option<PathBuf>,
    records: RwLock<HashMap<String, VecDeque<ArtifactRecord>>>,
}

impl ArtifactHistory {
    /// Create a history keeping `max_per_plugin` records per plugin.
    pub fn new(max_per_plugin: usize, backup_dir: Option<PathBuf>) -> Self {
        Self {
            max_per_plugin: max_per_plugin.max(1),
            backup_dir,
            records: RwLock::new(HashMap::new()),
        }
    }

    fn backup_path(&self, plugin_id: &str, version: &PluginVersion, digest: &str) -> Option<PathBuf> {
        let prefix: String = digest.chars().take(12).collect();
        self.backup_dir
            .as_ref()
            .map(|dir| dir.join(plugin_id).join(format!("{version}-{prefix}.zip")))
    }

    /// Record an admitted artifact, replacing an older record of the same
    /// version.
    pub async fn record(
        &self,
        plugin_id: &str,
        version: &PluginVersion,
        source: &Path,
        entry_point: &str,
        digest: &str,
    ) -> PluginResult<ArtifactRecord> {
        let path = match self.backup_path(plugin_id, version, digest) {
            Some(target) if target != source => {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| PluginError::internal("backup_artifact", format!("{}: {e}", parent.display())))?;
                }
                tokio::fs::copy(source, &target)
                    .await
                    .map_err(|e| PluginError::internal("backup_artifact", format!("{}: {e}", source.display())))?;
                target
            }
            Some(target) => target,
            None => source.to_path_buf(),
        };

        let record = ArtifactRecord {
            version: version.clone(),
            path,
            entry_point: entry_point.to_string(),
            digest: digest.to_string(),
            recorded_at: Utc::now(),
        };

        let evicted = {
            let mut records = self.records.write();
            let history = records.entry(plugin_id.to_string()).or_default();
            history.retain(|existing| existing.version != record.version);
            history.push_back(record.clone());

            let mut evicted = Vec::new();
            while history.len() > self.max_per_plugin {
                if let Some(old) = history.pop_front() {
                    evicted.push(old);
                }
            }
            evicted
        };

        for old in evicted {
            self.discard_backup(&old).await;
        }

        tracing::debug!(
            plugin_id = %plugin_id,
            version = %record.version,
            path = %record.path.display(),
            "Recorded plugin artifact"
        );

        Ok(record)
    }

    async fn discard_backup(&self, record: &ArtifactRecord) {
        let Some(dir) = &self.backup_dir else {
            return;
        };
        if record.path.starts_with(dir) {
            if let Err(e) = tokio::fs::remove_file(&record.path).await {
                tracing::debug!(path = %record.path.display(), error = %e, "Could not remove evicted backup");
            }
        }
    }

    /// Record for a specific version.
    ///
    /// Versions compare numerically, so `"1"` finds a record of `"1.0"`.
    pub fn find(&self, plugin_id: &str, version: &str) -> Option<ArtifactRecord> {
        let version = PluginVersion::new(version);
        self.records
            .read()
            .get(plugin_id)
            .and_then(|history| history.iter().rev().find(|record| record.version == version).cloned())
    }

    /// Most recent record.
    pub fn latest(&self, plugin_id: &str) -> Option<ArtifactRecord> {
        self.records
            .read()
            .get(plugin_id)
            .and_then(|history| history.back().cloned())
    }

    /// Retained versions, oldest first.
    pub fn versions(&self, plugin_id: &str) -> Vec<PluginVersion> {
        self.records
            .read()
            .get(plugin_id)
            .map(|history| history.iter().map(|record| record.version.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop the history of one plugin.
    pub fn clear(&self, plugin_id: &str) -> usize {
        self.records
            .write()
            .remove(plugin_id)
            .map(|history| history.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bounded_history() {
        let history = ArtifactHistory::new(2, None);
        for version in ["1.0", "1.1", "1.2"] {
            history
                .record("notes", &PluginVersion::from(version), Path::new("notes.zip"), "notes.Main", "abc")
                .await
                .unwrap();
        }

        assert_eq!(
            history.versions("notes"),
            vec![PluginVersion::from("1.1"), PluginVersion::from("1.2")]
        );
        assert!(history.find("notes", "1.0").is_none());
        assert_eq!(history.latest("notes").unwrap().version.as_str(), "1.2");
    }

    #[tokio::test]
    async fn test_find_matches_equivalent_versions() {
        let history = ArtifactHistory::new(3, None);
        history
            .record("notes", &PluginVersion::from("1.0"), Path::new("notes.zip"), "notes.Main", "abc")
            .await
            .unwrap();

        assert_eq!(history.find("notes", "1").unwrap().version.as_str(), "1.0");
        assert_eq!(history.find("notes", "1.0.0").unwrap().path, PathBuf::from("notes.zip"));
        assert!(history.find("notes", "1.1").is_none());
    }

    #[tokio::test]
    async fn test_same_version_replaces_record() {
        let history = ArtifactHistory::new(5, None);
        let version = PluginVersion::from("1.0");
        history.record("notes", &version, Path::new("a.zip"), "m", "aa").await.unwrap();
        history.record("notes", &version, Path::new("b.zip"), "m", "bb").await.unwrap();

        assert_eq!(history.versions("notes").len(), 1);
        assert_eq!(history.find("notes", "1.0").unwrap().path, PathBuf::from("b.zip"));
    }

    #[tokio::test]
    async fn test_backup_copy_survives_source_removal() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("notes.zip");
        std::fs::write(&source, b"artifact").unwrap();

        let history = ArtifactHistory::new(5, Some(dir.path().join("backups")));
        let record = history
            .record("notes", &PluginVersion::from("1.0"), &source, "notes.Main", "0123456789abcdef")
            .await
            .unwrap();
        std::fs::remove_file(&source).unwrap();

        assert!(record.path.starts_with(dir.path().join("backups").join("notes")));
        assert_eq!(std::fs::read(&record.path).unwrap(), b"artifact");
        assert_eq!(history.clear("notes"), 1);
        assert!(history.find("notes", "1.0").is_none());
    }
}
