//! Plugin manifest parsing and the immutable descriptor built from it.

use crate::plugin::error::{LoadError, LoadResult};
use crate::plugin::permissions::{Permission, SecurityLevel};
use crate::plugin::version::PluginVersion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Manifest as stored in the artifact (`plugin.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginManifest {
    /// Optional explicit id; defaults to the artifact file stem
    #[serde(default)]
    pub id: Option<String>,
    /// Display name
    pub name: String,
    /// Version string
    pub version: String,
    /// Author
    pub author: String,
    /// Entry-point identifier
    pub main_class: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Plugin type tag
    #[serde(default = "default_plugin_type", rename = "type")]
    pub plugin_type: String,
    /// Minimum supported host API version
    #[serde(default = "default_app_version")]
    pub min_app_version: u32,
    /// Maximum supported host API version
    #[serde(default = "default_app_version")]
    pub target_app_version: u32,
    /// Whether the plugin exposes user configuration
    #[serde(default)]
    pub configurable: bool,
    /// Dependency entries, `"id"` or `"id>=version"`
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Requested permission tags
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Declared security level
    #[serde(default)]
    pub security_level: SecurityLevel,
    /// Search tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Hex HMAC-SHA256 of the content digest
    #[serde(default)]
    pub signature: Option<String>,
    /// Hex SHA-256 content digest
    #[serde(default)]
    pub checksum: Option<String>,
}

fn default_plugin_type() -> String {
    "general".to_string()
}

fn default_app_version() -> u32 {
    1
}

impl PluginManifest {
    /// Parse a manifest from TOML text.
    pub fn parse(source: &str, content: &str) -> LoadResult<Self> {
        toml::from_str(content).map_err(|e| LoadError::InvalidManifest {
            path: source.to_string(),
            field: "plugin.toml".to_string(),
            reason: e.to_string(),
        })
    }
}

/// A declared dependency on another plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Required plugin id
    pub id: String,
    /// Minimum acceptable version
    pub min_version: Option<PluginVersion>,
}

impl DependencySpec {
    /// Dependency without a version constraint.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            min_version: None,
        }
    }

    /// Dependency requiring at least `version`.
    pub fn at_least(id: impl Into<String>, version: impl Into<PluginVersion>) -> Self {
        Self {
            id: id.into(),
            min_version: Some(version.into()),
        }
    }
}

impl FromStr for DependencySpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entry = s.trim();
        let (id, min_version) = match entry.split_once(">=") {
            Some((id, version)) => (id.trim(), Some(PluginVersion::new(version))),
            None => (entry, None),
        };

        if id.is_empty() {
            return Err(format!("dependency entry '{s}' has no plugin id"));
        }
        if let Some(version) = &min_version {
            if !version.is_valid() {
                return Err(format!("dependency entry '{s}' has an invalid version"));
            }
        }

        Ok(Self {
            id: id.to_string(),
            min_version,
        })
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.min_version {
            Some(version) => write!(f, "{}>={}", self.id, version),
            None => f.write_str(&self.id),
        }
    }
}

/// Immutable plugin metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Process-wide unique id
    pub id: String,
    /// Display name
    pub name: String,
    /// Plugin version
    pub version: PluginVersion,
    /// Author
    pub author: String,
    /// Description
    pub description: String,
    /// Type tag
    pub plugin_type: String,
    /// Entry-point identifier from the manifest
    pub entry_point: String,
    /// Minimum supported host API version
    pub min_host_version: u32,
    /// Maximum supported host API version
    pub max_host_version: u32,
    /// Whether the plugin exposes user configuration
    pub configurable: bool,
    /// Declared permissions
    pub permissions: Vec<Permission>,
    /// Declared dependencies
    pub dependencies: Vec<DependencySpec>,
    /// Declared security level
    pub security_level: SecurityLevel,
    /// Search tags
    pub tags: Vec<String>,
    /// Declared signature
    pub signature: Option<String>,
    /// Declared content checksum
    pub checksum: Option<String>,
}

impl PluginDescriptor {
    /// Build a descriptor from a parsed manifest.
    ///
    /// `fallback_id` is used when the manifest carries no explicit `id`.
    pub fn from_manifest(source: &str, fallback_id: &str, manifest: PluginManifest) -> LoadResult<Self> {
        let invalid = |field: &str, reason: String| LoadError::InvalidManifest {
            path: source.to_string(),
            field: field.to_string(),
            reason,
        };

        for (field, value) in [
            ("name", &manifest.name),
            ("version", &manifest.version),
            ("author", &manifest.author),
            ("main-class", &manifest.main_class),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(field, "required property is empty".to_string()));
            }
        }

        let id = manifest
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(fallback_id)
            .to_string();
        if id.is_empty() {
            return Err(invalid("id", "plugin id could not be derived".to_string()));
        }

        let version = PluginVersion::new(&manifest.version);
        if !version.is_valid() {
            return Err(invalid("version", format!("'{}' has no numeric component", manifest.version)));
        }

        if manifest.min_app_version > manifest.target_app_version {
            return Err(invalid(
                "min-app-version",
                format!(
                    "min-app-version {} exceeds target-app-version {}",
                    manifest.min_app_version, manifest.target_app_version
                ),
            ));
        }

        let permissions = manifest
            .permissions
            .iter()
            .map(|p| p.parse::<Permission>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| invalid("permissions", reason))?;

        let dependencies = manifest
            .dependencies
            .iter()
            .map(|d| d.parse::<DependencySpec>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| invalid("dependencies", reason))?;

        Ok(Self {
            id,
            name: manifest.name,
            version,
            author: manifest.author,
            description: manifest.description,
            plugin_type: manifest.plugin_type,
            entry_point: manifest.main_class,
            min_host_version: manifest.min_app_version,
            max_host_version: manifest.target_app_version,
            configurable: manifest.configurable,
            permissions,
            dependencies,
            security_level: manifest.security_level,
            tags: manifest.tags,
            signature: manifest.signature,
            checksum: manifest.checksum,
        })
    }

    /// Whether the plugin supports `host_version`.
    pub fn supports_host(&self, host_version: u32) -> bool {
        (self.min_host_version..=self.max_host_version).contains(&host_version)
    }

    /// Case-insensitive match against name, description and tags.
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
            || self.tags.iter().any(|tag| tag.to_lowercase().contains(&query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
        name = "Page Turner"
        version = "1.2.0"
        author = "Reader Team"
        main-class = "reader.PageTurner"
        description = "Turns pages"
        type = "reader"
        min-app-version = 1
        target-app-version = 3
        configurable = true
        dependencies = ["core-lib>=2.0", "fonts"]
        permissions = ["read_files", "network_access"]
        security-level = "elevated"
        tags = ["paging", "ui"]
    "#;

    #[test]
    fn test_manifest_to_descriptor() {
        let manifest = PluginManifest::parse("turner.zip", MANIFEST).unwrap();
        let descriptor = PluginDescriptor::from_manifest("turner.zip", "turner", manifest).unwrap();

        assert_eq!(descriptor.id, "turner");
        assert_eq!(descriptor.entry_point, "reader.PageTurner");
        assert_eq!(descriptor.plugin_type, "reader");
        assert_eq!(descriptor.security_level, SecurityLevel::Elevated);
        assert_eq!(
            descriptor.dependencies,
            vec![DependencySpec::at_least("core-lib", "2.0"), DependencySpec::new("fonts")]
        );
        assert_eq!(
            descriptor.permissions,
            vec![Permission::ReadFiles, Permission::NetworkAccess]
        );
        assert!(descriptor.supports_host(2));
        assert!(!descriptor.supports_host(4));
        assert!(descriptor.matches_query("PAGING"));
    }

    #[test]
    fn test_optional_defaults() {
        let manifest = PluginManifest::parse(
            "a.zip",
            "name = \"A\"\nversion = \"1\"\nauthor = \"x\"\nmain-class = \"a.Main\"\n",
        )
        .unwrap();
        let descriptor = PluginDescriptor::from_manifest("a.zip", "a", manifest).unwrap();
        assert_eq!(descriptor.plugin_type, "general");
        assert_eq!(descriptor.min_host_version, 1);
        assert_eq!(descriptor.max_host_version, 1);
        assert_eq!(descriptor.security_level, SecurityLevel::Standard);
        assert!(!descriptor.configurable);
        assert!(descriptor.dependencies.is_empty());
    }

    #[test]
    fn test_missing_required_property() {
        let result = PluginManifest::parse("a.zip", "name = \"A\"\nversion = \"1\"\n");
        assert!(matches!(result, Err(LoadError::InvalidManifest { .. })));

        let manifest = PluginManifest::parse(
            "a.zip",
            "name = \"A\"\nversion = \"1\"\nauthor = \"\"\nmain-class = \"a.Main\"\n",
        )
        .unwrap();
        let error = PluginDescriptor::from_manifest("a.zip", "a", manifest).unwrap_err();
        assert!(matches!(error, LoadError::InvalidManifest { field, .. } if field == "author"));
    }

    #[test]
    fn test_unknown_permission_rejected() {
        let manifest = PluginManifest::parse(
            "a.zip",
            "name = \"A\"\nversion = \"1\"\nauthor = \"x\"\nmain-class = \"a.Main\"\npermissions = [\"mind_control\"]\n",
        )
        .unwrap();
        let error = PluginDescriptor::from_manifest("a.zip", "a", manifest).unwrap_err();
        assert!(matches!(error, LoadError::InvalidManifest { field, .. } if field == "permissions"));
    }

    #[test]
    fn test_dependency_spec_parsing() {
        let spec: DependencySpec = " core >= 2.1 ".parse().unwrap();
        assert_eq!(spec, DependencySpec::at_least("core", "2.1"));
        assert_eq!(spec.to_string(), "core>=2.1");
        assert!(">=1.0".parse::<DependencySpec>().is_err());
        assert!("core>=latest".parse::<DependencySpec>().is_err());
    }
}
