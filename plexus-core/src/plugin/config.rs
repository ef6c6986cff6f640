//! Per-plugin configuration documents.
//!
//! Each plugin has named profiles; the active profile is the plugin's
//! configuration. Documents are validated against the schema the plugin
//! supplies, a JSON-schema subset: `type: object`, `required`, and per
//! property `type`, `default`, `enum`, `minimum`, `maximum`.
//!
//! With a persistence root, every change is written to `{root}/{id}.json`
//! and picked up again when the plugin is registered.

use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::traits::ConfigMap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the profile every plugin starts with.
pub const DEFAULT_PROFILE: &str = "default";

/// Exported or persisted configuration of one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// Owning plugin
    pub plugin_id: String,
    /// Active profile name
    pub active_profile: String,
    /// Every profile
    pub profiles: BTreeMap<String, ConfigMap>,
    /// Export time
    pub exported_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ConfigEntry {
    schema: Option<Value>,
    profiles: BTreeMap<String, ConfigMap>,
    active_profile: String,
}

impl ConfigEntry {
    fn active(&self) -> ConfigMap {
        self.profiles.get(&self.active_profile).cloned().unwrap_or_default()
    }
}

/// Default values declared by `schema`.
pub fn schema_defaults(schema: Option<&Value>) -> ConfigMap {
    schema
        .and_then(|schema| schema.get("properties"))
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .filter_map(|(key, property)| property.get("default").map(|d| (key.clone(), d.clone())))
                .collect()
        })
        .unwrap_or_default()
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Validate `config` against `schema`.
pub fn validate_against_schema(plugin_id: &str, schema: &Value, config: &ConfigMap) -> PluginResult<()> {
    let reject = |key: &str, reason: String| Err(PluginError::configuration(plugin_id, key, reason));

    if let Some(kind) = schema.get("type").and_then(Value::as_str) {
        if kind != "object" {
            return reject("", format!("schema type '{kind}' is not supported for documents"));
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !config.contains_key(key) {
                return reject(key, "required key is missing".to_string());
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, property) in properties {
        let Some(value) = config.get(key) else {
            continue;
        };

        if let Some(expected) = property.get("type").and_then(Value::as_str) {
            if !type_matches(expected, value) {
                return reject(key, format!("expected {expected}, got {value}"));
            }
        }
        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return reject(key, format!("{value} is not one of {}", Value::Array(allowed.clone())));
            }
        }
        if let Some(number) = value.as_f64() {
            if let Some(minimum) = property.get("minimum").and_then(Value::as_f64) {
                if number < minimum {
                    return reject(key, format!("{number} is below minimum {minimum}"));
                }
            }
            if let Some(maximum) = property.get("maximum").and_then(Value::as_f64) {
                if number > maximum {
                    return reject(key, format!("{number} is above maximum {maximum}"));
                }
            }
        }
    }

    Ok(())
}

/// Configuration documents for every registered plugin.
#[derive(Debug, Default)]
pub struct ConfigStore {
    root: Option<PathBuf>,
    entries: DashMap<String, ConfigEntry>,
    /// Serializes changes so the persisted document matches the last commit
    writes: Mutex<()>,
}

impl ConfigStore {
    /// In-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store persisting documents under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Persistence root.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn document_path(&self, plugin_id: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(format!("{plugin_id}.json")))
    }

    fn validate(plugin_id: &str, schema: Option<&Value>, config: &ConfigMap) -> PluginResult<()> {
        match schema {
            Some(schema) => validate_against_schema(plugin_id, schema, config),
            None => Ok(()),
        }
    }

    fn with_defaults(schema: Option<&Value>, config: ConfigMap) -> ConfigMap {
        let mut merged = schema_defaults(schema);
        merged.extend(config);
        merged
    }

    fn read_document(&self, plugin_id: &str) -> PluginResult<Option<ConfigDocument>> {
        let Some(path) = self.document_path(plugin_id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| PluginError::internal("read_configuration", format!("{}: {e}", path.display())))?;
        let document: ConfigDocument = serde_json::from_str(&content)?;
        if document.plugin_id != plugin_id {
            return Err(PluginError::configuration(
                plugin_id,
                "",
                format!("persisted document belongs to '{}'", document.plugin_id),
            ));
        }
        Ok(Some(document))
    }

    fn persist(&self, plugin_id: &str, entry: &ConfigEntry) -> PluginResult<()> {
        let Some(path) = self.document_path(plugin_id) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PluginError::internal("persist_configuration", format!("{}: {e}", parent.display())))?;
        }
        let document = ConfigDocument {
            plugin_id: plugin_id.to_string(),
            active_profile: entry.active_profile.clone(),
            profiles: entry.profiles.clone(),
            exported_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&document)?;
        std::fs::write(&path, content)
            .map_err(|e| PluginError::internal("persist_configuration", format!("{}: {e}", path.display())))
    }

    fn entry_from_document(plugin_id: &str, schema: Option<Value>, document: ConfigDocument) -> PluginResult<ConfigEntry> {
        let mut profiles = BTreeMap::new();
        for (name, config) in document.profiles {
            let config = Self::with_defaults(schema.as_ref(), config);
            Self::validate(plugin_id, schema.as_ref(), &config)?;
            profiles.insert(name, config);
        }
        if !profiles.contains_key(&document.active_profile) {
            return Err(PluginError::configuration(
                plugin_id,
                "",
                format!("active profile '{}' is not defined", document.active_profile),
            ));
        }
        profiles
            .entry(DEFAULT_PROFILE.to_string())
            .or_insert_with(|| schema_defaults(schema.as_ref()));

        Ok(ConfigEntry {
            schema,
            profiles,
            active_profile: document.active_profile,
        })
    }

    /// Register a plugin's configuration.
    ///
    /// The starting document is, in order of preference: `initial`, the
    /// persisted document, then the schema defaults.
    pub fn register(
        &self,
        plugin_id: &str,
        schema: Option<Value>,
        initial: Option<ConfigMap>,
    ) -> PluginResult<ConfigMap> {
        let entry = match (initial, self.read_document(plugin_id)?) {
            (Some(initial), persisted) => {
                let config = Self::with_defaults(schema.as_ref(), initial);
                Self::validate(plugin_id, schema.as_ref(), &config)?;
                let mut entry = match persisted {
                    Some(document) => Self::entry_from_document(plugin_id, schema.clone(), document)?,
                    None => ConfigEntry {
                        schema: schema.clone(),
                        profiles: BTreeMap::new(),
                        active_profile: DEFAULT_PROFILE.to_string(),
                    },
                };
                entry.profiles.insert(entry.active_profile.clone(), config);
                entry
            }
            (None, Some(document)) => Self::entry_from_document(plugin_id, schema, document)?,
            (None, None) => {
                let config = schema_defaults(schema.as_ref());
                Self::validate(plugin_id, schema.as_ref(), &config)?;
                let mut profiles = BTreeMap::new();
                profiles.insert(DEFAULT_PROFILE.to_string(), config);
                ConfigEntry {
                    schema,
                    profiles,
                    active_profile: DEFAULT_PROFILE.to_string(),
                }
            }
        };

        let active = entry.active();
        self.entries.insert(plugin_id.to_string(), entry);
        Ok(active)
    }

    /// Whether the plugin has a registered configuration.
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.entries.contains_key(plugin_id)
    }

    /// Drop the in-memory configuration. Persisted documents are kept.
    pub fn remove(&self, plugin_id: &str) -> bool {
        self.entries.remove(plugin_id).is_some()
    }

    fn update<T>(
        &self,
        plugin_id: &str,
        change: impl FnOnce(&mut ConfigEntry) -> PluginResult<T>,
    ) -> PluginResult<T> {
        let _writes = self.writes.lock();
        // Readers are only locked out of the map for the copy and the commit,
        // never for the file write.
        let mut candidate = self
            .entries
            .get(plugin_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PluginError::not_found(plugin_id))?;

        let result = change(&mut candidate)?;
        self.persist(plugin_id, &candidate)?;

        match self.entries.get_mut(plugin_id) {
            Some(mut entry) => *entry = candidate,
            None => return Err(PluginError::not_found(plugin_id)),
        }
        Ok(result)
    }

    /// Active configuration.
    pub fn get(&self, plugin_id: &str) -> PluginResult<ConfigMap> {
        self.entries
            .get(plugin_id)
            .map(|entry| entry.active())
            .ok_or_else(|| PluginError::not_found(plugin_id))
    }

    /// Single value of the active configuration.
    pub fn get_value(&self, plugin_id: &str, key: &str) -> PluginResult<Option<Value>> {
        Ok(self.get(plugin_id)?.get(key).cloned())
    }

    /// Schema registered for the plugin.
    pub fn schema(&self, plugin_id: &str) -> Option<Value> {
        self.entries.get(plugin_id).and_then(|entry| entry.schema.clone())
    }

    /// Set one key of the active profile.
    pub fn set_value(&self, plugin_id: &str, key: &str, value: Value) -> PluginResult<ConfigMap> {
        self.update(plugin_id, |entry| {
            let mut config = entry.active();
            config.insert(key.to_string(), value);
            Self::validate(plugin_id, entry.schema.as_ref(), &config)?;
            entry.profiles.insert(entry.active_profile.clone(), config.clone());
            Ok(config)
        })
    }

    /// Replace the active profile; missing keys take their schema defaults.
    pub fn replace(&self, plugin_id: &str, config: ConfigMap) -> PluginResult<ConfigMap> {
        self.update(plugin_id, |entry| {
            let config = Self::with_defaults(entry.schema.as_ref(), config);
            Self::validate(plugin_id, entry.schema.as_ref(), &config)?;
            entry.profiles.insert(entry.active_profile.clone(), config.clone());
            Ok(config)
        })
    }

    /// Create a profile, copying the active profile when `config` is `None`.
    pub fn create_profile(&self, plugin_id: &str, name: &str, config: Option<ConfigMap>) -> PluginResult<()> {
        self.update(plugin_id, |entry| {
            if name.trim().is_empty() {
                return Err(PluginError::configuration(plugin_id, "", "profile name is empty"));
            }
            if entry.profiles.contains_key(name) {
                return Err(PluginError::configuration(
                    plugin_id,
                    "",
                    format!("profile '{name}' already exists"),
                ));
            }
            let config = match config {
                Some(config) => Self::with_defaults(entry.schema.as_ref(), config),
                None => entry.active(),
            };
            Self::validate(plugin_id, entry.schema.as_ref(), &config)?;
            entry.profiles.insert(name.to_string(), config);
            Ok(())
        })
    }

    /// Make `name` the active profile and return its configuration.
    pub fn switch_profile(&self, plugin_id: &str, name: &str) -> PluginResult<ConfigMap> {
        self.update(plugin_id, |entry| {
            let config = entry.profiles.get(name).cloned().ok_or_else(|| {
                PluginError::configuration(plugin_id, "", format!("profile '{name}' does not exist"))
            })?;
            entry.active_profile = name.to_string();
            Ok(config)
        })
    }

    /// Delete a profile other than the default or active one.
    pub fn delete_profile(&self, plugin_id: &str, name: &str) -> PluginResult<()> {
        self.update(plugin_id, |entry| {
            if name == DEFAULT_PROFILE || name == entry.active_profile {
                return Err(PluginError::configuration(
                    plugin_id,
                    "",
                    format!("profile '{name}' is in use and cannot be deleted"),
                ));
            }
            entry.profiles.remove(name).map(|_| ()).ok_or_else(|| {
                PluginError::configuration(plugin_id, "", format!("profile '{name}' does not exist"))
            })
        })
    }

    /// Profile names, sorted.
    pub fn list_profiles(&self, plugin_id: &str) -> PluginResult<Vec<String>> {
        self.entries
            .get(plugin_id)
            .map(|entry| entry.profiles.keys().cloned().collect())
            .ok_or_else(|| PluginError::not_found(plugin_id))
    }

    /// Active profile name.
    pub fn active_profile(&self, plugin_id: &str) -> PluginResult<String> {
        self.entries
            .get(plugin_id)
            .map(|entry| entry.active_profile.clone())
            .ok_or_else(|| PluginError::not_found(plugin_id))
    }

    /// Export every profile as an opaque document.
    pub fn export(&self, plugin_id: &str) -> PluginResult<Value> {
        let entry = self
            .entries
            .get(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))?;
        let document = ConfigDocument {
            plugin_id: plugin_id.to_string(),
            active_profile: entry.active_profile.clone(),
            profiles: entry.profiles.clone(),
            exported_at: Utc::now(),
        };
        Ok(serde_json::to_value(document)?)
    }

    /// Replace every profile with an exported document.
    ///
    /// The document must belong to `plugin_id` and every profile must pass
    /// the schema.
    pub fn import(&self, plugin_id: &str, document: Value) -> PluginResult<ConfigMap> {
        let document: ConfigDocument = serde_json::from_value(document)
            .map_err(|e| PluginError::configuration(plugin_id, "", format!("invalid document: {e}")))?;
        if document.plugin_id != plugin_id {
            return Err(PluginError::configuration(
                plugin_id,
                "",
                format!("document belongs to '{}'", document.plugin_id),
            ));
        }

        self.update(plugin_id, |entry| {
            *entry = Self::entry_from_document(plugin_id, entry.schema.clone(), document)?;
            Ok(entry.active())
        })
    }

    /// Re-read the persisted document.
    pub fn reload(&self, plugin_id: &str) -> PluginResult<ConfigMap> {
        let document = self.read_document(plugin_id)?.ok_or_else(|| {
            PluginError::configuration(plugin_id, "", "no persisted configuration to reload")
        })?;
        let schema = self.schema(plugin_id);
        let entry = Self::entry_from_document(plugin_id, schema, document)?;
        let active = entry.active();
        match self.entries.get_mut(plugin_id) {
            Some(mut current) => *current = entry,
            None => return Err(PluginError::not_found(plugin_id)),
        }
        Ok(active)
    }
}
