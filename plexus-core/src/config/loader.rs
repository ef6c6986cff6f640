//! # Configuration Loading
//!
//! Layers, later wins: built-in defaults, the first configuration file found
//! on the search path, then `PLEXUS_`-prefixed environment variables. The
//! merged document is validated before it is returned.
//!
//! Environment keys use `__` between sections so field names may keep their
//! underscores: `PLEXUS_EXECUTION__CALL_TIMEOUT_MS=2000` sets
//! `execution.call_timeout_ms`.

use crate::{
    Error, Result,
    config::{schema::RuntimeConfig, validator::ConfigValidator},
};
use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

const CONFIG_FILE_NAMES: [&str; 2] = ["plexus.toml", "config.toml"];

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    env_prefix: String,
    overrides: BTreeMap<String, toml::Value>,
}

impl ConfigLoader {
    /// Create a loader searching `.`, `./config` and the user config
    /// directory.
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("."), PathBuf::from("./config")];
        if let Some(dir) = dirs::config_dir() {
            search_paths.push(dir.join("plexus"));
        }

        Self {
            search_paths,
            env_prefix: "PLEXUS".to_string(),
            overrides: BTreeMap::new(),
        }
    }

    /// Search only the given directories.
    pub fn with_search_paths<P: AsRef<Path>>(mut self, paths: &[P]) -> Self {
        self.search_paths = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        self
    }

    /// Add a search path for configuration files
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Set the environment variable prefix
    pub fn with_env_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.as_ref().to_string();
        self
    }

    /// Set a dotted key after every other source has been applied.
    pub fn with_override<V: Into<toml::Value>>(mut self, key: &str, value: V) -> Self {
        self.overrides.insert(key.to_string(), value.into());
        self
    }

    /// Load configuration from all available sources
    pub fn load(&self) -> Result<RuntimeConfig> {
        self.load_with_env(env::vars())
    }

    /// Load using `vars` in place of the process environment.
    pub fn load_with_env<I>(&self, vars: I) -> Result<RuntimeConfig>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config_value = Self::defaults()?;

        if let Some(config_path) = self.find_config_file() {
            let file_config = self.load_config_file(&config_path)?;
            config_value = Self::merge_config(config_value, file_config);
            info!(path = %config_path.display(), "Loaded configuration file");
        } else {
            debug!("No configuration file found in search paths");
        }

        let applied = self.apply_env_vars(&mut config_value, vars);
        debug!(count = applied, "Applied environment variables");

        for (key, value) in &self.overrides {
            let parts: Vec<&str> = key.split('.').collect();
            Self::set_nested_value(&mut config_value, &parts, value.clone());
        }

        let config = Self::finish(config_value)?;
        info!("Configuration loaded and validated successfully");
        Ok(config)
    }

    /// Load defaults overlaid with a single file; no environment.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<RuntimeConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration from file");

        let file_config = self.load_config_file(path)?;
        Self::finish(Self::merge_config(Self::defaults()?, file_config))
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, config: &RuntimeConfig, path: P) -> Result<()> {
        let path = path.as_ref();
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| Error::configuration(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, toml_string).map_err(|e| Error::io(path, &e))?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Directories searched for configuration files.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Environment variable prefix.
    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    fn defaults() -> Result<toml::Value> {
        toml::Value::try_from(RuntimeConfig::default())
            .map_err(|e| Error::configuration(format!("Failed to serialize default config: {e}")))
    }

    fn finish(value: toml::Value) -> Result<RuntimeConfig> {
        let config: RuntimeConfig = value.try_into()?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
            .find(|candidate| candidate.is_file())
    }

    fn load_config_file(&self, path: &Path) -> Result<toml::Value> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, &e))?;
        content.parse::<toml::Value>().map_err(|e| {
            Error::configuration(format!("Failed to parse config file {}: {e}", path.display()))
        })
    }

    /// Merge two TOML documents, tables recursively.
    fn merge_config(mut base: toml::Value, override_value: toml::Value) -> toml::Value {
        match (&mut base, override_value) {
            (toml::Value::Table(base_table), toml::Value::Table(override_table)) => {
                for (key, value) in override_table {
                    match base_table.remove(&key) {
                        Some(existing) if existing.is_table() && value.is_table() => {
                            base_table.insert(key, Self::merge_config(existing, value));
                        }
                        _ => {
                            base_table.insert(key, value);
                        }
                    }
                }
                base
            }
            (_, other) => other,
        }
    }

    fn apply_env_vars<I>(&self, config: &mut toml::Value, vars: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix = format!("{}_", self.env_prefix);
        let mut applied = 0;

        for (key, value) in vars {
            let Some(stripped) = key.strip_prefix(&prefix) else {
                continue;
            };
            let path = stripped.to_lowercase();
            let parts: Vec<&str> = path.split("__").filter(|p| !p.is_empty()).collect();
            if parts.is_empty() {
                warn!(variable = %key, "Ignoring environment variable without a key");
                continue;
            }
            Self::set_nested_value(config, &parts, Self::parse_env_value(&value));
            applied += 1;
        }

        applied
    }

    fn set_nested_value(config: &mut toml::Value, parts: &[&str], value: toml::Value) {
        let Some((first, rest)) = parts.split_first() else {
            return;
        };
        let toml::Value::Table(table) = config else {
            return;
        };

        if rest.is_empty() {
            table.insert((*first).to_string(), value);
        } else {
            let entry = table
                .entry((*first).to_string())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
            Self::set_nested_value(entry, rest, value);
        }
    }

    /// Parse an environment value into the closest TOML type. Arrays use
    /// TOML syntax: `["a", "b"]`.
    fn parse_env_value(value: &str) -> toml::Value {
        if value.trim_start().starts_with('[') {
            if let Ok(toml::Value::Table(mut table)) = format!("v = {value}").parse::<toml::Value>() {
                if let Some(array) = table.remove("v") {
                    return array;
                }
            }
        }
        if let Ok(b) = value.parse::<bool>() {
            return toml::Value::Boolean(b);
        }
        if let Ok(i) = value.parse::<i64>() {
            return toml::Value::Integer(i);
        }
        if let Ok(f) = value.parse::<f64>() {
            return toml::Value::Float(f);
        }
        toml::Value::String(value.to_string())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
