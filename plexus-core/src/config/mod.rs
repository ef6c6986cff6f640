//! Configuration management for the plugin runtime
//!
//! This module provides:
//! - A schema with defaults for every section ([`RuntimeConfig`])
//! - Layered loading from files, environment and programmatic overrides
//! - Validation of field ranges and cross-field constraints
//!
//! # Examples
//!
//! ```rust,no_run
//! use plexus_core::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .with_override("execution.call_timeout_ms", 2000)
//!     .load()
//!     .expect("Failed to load configuration");
//!
//! println!("Call timeout: {:?}", config.execution.call_timeout());
//! ```

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationContext};

use crate::Result;
use std::path::Path;

/// Load configuration from the default search paths and environment.
pub fn load_default() -> Result<RuntimeConfig> {
    ConfigLoader::new().load()
}

/// Load defaults overlaid with a specific file.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<RuntimeConfig> {
    ConfigLoader::new().load_from_file(path)
}

/// Validate a configuration object.
///
/// ```rust
/// use plexus_core::config::{self, RuntimeConfig};
///
/// config::validate(&RuntimeConfig::default()).expect("defaults are valid");
/// ```
pub fn validate(config: &RuntimeConfig) -> Result<()> {
    ConfigValidator::validate(config)
}

/// Default configuration to modify before validation.
pub fn builder() -> RuntimeConfig {
    RuntimeConfig::default()
}
