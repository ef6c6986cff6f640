//! # Plexus Core
//!
//! Host-side runtime for third-party plugins delivered as archive artifacts.
//!
//! Plexus loads a plugin artifact, verifies it (digest blocklist, signature,
//! integrity, threat and code-pattern scans, permission analysis), checks its
//! dependencies against the plugins already loaded, and then drives the
//! instance through a supervised lifecycle. Contract calls run on a bounded
//! worker pool with host-side timeouts, so a hung plugin never blocks the
//! host. Permissions are granted per security level, audited on every check,
//! and withdrawn automatically when runtime activity looks anomalous.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plexus_core::config::RuntimeConfig;
//! use plexus_core::plugin::FactoryTable;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factories = FactoryTable::new();
//!     // factories.register("com.example.Notes", || Arc::new(Notes::default()));
//!
//!     let runtime = plexus_core::init(RuntimeConfig::default(), factories).await?;
//!
//!     let descriptor = runtime.load_plugin("plugins/notes.zip", "").await?;
//!     runtime.initialize_plugin(&descriptor.id, None).await?;
//!     runtime.start_plugin(&descriptor.id).await?;
//!
//!     println!("{}", plexus_core::status(&runtime));
//!
//!     plexus_core::shutdown(&runtime).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`plugin`]: Plugin contract, loading, security, dependencies, lifecycle
//!   and the [`PluginRuntime`] orchestrator
//! - [`runtime`]: Bounded worker pool and timeout-guarded call execution
//! - [`config`]: Layered configuration loading and validation
//! - [`telemetry`]: Logging setup
//! - [`error`]: Crate-level error type
//! - [`prelude`]: Common imports for convenient usage

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod error;
pub mod plugin;
pub mod prelude;
pub mod runtime;
pub mod telemetry;

pub use crate::{
    config::RuntimeConfig,
    error::{Error, Result},
    plugin::{Plugin, PluginError, PluginResult, PluginRuntime, PluginState},
};

use crate::plugin::FactoryTable;

/// Runtime status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Whether the runtime accepts operations
    pub running: bool,
    /// Uptime in milliseconds
    pub uptime_ms: u64,
    /// Library version
    pub version: String,
    /// Loaded plugins
    pub plugins_loaded: usize,
    /// Plugins in the `Running` state
    pub plugins_running: usize,
    /// Lifecycle operations currently executing
    pub active_operations: usize,
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plexus: {} (uptime: {}ms, version: {}, plugins: {}/{} running, operations: {})",
            if self.running {
                "running"
            } else {
                "stopped"
            },
            self.uptime_ms,
            self.version,
            self.plugins_running,
            self.plugins_loaded,
            self.active_operations
        )
    }
}

/// Initialize logging, build a runtime and start its background tasks.
///
/// Logging is installed from `config.logging` unless the host already
/// installed a subscriber.
///
/// # Errors
/// Returns an error if the configuration is invalid.
pub async fn init(config: RuntimeConfig, factories: FactoryTable) -> Result<PluginRuntime> {
    let installed = telemetry::init_logging(&config.logging)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        logging_installed = installed,
        "Initializing Plexus runtime"
    );

    let runtime = PluginRuntime::new(config, factories)?;
    runtime.start_background_tasks();
    Ok(runtime)
}

/// Unload every plugin and stop the runtime.
///
/// # Errors
/// Currently infallible; kept fallible for symmetry with [`init`].
pub async fn shutdown(runtime: &PluginRuntime) -> Result<()> {
    tracing::info!("Shutting down Plexus runtime");
    runtime.shutdown().await;
    Ok(())
}

/// Current status of `runtime`.
#[must_use]
pub fn status(runtime: &PluginRuntime) -> SystemStatus {
    let plugins = runtime.list_plugins();
    SystemStatus {
        running: !runtime.is_shutting_down(),
        uptime_ms: runtime.uptime().as_millis().min(u64::MAX as u128) as u64,
        version: env!("CARGO_PKG_VERSION").to_string(),
        plugins_loaded: plugins.len(),
        plugins_running: plugins
            .iter()
            .filter(|summary| summary.state == PluginState::Running)
            .count(),
        active_operations: runtime.pool_stats().active_tasks,
    }
}
