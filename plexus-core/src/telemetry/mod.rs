//! Observability for the plugin runtime.
//!
//! Runtime code logs through `tracing` with structured fields
//! (`plugin_id`, `operation`, `state`, ...). Hosts that do not install their
//! own subscriber can call [`init_logging`] once at startup; per-plugin call
//! and lifecycle counters are exposed by
//! [`PluginRuntime::get_metrics`](crate::plugin::PluginRuntime::get_metrics).

pub mod logging;

pub use logging::{build_filter, init_logging};
