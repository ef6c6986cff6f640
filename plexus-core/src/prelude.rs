//! # Prelude
//!
//! Common imports for hosts and plugin authors.

pub use crate::{
    config::{ConfigLoader, RuntimeConfig},
    error::{Error, Result},
    plugin::{
        ActivityReport, ArtifactRef, ConfigMap, DependencySpec, FactoryTable, HealthLevel,
        HealthReport, HostContext, Permission, Plugin, PluginDescriptor, PluginError, PluginEvent,
        PluginHealth, PluginMetadata, PluginResponse, PluginResult, PluginRuntime, PluginState,
        PluginVersion, RuntimeEvent, SecurityLevel,
    },
};

pub use async_trait::async_trait;
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
