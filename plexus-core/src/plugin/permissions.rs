//! Permission tags and the security levels that bound them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A single capability a plugin may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read files outside the plugin's own resources
    ReadFiles,
    /// Create or modify files
    WriteFiles,
    /// Delete files
    DeleteFiles,
    /// Internet access
    NetworkAccess,
    /// Local network access
    LocalNetworkAccess,
    /// Change host system settings
    SystemSettings,
    /// Read device information
    DeviceInfo,
    /// Camera access
    CameraAccess,
    /// Microphone access
    MicrophoneAccess,
    /// Modify the host user interface
    UiModification,
    /// Access host-managed user data
    DataAccess,
    /// Talk to other plugins
    PluginCommunication,
    /// Execute native code
    NativeCodeExecution,
    /// Use cryptographic primitives
    CryptographicOperations,
    /// Read installed certificates
    CertificateAccess,
    /// Access the key store
    KeystoreAccess,
}

/// A set of permissions with deterministic iteration order.
pub type PermissionSet = BTreeSet<Permission>;

impl Permission {
    /// Every permission, in declaration order.
    pub const ALL: [Permission; 16] = [
        Permission::ReadFiles,
        Permission::WriteFiles,
        Permission::DeleteFiles,
        Permission::NetworkAccess,
        Permission::LocalNetworkAccess,
        Permission::SystemSettings,
        Permission::DeviceInfo,
        Permission::CameraAccess,
        Permission::MicrophoneAccess,
        Permission::UiModification,
        Permission::DataAccess,
        Permission::PluginCommunication,
        Permission::NativeCodeExecution,
        Permission::CryptographicOperations,
        Permission::CertificateAccess,
        Permission::KeystoreAccess,
    ];

    /// Manifest tag for this permission.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadFiles => "read_files",
            Self::WriteFiles => "write_files",
            Self::DeleteFiles => "delete_files",
            Self::NetworkAccess => "network_access",
            Self::LocalNetworkAccess => "local_network_access",
            Self::SystemSettings => "system_settings",
            Self::DeviceInfo => "device_info",
            Self::CameraAccess => "camera_access",
            Self::MicrophoneAccess => "microphone_access",
            Self::UiModification => "ui_modification",
            Self::DataAccess => "data_access",
            Self::PluginCommunication => "plugin_communication",
            Self::NativeCodeExecution => "native_code_execution",
            Self::CryptographicOperations => "cryptographic_operations",
            Self::CertificateAccess => "certificate_access",
            Self::KeystoreAccess => "keystore_access",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| format!("unknown permission '{s}'"))
    }
}

/// Ordinal tier bounding which permissions a plugin may ever hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Read-only, UI and data access
    Minimal,
    /// Adds writes, network and inter-plugin communication
    #[default]
    Standard,
    /// Adds deletes, system settings and native code
    Elevated,
    /// Every permission
    Full,
}

const MINIMAL_ALLOWED: &[Permission] = &[
    Permission::ReadFiles,
    Permission::UiModification,
    Permission::DataAccess,
];

const STANDARD_ALLOWED: &[Permission] = &[
    Permission::ReadFiles,
    Permission::UiModification,
    Permission::DataAccess,
    Permission::WriteFiles,
    Permission::NetworkAccess,
    Permission::PluginCommunication,
];

const ELEVATED_ALLOWED: &[Permission] = &[
    Permission::ReadFiles,
    Permission::UiModification,
    Permission::DataAccess,
    Permission::WriteFiles,
    Permission::NetworkAccess,
    Permission::PluginCommunication,
    Permission::DeleteFiles,
    Permission::SystemSettings,
    Permission::NativeCodeExecution,
];

impl SecurityLevel {
    /// Every level, lowest first.
    pub const ALL: [SecurityLevel; 4] = [
        SecurityLevel::Minimal,
        SecurityLevel::Standard,
        SecurityLevel::Elevated,
        SecurityLevel::Full,
    ];

    /// Permissions this level may hold.
    pub fn allowed_permissions(&self) -> &'static [Permission] {
        match self {
            Self::Minimal => MINIMAL_ALLOWED,
            Self::Standard => STANDARD_ALLOWED,
            Self::Elevated => ELEVATED_ALLOWED,
            Self::Full => &Permission::ALL,
        }
    }

    /// Whether `permission` is within this level.
    pub fn allows(&self, permission: Permission) -> bool {
        self.allowed_permissions().contains(&permission)
    }

    /// Split `requested` into the allowed subset and the dropped remainder.
    pub fn partition<I>(&self, requested: I) -> (PermissionSet, PermissionSet)
    where
        I: IntoIterator<Item = Permission>,
    {
        requested.into_iter().partition(|p| self.allows(*p))
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Minimal => "MINIMAL",
            Self::Standard => "STANDARD",
            Self::Elevated => "ELEVATED",
            Self::Full => "FULL",
        };
        f.write_str(name)
    }
}
