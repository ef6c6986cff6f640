//! Error types for the Plexus core library.
//!
//! Plugin operations fail through [`crate::plugin::PluginError`]; this type
//! covers configuration, telemetry and bootstrap.

use crate::plugin::PluginError;
use thiserror::Error;

/// Main error type for Plexus core operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
    },

    /// Filesystem errors
    #[error("I/O error: {path}: {message}")]
    Io {
        /// File or directory involved
        path: String,
        /// Underlying I/O error
        message: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Parser or serializer message
        message: String,
    },

    /// Plugin runtime errors
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Internal system errors
    #[error("Internal error: {message}")]
    Internal {
        /// Failure description
        message: String,
    },
}

/// Result type alias for Plexus operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an I/O error for `path`.
    pub fn io(path: impl AsRef<std::path::Path>, error: &std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Error::Configuration {
            message: err.to_string(),
        }
    }
}
