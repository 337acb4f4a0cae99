//! Error types for collector stages.
//!
//! This module defines the errors reported by plugins to the host runtime
//! and by the configuration layer. All errors implement `std::error::Error`
//! via `thiserror`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Host-visible failure of a plugin instance.
///
/// Recoverable conditions never surface here: a plugin absorbs them, logs
/// them and returns `Ok`. Every variant below means the host has to act.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// Invalid argument or configuration passed to the plugin.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Memory (or another bounded resource) could not be obtained.
    #[error("Out of memory: {message}")]
    NoMemory {
        /// Error message.
        message: String,
    },

    /// The operation was refused; the instance is no longer in a safe state.
    #[error("Operation denied: {message}")]
    Denied {
        /// Error message.
        message: String,
    },

    /// The instance can no longer guarantee its invariants and must stop.
    #[error("Fatal plugin failure: {message}")]
    Fatal {
        /// Error message.
        message: String,
    },
}

impl PluginError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an out of memory error.
    pub fn no_memory(message: impl Into<String>) -> Self {
        Self::NoMemory {
            message: message.into(),
        }
    }

    /// Creates a denied error.
    pub fn denied(message: impl Into<String>) -> Self {
        Self::Denied {
            message: message.into(),
        }
    }

    /// Creates a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }
}

/// Errors that can occur while loading collector configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read '{path}': {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or otherwise unusable.
    #[error("Invalid configuration for {field}: {message}")]
    Invalid {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid configuration error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PluginError::fatal("feedback channel closed");
        assert_eq!(
            err.to_string(),
            "Fatal plugin failure: feedback channel closed"
        );

        let err = PluginError::denied("session cleanup failed");
        assert_eq!(err.to_string(), "Operation denied: session cleanup failed");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("queue_capacity", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Invalid configuration for queue_capacity: must be greater than zero"
        );
    }
}
