//! Collector configuration.
//!
//! Loads and validates stage configuration from TOML files.
//!
//! ```toml
//! dictionary = "/etc/ipxcol/elements.toml"
//!
//! [parser]
//! name = "parser"
//! queue_capacity = 1024
//! params = ""
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Configuration of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Instance name
    #[serde(default = "default_name")]
    pub name: String,

    /// Capacity of the inbound and outbound message channels
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the control (update) channel
    #[serde(default = "default_control_capacity")]
    pub control_capacity: usize,

    /// Capacity of the feedback channel to the input stage
    #[serde(default = "default_feedback_capacity")]
    pub feedback_capacity: usize,

    /// Plugin specific parameters, passed to `Plugin::init` unchanged
    #[serde(default)]
    pub params: String,
}

/// Complete collector configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Parser stage
    #[serde(default)]
    pub parser: StageConfig,

    /// Information-element dictionary file; built-in empty dictionary if unset
    #[serde(default)]
    pub dictionary: Option<PathBuf>,
}

fn default_name() -> String {
    "parser".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_control_capacity() -> usize {
    8
}

fn default_feedback_capacity() -> usize {
    64
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            queue_capacity: default_queue_capacity(),
            control_capacity: default_control_capacity(),
            feedback_capacity: default_feedback_capacity(),
            params: String::new(),
        }
    }
}

impl StageConfig {
    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        for (field, value) in [
            ("queue_capacity", self.queue_capacity),
            ("control_capacity", self.control_capacity),
            ("feedback_capacity", self.feedback_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        Ok(())
    }
}

impl CollectorConfig {
    /// Parse and validate configuration text
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        match Self::load(path.as_ref()) {
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %path.as_ref().display(),
                    "configuration file not found, using defaults"
                );
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        self.parser.validate()?;
        if let Some(path) = &self.dictionary {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::invalid("dictionary", "path must not be empty"));
            }
        }
        Ok(())
    }
}
