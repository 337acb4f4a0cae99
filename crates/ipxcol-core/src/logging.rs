//! Logging setup.

use tracing_subscriber::EnvFilter;

use crate::error::{ConfigError, ConfigResult};

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` overrides `default_directive` (e.g. `"info"` or
/// `"ipxcol_parser=debug"`). Fails if a subscriber is already installed.
pub fn init_logging(default_directive: &str) -> ConfigResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| ConfigError::invalid("log_filter", e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .compact()
        .try_init()
        .map_err(|e| ConfigError::invalid("logging", format!("Failed to set logger: {}", e)))
}
