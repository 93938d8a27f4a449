//! Configuration file loading and parsing.
//!
//! This module handles loading the configuration file from disk and parsing
//! it into validated, type-safe structures.
//!
//! # Configuration File Locations
//!
//! The configuration file is searched in the following order:
//!
//! 1. Path given as the `CONFIG_FILE` CLI argument
//! 2. Default location:
//!    - **Linux/macOS:** `~/.mcp-dispatch/config.json`
//!    - **Windows:** `%USERPROFILE%\.mcp-dispatch\config.json`
//!
//! An explicitly given file must exist. If the default file does not exist,
//! built-in defaults are used.
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "server": { "name": "my-server", "version": "1.0.0" },
//!   "capabilities": { "resources": { "subscribe": true } },
//!   "transport": { "max_message_bytes": 1048576 },
//!   "protocol": { "request_timeout_ms": 30000, "strict_lifecycle": false },
//!   "roots": [ { "uri": "file:///home/me/project", "name": "Project" } ],
//!   "logging": { "level": "info" }
//! }
//! ```

mod settings;

pub use settings::{
    Config, LoggingConfig, ProtocolConfig, RootConfig, ServerConfig, TransportConfig,
};

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.mcp-dispatch/`
/// - **Windows:** `%USERPROFILE%\.mcp-dispatch\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".mcp-dispatch"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.json"))
}

/// Loads and parses the configuration file.
///
/// If `path` is `None`, uses the platform-specific default location, falling
/// back to [`Config::default`] when no file exists there.
///
/// # Errors
///
/// Returns an error if:
/// - An explicitly given configuration file cannot be found
/// - The file cannot be read
/// - The JSON is malformed
/// - Required fields are missing or invalid
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::NotFound {
                    path: p.to_path_buf(),
                });
            }
            p.to_path_buf()
        }
        None => match default_config_path() {
            Some(p) if p.exists() => p,
            _ => {
                debug!("no configuration file found, using defaults");
                return Ok(Config::default());
            }
        },
    };

    let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: config_path.clone(),
        source: e,
    })?;

    // Validate the configuration
    config.validate()?;

    debug!(path = %config_path.display(), "loaded configuration");
    Ok(config)
}
