//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::mcp::capabilities::{ServerIdentity, SERVER_NAME};
use crate::mcp::dispatcher::ProtocolOptions;
use crate::mcp::transport::DEFAULT_MAX_MESSAGE_BYTES;
use crate::providers::{validate_uri, Root};

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Server identity.
    #[serde(default)]
    pub server: ServerConfig,

    /// Capability overrides, merged over the defaults.
    #[serde(default)]
    pub capabilities: Map<String, Value>,

    /// Transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Protocol core settings.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Roots served through `roots/list`.
    #[serde(default)]
    pub roots: Vec<RootConfig>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.name.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "server.name must not be empty".to_string(),
            });
        }

        if self.server.version.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "server.version must not be empty".to_string(),
            });
        }

        if self.transport.max_message_bytes == 0 {
            return Err(ConfigError::ValidationError {
                message: "transport.max_message_bytes must be greater than zero".to_string(),
            });
        }

        if self.protocol.request_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError {
                message: "protocol.request_timeout_ms must be greater than zero".to_string(),
            });
        }

        for root in &self.roots {
            validate_uri(&root.uri).map_err(|e| ConfigError::ValidationError {
                message: format!("Invalid root '{}': {}", root.uri, e.message),
            })?;
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ),
            });
        }

        Ok(())
    }

    /// Returns the server identity described by this configuration.
    #[must_use]
    pub fn identity(&self) -> ServerIdentity {
        let identity = ServerIdentity::new(&self.server.name, &self.server.version)
            .with_capabilities(Value::Object(self.capabilities.clone()));
        match &self.server.instructions {
            Some(instructions) => identity.with_instructions(instructions),
            None => identity,
        }
    }

    /// Returns the protocol core options described by this configuration.
    #[must_use]
    pub fn protocol_options(&self) -> ProtocolOptions {
        ProtocolOptions {
            request_timeout: self.protocol.request_timeout_ms.map(Duration::from_millis),
            strict_lifecycle: self.protocol.strict_lifecycle,
        }
    }

    /// Returns the configured roots.
    #[must_use]
    pub fn roots(&self) -> Vec<Root> {
        self.roots
            .iter()
            .map(|root| Root {
                uri: root.uri.clone(),
                name: root.name.clone(),
            })
            .collect()
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Name reported in `serverInfo`.
    /// Default: "mcp-dispatch"
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Version reported in `serverInfo`.
    /// Default: the crate version
    #[serde(default = "default_server_version")]
    pub version: String,

    /// Usage instructions returned from `initialize`.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
            instructions: None,
        }
    }
}

fn default_server_name() -> String {
    SERVER_NAME.to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Maximum size of one message in bytes, inbound or outbound.
    /// Default: 4 MiB
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

const fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

/// Protocol core configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Timeout for requests sent to the client, in milliseconds.
    /// Default: none (wait forever)
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Reject requests other than `initialize` and `ping` until the
    /// handshake completes.
    #[serde(default)]
    pub strict_lifecycle: bool,
}

/// A root entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootConfig {
    /// Root URI, e.g. `file:///home/user/project`.
    pub uri: String,

    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
