//! Capability providers.
//!
//! The method router talks to providers only through the traits defined
//! here and in the submodules. Each trait has an in-memory registry that
//! registers entities through explicit descriptor structs:
//!
//! - [`ToolRegistry`] for `tools/*`
//! - [`ResourceRegistry`] for `resources/*`
//! - [`PromptRegistry`] for `prompts/*`
//! - [`RootRegistry`] for `roots/list`
//!
//! Logging and sampling are single-purpose providers; see
//! [`LoggingProvider`] and [`SamplingProvider`].

pub mod prompts;
pub mod resources;
pub mod roots;
pub mod tools;

use std::fmt;
use std::str::FromStr;
use std::sync::{LazyLock, PoisonError, RwLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::McpError;
use crate::mcp::protocol::ErrorObject;

pub use prompts::{
    Prompt, PromptArgument, PromptContent, PromptMessage, PromptProvider, PromptRegistry, Role,
};
pub use resources::{Resource, ResourceContents, ResourceProvider, ResourceRegistry};
pub use roots::{Root, RootProvider, RootRegistry};
pub use tools::{Tool, ToolCallResult, ToolContent, ToolProvider, ToolRegistry};

/// `scheme:` prefix as defined by RFC 3986.
static URI_SCHEME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:"));

/// Checks that `uri` is non-empty and starts with a scheme.
///
/// # Errors
///
/// Returns an invalid params error if it does not.
pub fn validate_uri(uri: &str) -> Result<(), ErrorObject> {
    let scheme = URI_SCHEME
        .as_ref()
        .map_err(|e| ErrorObject::internal_error(e.to_string()))?;

    if scheme.is_match(uri) {
        Ok(())
    } else {
        Err(ErrorObject::invalid_params(format!(
            "Invalid URI (missing scheme): {uri}"
        )))
    }
}

/// Message severity, as used by `logging/setLevel` and
/// `notifications/message`. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Detailed debugging information.
    Debug,
    /// Normal operational messages.
    Info,
    /// Normal but significant events.
    Notice,
    /// Warning conditions.
    Warning,
    /// Error conditions.
    Error,
    /// Critical conditions.
    Critical,
    /// Action must be taken immediately.
    Alert,
    /// System is unusable.
    Emergency,
}

impl LogLevel {
    /// All levels, least severe first.
    pub const ALL: [Self; 8] = [
        Self::Debug,
        Self::Info,
        Self::Notice,
        Self::Warning,
        Self::Error,
        Self::Critical,
        Self::Alert,
        Self::Emergency,
    ];

    /// Returns the wire name of this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ErrorObject;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| ErrorObject::invalid_params(format!("Unknown log level: {s}")))
    }
}

/// Receives `logging/setLevel`.
#[async_trait]
pub trait LoggingProvider: Send + Sync {
    /// Sets the minimum level of log messages sent to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the level cannot be applied.
    async fn set_level(&self, level: LogLevel) -> Result<(), McpError>;

    /// Returns the current minimum level.
    fn level(&self) -> LogLevel;
}

/// A [`LoggingProvider`] that only remembers the requested level.
#[derive(Debug)]
pub struct LevelSetting {
    level: RwLock<LogLevel>,
}

impl LevelSetting {
    /// Creates a setting starting at `level`.
    #[must_use]
    pub const fn new(level: LogLevel) -> Self {
        Self {
            level: RwLock::new(level),
        }
    }
}

impl Default for LevelSetting {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

#[async_trait]
impl LoggingProvider for LevelSetting {
    async fn set_level(&self, level: LogLevel) -> Result<(), McpError> {
        *self.level.write().unwrap_or_else(PoisonError::into_inner) = level;
        tracing::debug!(%level, "client log level changed");
        Ok(())
    }

    fn level(&self) -> LogLevel {
        *self.level.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Services `sampling/createMessage`.
#[async_trait]
pub trait SamplingProvider: Send + Sync {
    /// Creates a message from the request params and returns the result
    /// object sent back to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be created.
    async fn create_message(&self, params: Value) -> Result<Value, McpError>;
}
