//! Error types for mcp-dispatch.
//!
//! - [`McpError`] is what handlers return and what outbound requests reject with.
//! - [`TransportError`] covers channel failures and message size limits.
//! - [`ConfigError`] covers configuration file loading.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::mcp::protocol::ErrorObject;

/// Errors surfaced by the protocol core and its handlers.
#[derive(Error, Debug)]
pub enum McpError {
    /// A typed protocol error. Forwarded to the peer verbatim when raised by
    /// a handler, and reconstructed from error responses to our requests.
    #[error(transparent)]
    Rpc(#[from] ErrorObject),

    /// The transport failed to send a message.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A payload could not be serialised or deserialised.
    #[error("serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No response arrived within the allotted time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The protocol core was closed before a response arrived.
    #[error("connection closed")]
    Closed,

    /// Any other handler failure.
    #[error("{0}")]
    Handler(String),
}

impl McpError {
    /// Wraps an arbitrary failure description.
    #[must_use]
    pub fn other(error: impl std::fmt::Display) -> Self {
        Self::Handler(error.to_string())
    }

    /// Returns the typed protocol error, if this is one.
    #[must_use]
    pub const fn as_rpc(&self) -> Option<&ErrorObject> {
        match self {
            Self::Rpc(error) => Some(error),
            _ => None,
        }
    }

    /// Converts this failure into the error object sent to the peer.
    ///
    /// Typed protocol errors pass through untouched. Everything else becomes
    /// an internal error carrying this error's description in `data`.
    #[must_use]
    pub fn into_error_object(self) -> ErrorObject {
        match self {
            Self::Rpc(error) => error,
            other => ErrorObject::internal_error(other.to_string()),
        }
    }
}

/// Errors that can occur while moving messages over a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The underlying I/O channel failed.
    #[error("transport I/O failed")]
    Io(#[from] std::io::Error),

    /// The message could not be encoded as JSON.
    #[error("failed to encode message")]
    Encode(#[source] serde_json::Error),

    /// The encoded message exceeds the configured size limit.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Encoded size in bytes.
        size: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },

    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,
}

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}
