//! Transports carry decoded messages between peers.
//!
//! The protocol core is agnostic to how bytes move. It needs three things
//! from a transport:
//!
//! - `send`: write one message, failing if it exceeds the size limit or the
//!   channel is down
//! - `on_message`: register the single callback that receives decoded
//!   inbound messages (a later registration replaces the earlier one)
//! - `close`: tear the channel down
//!
//! Implementations:
//!
//! - [`StdioTransport`]: newline-delimited JSON over a reader/writer pair
//! - [`MemoryTransport`]: an in-process connected pair

pub mod memory;
pub mod stdio;

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::mcp::protocol::JsonRpcMessage;

pub use memory::MemoryTransport;
pub use stdio::StdioTransport;

/// Default maximum size of one encoded message (4 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// One inbound item handed to the protocol core.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A decoded JSON value, not yet classified.
    Message(Value),
    /// Bytes that did not decode as JSON.
    Malformed(String),
}

/// The callback a transport invokes for every inbound item.
pub type MessageCallback = Arc<dyn Fn(Inbound) + Send + Sync>;

/// A bidirectional message channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one message to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails, the encoded message exceeds the
    /// size limit, or the channel is closed or broken.
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError>;

    /// Registers the inbound message callback, replacing any earlier one.
    fn on_message(&self, callback: MessageCallback);

    /// Closes the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or shutting down the channel fails.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Encodes a message as a single JSON line, enforcing the size limit.
///
/// # Errors
///
/// Returns [`TransportError::Encode`] if serialisation fails, or
/// [`TransportError::MessageTooLarge`] if the result exceeds `limit` bytes.
pub fn encode_message(message: &JsonRpcMessage, limit: usize) -> Result<String, TransportError> {
    let json = serde_json::to_string(message).map_err(TransportError::Encode)?;
    if json.len() > limit {
        return Err(TransportError::MessageTooLarge {
            size: json.len(),
            limit,
        });
    }
    Ok(json)
}

/// Decodes one inbound message.
///
/// Returns `None` for oversized input, which is dropped before it reaches
/// the classifier.
#[must_use]
pub fn decode_message(text: &str, limit: usize) -> Option<Inbound> {
    if text.len() > limit {
        warn!(size = text.len(), limit, "dropping oversized inbound message");
        return None;
    }

    Some(match serde_json::from_str(text) {
        Ok(value) => Inbound::Message(value),
        Err(e) => Inbound::Malformed(e.to_string()),
    })
}

/// Holds the one registered inbound callback.
#[derive(Default)]
pub(crate) struct CallbackSlot {
    callback: Mutex<Option<MessageCallback>>,
}

impl CallbackSlot {
    pub(crate) fn set(&self, callback: MessageCallback) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub(crate) fn deliver(&self, inbound: Inbound) {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match callback {
            Some(callback) => callback(inbound),
            None => debug!("no message callback registered, dropping inbound message"),
        }
    }
}
