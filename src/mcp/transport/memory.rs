//! In-process transport.
//!
//! [`MemoryTransport::pair`] returns two connected ends. Everything sent on
//! one end is encoded, size-checked and decoded again before it reaches the
//! other end's callback, so both sides see exactly what a byte-level
//! transport would deliver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    decode_message, encode_message, CallbackSlot, MessageCallback, Transport,
    DEFAULT_MAX_MESSAGE_BYTES,
};
use crate::error::TransportError;
use crate::mcp::protocol::JsonRpcMessage;

/// One end of an in-process connection.
pub struct MemoryTransport {
    /// Callback for messages arriving at this end.
    inbox: Arc<CallbackSlot>,
    /// Callback of the other end.
    peer: Arc<CallbackSlot>,
    /// Shared by both ends; closing either closes the connection.
    closed: Arc<AtomicBool>,
    max_message_bytes: usize,
}

impl MemoryTransport {
    /// Creates two connected ends with the default message size limit.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        Self::pair_with_limit(DEFAULT_MAX_MESSAGE_BYTES)
    }

    /// Creates two connected ends with a custom message size limit.
    #[must_use]
    pub fn pair_with_limit(max_message_bytes: usize) -> (Self, Self) {
        let left = Arc::new(CallbackSlot::default());
        let right = Arc::new(CallbackSlot::default());
        let closed = Arc::new(AtomicBool::new(false));

        (
            Self {
                inbox: Arc::clone(&left),
                peer: Arc::clone(&right),
                closed: Arc::clone(&closed),
                max_message_bytes,
            },
            Self {
                inbox: right,
                peer: left,
                closed,
                max_message_bytes,
            },
        )
    }

    /// Returns `true` once either end has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Delivers an arbitrary JSON value to the other end.
    ///
    /// Unlike [`Transport::send`] this does not require a well-formed
    /// envelope, which makes it useful for exercising a peer's validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the value exceeds the
    /// size limit.
    pub fn inject(&self, value: &Value) -> Result<(), TransportError> {
        let text = serde_json::to_string(value).map_err(TransportError::Encode)?;
        if text.len() > self.max_message_bytes {
            return Err(TransportError::MessageTooLarge {
                size: text.len(),
                limit: self.max_message_bytes,
            });
        }
        self.inject_raw(&text)
    }

    /// Delivers raw text to the other end, as if it had arrived on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub fn inject_raw(&self, text: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        if let Some(inbound) = decode_message(text, self.max_message_bytes) {
            self.peer.deliver(inbound);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let json = encode_message(message, self.max_message_bytes)?;
        self.inject_raw(&json)
    }

    fn on_message(&self, callback: MessageCallback) {
        self.inbox.set(callback);
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
