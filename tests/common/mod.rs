//! Shared test harness: a scripted peer on the far end of a memory transport.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mcp_dispatch::mcp::transport::{Inbound, MemoryTransport, Transport};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// The far end of a connection, driven by the test.
pub struct Peer {
    transport: MemoryTransport,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

/// Creates a connected pair: the transport for the code under test and the
/// scripted peer.
pub fn connect() -> (Arc<MemoryTransport>, Peer) {
    let (ours, theirs) = MemoryTransport::pair();
    let (tx, rx) = mpsc::unbounded_channel();
    theirs.on_message(Arc::new(move |inbound| {
        let _ = tx.send(inbound);
    }));
    (Arc::new(ours), Peer { transport: theirs, rx })
}

impl Peer {
    /// Sends any JSON value, well-formed or not.
    pub fn send(&self, value: Value) {
        self.transport.inject(&value).expect("peer send failed");
    }

    /// Sends raw text.
    pub fn send_raw(&self, text: &str) {
        self.transport.inject_raw(text).expect("peer send failed");
    }

    /// Waits for the next message.
    pub async fn recv(&mut self) -> Value {
        let inbound = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("connection dropped");
        match inbound {
            Inbound::Message(value) => value,
            Inbound::Malformed(detail) => panic!("received malformed JSON: {detail}"),
        }
    }

    /// Sends a request and waits for the next message, which should be its response.
    pub async fn request(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}));
        let response = self.recv().await;
        assert_eq!(response["id"], json!(id), "response id mismatch: {response}");
        response
    }

    /// Sends a notification.
    pub fn notify(&self, method: &str, params: Option<Value>) {
        let mut message = json!({"jsonrpc": "2.0", "method": method});
        if let Some(params) = params {
            message["params"] = params;
        }
        self.send(message);
    }

    /// Asserts that nothing arrives for a short while.
    pub async fn assert_silent(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Ok(inbound) = self.rx.try_recv() {
            panic!("expected silence, received {inbound:?}");
        }
    }

    /// Runs the initialize handshake.
    pub async fn initialize(&mut self) -> Value {
        let response = self
            .request(
                0,
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "1.0.0"}
                }),
            )
            .await;
        self.notify("notifications/initialized", None);
        response
    }
}

/// Asserts that a response carries exactly one of `result` and `error`.
pub fn assert_result_xor_error(response: &Value) {
    let has_result = response.get("result").is_some();
    let has_error = response.get("error").is_some();
    assert!(has_result != has_error, "expected result XOR error: {response}");
    assert_eq!(response["jsonrpc"], json!("2.0"));
}
