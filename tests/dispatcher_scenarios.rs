//! End-to-end behaviour of the protocol core over a memory transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use mcp_dispatch::error::McpError;
use mcp_dispatch::mcp::{HandshakeState, Protocol, ProtocolOptions, ServerIdentity};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use common::{assert_result_xor_error, connect, Peer};

fn protocol() -> (Protocol, Peer) {
    let (transport, peer) = connect();
    let identity = ServerIdentity::new("scenario-server", "3.1.4").with_capabilities(json!({
        "tools": {"listChanged": true},
        "logging": {}
    }));
    (Protocol::new(transport, identity), peer)
}

// =============================================================================
// Inbound requests
// =============================================================================

#[tokio::test]
async fn registered_method_yields_exactly_one_matching_response() {
    let (protocol, mut peer) = protocol();
    protocol.on_request("add", |params, _| async move {
        let params = params.unwrap_or(Value::Null);
        let a = params["a"].as_i64().unwrap_or_default();
        let b = params["b"].as_i64().unwrap_or_default();
        Ok(json!(a + b))
    });

    for id in [1, 2, 40] {
        let response = peer.request(id, "add", json!({"a": id, "b": 2})).await;
        assert_result_xor_error(&response);
        assert_eq!(response["result"], json!(id + 2));
    }

    peer.send(json!({"jsonrpc": "2.0", "id": "str-id", "method": "add", "params": {"a": 1, "b": 1}}));
    let response = peer.recv().await;
    assert_eq!(response["id"], json!("str-id"));
    assert_eq!(response["result"], json!(2));

    peer.assert_silent().await;
}

#[tokio::test]
async fn unregistered_method_is_method_not_found() {
    let (_protocol, mut peer) = protocol();

    let response = peer.request(5, "tools/frobnicate", json!({})).await;
    assert_result_xor_error(&response);
    assert_eq!(response["error"]["code"], json!(-32601));
    assert_eq!(
        response["error"]["message"],
        json!("Method not found: tools/frobnicate")
    );
}

#[tokio::test]
async fn slow_handler_does_not_block_later_messages() {
    let (protocol, mut peer) = protocol();
    let gate = Arc::new(Notify::new());

    let waiting = Arc::clone(&gate);
    protocol.on_request("slow", move |_, _| {
        let gate = Arc::clone(&waiting);
        async move {
            gate.notified().await;
            Ok(json!("slow done"))
        }
    });
    protocol.on_request("fast", |_, _| async { Ok(json!("fast done")) });

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "slow"}));
    peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "fast"}));

    let first = peer.recv().await;
    assert_eq!(first["id"], json!(2));
    assert_eq!(first["result"], json!("fast done"));

    gate.notify_one();
    let second = peer.recv().await;
    assert_eq!(second["id"], json!(1));
    assert_eq!(second["result"], json!("slow done"));
}

// =============================================================================
// Outbound requests
// =============================================================================

#[tokio::test]
async fn send_request_resolves_with_unmodified_result() {
    let (protocol, mut peer) = protocol();
    let payload = json!({
        "roots": [{"uri": "file:///a", "name": "A"}],
        "nested": {"list": [1, 2.5, null, true, "x"]}
    });

    let call = tokio::spawn({
        let protocol = protocol.clone();
        async move { protocol.send_request("roots/list", Some(json!({}))).await }
    });

    let request = peer.recv().await;
    assert_eq!(request["method"], json!("roots/list"));
    assert_eq!(request["params"], json!({}));
    peer.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": payload}));

    assert_eq!(call.await.unwrap().unwrap(), payload);
    assert_eq!(protocol.pending_count(), 0);
}

#[tokio::test]
async fn error_response_rejects_with_same_code_message_and_data() {
    let (protocol, mut peer) = protocol();

    let call = tokio::spawn({
        let protocol = protocol.clone();
        async move { protocol.send_request("sampling/createMessage", None).await }
    });

    let request = peer.recv().await;
    peer.send(json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "error": {"code": -32004, "message": "no model", "data": {"retry": false}}
    }));

    let err = call.await.unwrap().unwrap_err();
    let McpError::Rpc(error) = err else {
        panic!("expected a protocol error, got {err:?}");
    };
    assert_eq!(error.code, -32004);
    assert_eq!(error.message, "no model");
    assert_eq!(error.data, Some(json!({"retry": false})));
}

#[tokio::test]
async fn out_of_order_responses_match_by_id() {
    let (protocol, mut peer) = protocol();

    let first = tokio::spawn({
        let protocol = protocol.clone();
        async move { protocol.send_request("first", None).await }
    });
    let first_request = peer.recv().await;

    let second = tokio::spawn({
        let protocol = protocol.clone();
        async move { protocol.send_request("second", None).await }
    });
    let second_request = peer.recv().await;

    assert_ne!(first_request["id"], second_request["id"]);
    assert_eq!(protocol.pending_count(), 2);

    peer.send(json!({"jsonrpc": "2.0", "id": second_request["id"], "result": "for second"}));
    peer.send(json!({"jsonrpc": "2.0", "id": first_request["id"], "result": "for first"}));

    assert_eq!(second.await.unwrap().unwrap(), json!("for second"));
    assert_eq!(first.await.unwrap().unwrap(), json!("for first"));
    assert_eq!(protocol.pending_count(), 0);
}

#[tokio::test]
async fn unmatched_responses_have_no_effect() {
    let (protocol, mut peer) = protocol();

    let call = tokio::spawn({
        let protocol = protocol.clone();
        async move { protocol.send_request("pending", None).await }
    });
    let request = peer.recv().await;
    assert_eq!(protocol.pending_count(), 1);

    // Never sent.
    peer.send(json!({"jsonrpc": "2.0", "id": 9999, "result": "stray"}));
    peer.send(json!({"jsonrpc": "2.0", "id": "nope", "error": {"code": -32603, "message": "x"}}));
    peer.assert_silent().await;
    assert_eq!(protocol.pending_count(), 1);

    // Resolved once, then answered again.
    peer.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": 1}));
    assert_eq!(call.await.unwrap().unwrap(), json!(1));
    peer.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": 2}));
    peer.assert_silent().await;
    assert_eq!(protocol.pending_count(), 0);
}

#[tokio::test]
async fn close_rejects_outstanding_requests() {
    let (protocol, mut peer) = protocol();

    let call = tokio::spawn({
        let protocol = protocol.clone();
        async move { protocol.send_request("never-answered", None).await }
    });
    peer.recv().await;

    protocol.close().await.unwrap();
    assert!(matches!(call.await.unwrap(), Err(McpError::Closed)));
    assert_eq!(protocol.pending_count(), 0);
}

#[tokio::test]
async fn timeout_is_opt_in() {
    let (protocol, mut peer) = protocol();

    let err = protocol
        .send_request_with_timeout("ignored", None, Duration::from_millis(25))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Timeout(_)));
    peer.recv().await;

    // Without a timeout the request keeps waiting.
    let call = tokio::spawn({
        let protocol = protocol.clone();
        async move { protocol.send_request("patient", None).await }
    });
    let request = peer.recv().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!call.is_finished());

    peer.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": "finally"}));
    assert_eq!(call.await.unwrap().unwrap(), json!("finally"));
}

// =============================================================================
// Notifications
// =============================================================================

#[tokio::test]
async fn notifications_never_produce_a_response() {
    let (protocol, mut peer) = protocol();
    let (tx, mut rx) = mpsc::unbounded_channel();

    protocol.on_notification("notifications/progress", move |params| {
        let _ = tx.send(params);
        async { Ok(()) }
    });
    protocol.on_notification("notifications/broken", |_| async {
        Err(McpError::other("handler failed"))
    });

    peer.notify("notifications/progress", Some(json!({"progress": 50})));
    peer.notify("notifications/broken", None);
    peer.notify("notifications/unknown", Some(json!([1, 2])));
    peer.notify("notifications/initialized", None);

    assert_eq!(rx.recv().await, Some(Some(json!({"progress": 50}))));
    peer.assert_silent().await;
}

#[tokio::test]
async fn send_notification_has_no_id() {
    let (protocol, mut peer) = protocol();

    protocol
        .send_notification("notifications/tools/list_changed", None)
        .await
        .unwrap();

    let message = peer.recv().await;
    assert_eq!(
        message,
        json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"})
    );
    assert_eq!(protocol.pending_count(), 0);
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn initialize_returns_identity_and_merged_capabilities() {
    let (protocol, mut peer) = protocol();

    let response = peer
        .request(
            1,
            "initialize",
            json!({"protocolVersion": "X", "capabilities": {}, "clientInfo": {"name": "c", "version": "1"}}),
        )
        .await;

    assert_result_xor_error(&response);
    let result = &response["result"];
    assert_eq!(result["protocolVersion"], json!("2024-11-05"));
    assert_eq!(result["serverInfo"], json!({"name": "scenario-server", "version": "3.1.4"}));
    assert_eq!(result["capabilities"]["tools"], json!({"listChanged": true}));
    assert_eq!(result["capabilities"]["logging"], json!({}));
    assert_eq!(
        result["capabilities"]["resources"],
        json!({"subscribe": false, "listChanged": false})
    );
    assert_eq!(result["capabilities"]["prompts"], json!({"listChanged": false}));
    assert!(result.get("instructions").is_none());

    assert_eq!(protocol.handshake_state(), HandshakeState::Negotiating);
    peer.notify("notifications/initialized", None);
    peer.assert_silent().await;
    assert_eq!(protocol.handshake_state(), HandshakeState::Ready);
}

#[tokio::test]
async fn initialize_without_client_info_is_invalid_request() {
    let (protocol, mut peer) = protocol();

    let response = peer
        .request(
            11,
            "initialize",
            json!({"protocolVersion": "X", "capabilities": {}}),
        )
        .await;

    assert_result_xor_error(&response);
    assert_eq!(response["error"]["code"], json!(-32600));
    peer.assert_silent().await;
    assert_eq!(protocol.handshake_state(), HandshakeState::Uninitialized);
    assert!(protocol.client_info().is_none());
}

#[tokio::test]
async fn requests_work_before_handshake_by_default() {
    let (protocol, mut peer) = protocol();
    protocol.on_request("status", |_, _| async { Ok(json!("ok")) });

    let response = peer.request(1, "status", json!({})).await;
    assert_eq!(response["result"], json!("ok"));
    assert_eq!(protocol.handshake_state(), HandshakeState::Uninitialized);
}

#[tokio::test]
async fn pipelined_handshake_is_served_under_strict_lifecycle() {
    let (transport, mut peer) = connect();
    let options = ProtocolOptions {
        request_timeout: None,
        strict_lifecycle: true,
    };
    let protocol = Protocol::with_options(transport, ServerIdentity::new("strict", "1"), options);
    protocol.on_request("tools/list", |_, _| async { Ok(json!({"tools": []})) });

    // No waiting between the three messages.
    peer.send(json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": {"protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": {"name": "c", "version": "1"}}
    }));
    peer.notify("notifications/initialized", None);
    peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}));

    let mut responses = vec![peer.recv().await, peer.recv().await];
    responses.sort_by_key(|response| response["id"].as_i64());
    assert_eq!(responses[0]["result"]["serverInfo"]["name"], json!("strict"));
    assert_eq!(responses[1]["result"], json!({"tools": []}));
    assert_eq!(protocol.handshake_state(), HandshakeState::Ready);
}

#[tokio::test]
async fn initialized_without_initialize_keeps_the_gate_shut() {
    let (transport, mut peer) = connect();
    let options = ProtocolOptions {
        request_timeout: None,
        strict_lifecycle: true,
    };
    let protocol = Protocol::with_options(transport, ServerIdentity::new("strict", "1"), options);
    protocol.on_request("tools/list", |_, _| async { Ok(json!({"tools": []})) });

    peer.notify("notifications/initialized", None);
    peer.assert_silent().await;
    assert_eq!(protocol.handshake_state(), HandshakeState::Uninitialized);

    let response = peer.request(1, "tools/list", json!({})).await;
    assert_eq!(response["error"]["code"], json!(-32600));
}

// =============================================================================
// Malformed input
// =============================================================================

#[tokio::test]
async fn malformed_input_is_answered_or_dropped() {
    let (_protocol, mut peer) = protocol();

    peer.send_raw("this is not json");
    let response = peer.recv().await;
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], json!(-32700));

    peer.send(json!({"jsonrpc": "2.0", "params": {}}));
    let response = peer.recv().await;
    assert_eq!(response["error"]["code"], json!(-32700));

    peer.send(json!({"jsonrpc": "2.0", "id": {"bad": true}, "method": "x"}));
    let response = peer.recv().await;
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], json!(-32600));

    peer.send(json!({"jsonrpc": "2.0", "method": ""}));
    let response = peer.recv().await;
    assert_eq!(response["error"]["code"], json!(-32600));

    peer.send(json!({"jsonrpc": "2.0", "id": 3, "error": {"message": "missing code"}}));
    peer.assert_silent().await;
}
