//! Method routing through a fully configured server, and with no providers.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use mcp_dispatch::error::McpError;
use mcp_dispatch::mcp::{Server, ServerIdentity};
use mcp_dispatch::providers::{
    LevelSetting, LogLevel, Prompt, PromptArgument, PromptMessage, PromptRegistry, Resource,
    ResourceRegistry, Role, Root, RootRegistry, SamplingProvider, Tool, ToolCallResult,
    ToolRegistry,
};
use serde_json::{json, Value};

use common::{assert_result_xor_error, connect, Peer};

struct CannedSampler;

#[async_trait]
impl SamplingProvider for CannedSampler {
    async fn create_message(&self, params: Value) -> Result<Value, McpError> {
        let asked = params["messages"][0]["content"]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(json!({
            "role": "assistant",
            "content": {"type": "text", "text": format!("You said: {asked}")},
            "model": "canned",
            "stopReason": "endTurn"
        }))
    }
}

fn tools() -> ToolRegistry {
    let tools = ToolRegistry::new();
    tools
        .register(
            Tool::new(
                "echo",
                json!({
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"]
                }),
            )
            .with_description("Echoes its input"),
            |arguments| async move {
                Ok(ToolCallResult::text(
                    arguments["message"].as_str().unwrap_or_default(),
                ))
            },
        )
        .unwrap();
    tools
        .register(
            Tool::new("explode", json!({"type": "object"})),
            |_| async { Err(McpError::other("kaboom")) },
        )
        .unwrap();
    tools
}

fn full_server() -> (Server, Peer) {
    let (transport, peer) = connect();

    let resources = ResourceRegistry::new();
    resources
        .register_text(
            Resource::new("mem://notes", "Notes").with_mime_type("text/plain"),
            "remember the milk",
        )
        .unwrap();
    resources
        .register_binary(Resource::new("mem://raw", "Raw"), vec![0xde, 0xad, 0xbe, 0xef])
        .unwrap();

    let prompts = PromptRegistry::new();
    prompts
        .register(
            Prompt::new("review")
                .with_argument(PromptArgument::required("language"))
                .with_argument(PromptArgument::optional("focus")),
            vec![PromptMessage::text(
                Role::User,
                "Review this {{language}} code.{{ focus }}",
            )],
        )
        .unwrap();

    let roots = RootRegistry::from_roots([
        Root::new("file:///work").with_name("Work"),
        Root::new("file:///tmp"),
    ])
    .unwrap();

    let server = Server::builder(ServerIdentity::new("router", "1.0.0"))
        .tools(Arc::new(tools()))
        .resources(Arc::new(resources))
        .prompts(Arc::new(prompts))
        .roots(Arc::new(roots))
        .logging(Arc::new(LevelSetting::new(LogLevel::Info)))
        .sampling(Arc::new(CannedSampler))
        .build(transport);
    (server, peer)
}

fn bare_server() -> (Server, Peer) {
    let (transport, peer) = connect();
    let server = Server::builder(ServerIdentity::new("bare", "0.1.0")).build(transport);
    (server, peer)
}

fn error_code(response: &Value) -> i64 {
    assert_result_xor_error(response);
    response["error"]["code"].as_i64().unwrap_or_default()
}

// =============================================================================
// Configured providers
// =============================================================================

#[tokio::test]
async fn initialize_advertises_configured_providers() {
    let (_server, mut peer) = full_server();

    let response = peer.initialize().await;
    let caps = &response["result"]["capabilities"];
    assert_eq!(caps["tools"], json!({"listChanged": true}));
    assert_eq!(caps["resources"], json!({"subscribe": true, "listChanged": true}));
    assert_eq!(caps["prompts"], json!({"listChanged": true}));
    assert_eq!(caps["roots"], json!({"listChanged": true}));
    assert_eq!(caps["logging"], json!({}));
    assert_eq!(caps["sampling"], json!({}));
}

#[tokio::test]
async fn ping_answers_empty_object() {
    let (_server, mut peer) = full_server();
    let response = peer.request(1, "ping", json!({})).await;
    assert_eq!(response["result"], json!({}));
}

#[tokio::test]
async fn tools_list_and_call() {
    let (_server, mut peer) = full_server();

    let response = peer.request(1, "tools/list", json!({})).await;
    let tools = response["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0]["name"], json!("echo"));
    assert_eq!(tools[0]["description"], json!("Echoes its input"));
    assert_eq!(tools[0]["inputSchema"]["required"], json!(["message"]));

    let response = peer
        .request(
            1,
            "tools/call",
            json!({"name": "echo", "arguments": {"message": "hi"}}),
        )
        .await;
    assert_result_xor_error(&response);
    assert_eq!(
        response["result"],
        json!({"content": [{"type": "text", "text": "hi"}]})
    );
}

#[tokio::test]
async fn tool_failures_are_tool_execution_errors() {
    let (_server, mut peer) = full_server();

    let response = peer
        .request(2, "tools/call", json!({"name": "missing", "arguments": {}}))
        .await;
    assert_eq!(error_code(&response), -32002);

    let response = peer.request(3, "tools/call", json!({"name": "explode"})).await;
    assert_eq!(error_code(&response), -32002);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("kaboom"));

    let response = peer
        .request(4, "tools/call", json!({"name": "echo", "arguments": {}}))
        .await;
    assert_eq!(error_code(&response), -32602);

    let response = peer.request(5, "tools/call", json!({"arguments": {}})).await;
    assert_eq!(error_code(&response), -32602);
}

#[tokio::test]
async fn resources_list_and_read() {
    let (_server, mut peer) = full_server();

    let response = peer.request(1, "resources/list", json!({})).await;
    assert_eq!(
        response["result"]["resources"],
        json!([
            {"uri": "mem://notes", "name": "Notes", "mimeType": "text/plain"},
            {"uri": "mem://raw", "name": "Raw"}
        ])
    );

    let response = peer
        .request(2, "resources/read", json!({"uri": "mem://notes"}))
        .await;
    assert_eq!(
        response["result"]["contents"],
        json!([{"uri": "mem://notes", "mimeType": "text/plain", "text": "remember the milk"}])
    );

    let response = peer
        .request(3, "resources/read", json!({"uri": "mem://raw"}))
        .await;
    assert_eq!(response["result"]["contents"][0]["blob"], json!("3q2+7w=="));

    let response = peer
        .request(4, "resources/read", json!({"uri": "mem://absent"}))
        .await;
    assert_eq!(error_code(&response), -32001);

    let response = peer
        .request(5, "resources/read", json!({"uri": "no scheme"}))
        .await;
    assert_eq!(error_code(&response), -32602);
}

#[tokio::test]
async fn subscriptions_gate_update_notifications() {
    let (server, mut peer) = full_server();

    assert!(!server.notify_resource_updated("mem://notes").await.unwrap());
    peer.assert_silent().await;

    let response = peer
        .request(1, "resources/subscribe", json!({"uri": "mem://notes"}))
        .await;
    assert_eq!(response["result"], json!({}));

    assert!(server.notify_resource_updated("mem://notes").await.unwrap());
    assert_eq!(
        peer.recv().await,
        json!({
            "jsonrpc": "2.0",
            "method": "notifications/resources/updated",
            "params": {"uri": "mem://notes"}
        })
    );

    let response = peer
        .request(2, "resources/unsubscribe", json!({"uri": "mem://notes"}))
        .await;
    assert_eq!(response["result"], json!({}));
    assert!(!server.notify_resource_updated("mem://notes").await.unwrap());
    peer.assert_silent().await;

    let response = peer
        .request(3, "resources/subscribe", json!({"uri": "mem://absent"}))
        .await;
    assert_eq!(error_code(&response), -32001);
}

#[tokio::test]
async fn prompts_list_and_get() {
    let (_server, mut peer) = full_server();

    let response = peer.request(1, "prompts/list", json!({})).await;
    let prompts = &response["result"]["prompts"];
    assert_eq!(prompts[0]["name"], json!("review"));
    assert_eq!(prompts[0]["arguments"][0]["name"], json!("language"));
    assert_eq!(prompts[0]["arguments"][0]["required"], json!(true));

    let response = peer
        .request(
            2,
            "prompts/get",
            json!({"name": "review", "arguments": {"language": "Rust", "focus": " Check errors."}}),
        )
        .await;
    assert_eq!(
        response["result"]["messages"],
        json!([{
            "role": "user",
            "content": {"type": "text", "text": "Review this Rust code. Check errors."}
        }])
    );

    let response = peer
        .request(3, "prompts/get", json!({"name": "review", "arguments": {}}))
        .await;
    assert_eq!(error_code(&response), -32602);

    let response = peer.request(4, "prompts/get", json!({"name": "absent"})).await;
    assert_eq!(error_code(&response), -32003);
}

#[tokio::test]
async fn roots_list() {
    let (_server, mut peer) = full_server();

    let response = peer.request(1, "roots/list", json!({})).await;
    assert_eq!(
        response["result"]["roots"],
        json!([{"uri": "file:///work", "name": "Work"}, {"uri": "file:///tmp"}])
    );
}

#[tokio::test]
async fn set_level_filters_log_messages() {
    let (server, mut peer) = full_server();

    assert!(!server
        .send_log_message(LogLevel::Debug, None, json!("too quiet"))
        .await
        .unwrap());
    peer.assert_silent().await;

    assert!(server
        .send_log_message(LogLevel::Warning, Some("db"), json!({"slow": true}))
        .await
        .unwrap());
    assert_eq!(
        peer.recv().await,
        json!({
            "jsonrpc": "2.0",
            "method": "notifications/message",
            "params": {"level": "warning", "logger": "db", "data": {"slow": true}}
        })
    );

    let response = peer
        .request(1, "logging/setLevel", json!({"level": "debug"}))
        .await;
    assert_eq!(response["result"], json!({}));
    assert!(server
        .send_log_message(LogLevel::Debug, None, json!("now audible"))
        .await
        .unwrap());
    assert_eq!(peer.recv().await["params"]["data"], json!("now audible"));

    let response = peer
        .request(2, "logging/setLevel", json!({"level": "verbose"}))
        .await;
    assert_eq!(error_code(&response), -32602);
}

#[tokio::test]
async fn sampling_is_forwarded_to_provider() {
    let (_server, mut peer) = full_server();

    let response = peer
        .request(
            1,
            "sampling/createMessage",
            json!({
                "messages": [{"role": "user", "content": {"type": "text", "text": "hello"}}],
                "maxTokens": 16
            }),
        )
        .await;
    assert_result_xor_error(&response);
    assert_eq!(response["result"]["content"]["text"], json!("You said: hello"));
    assert_eq!(response["result"]["model"], json!("canned"));
}

#[tokio::test]
async fn list_changed_notifications() {
    let (server, mut peer) = full_server();

    server.notify_tools_list_changed().await.unwrap();
    server.notify_resources_list_changed().await.unwrap();
    server.notify_prompts_list_changed().await.unwrap();
    server.notify_roots_list_changed().await.unwrap();

    for method in [
        "notifications/tools/list_changed",
        "notifications/resources/list_changed",
        "notifications/prompts/list_changed",
        "notifications/roots/list_changed",
    ] {
        assert_eq!(
            peer.recv().await,
            json!({"jsonrpc": "2.0", "method": method})
        );
    }
}

#[tokio::test]
async fn unrouted_method_is_method_not_found() {
    let (_server, mut peer) = full_server();
    let response = peer.request(1, "completion/complete", json!({})).await;
    assert_eq!(error_code(&response), -32601);
}

// =============================================================================
// No providers
// =============================================================================

#[tokio::test]
async fn unset_providers_list_nothing() {
    let (_server, mut peer) = bare_server();

    for (method, key) in [
        ("tools/list", "tools"),
        ("resources/list", "resources"),
        ("prompts/list", "prompts"),
        ("roots/list", "roots"),
    ] {
        let response = peer.request(1, method, json!({})).await;
        assert_eq!(response["result"], json!({ key: [] }), "{method}");
    }
}

#[tokio::test]
async fn unset_providers_reject_actions() {
    let (_server, mut peer) = bare_server();

    let cases = [
        ("tools/call", json!({"name": "echo"}), -32602),
        ("resources/read", json!({"uri": "mem://a"}), -32602),
        ("resources/subscribe", json!({"uri": "mem://a"}), -32602),
        ("resources/unsubscribe", json!({"uri": "mem://a"}), -32602),
        ("prompts/get", json!({"name": "p"}), -32602),
        ("logging/setLevel", json!({"level": "info"}), -32004),
        ("sampling/createMessage", json!({"messages": []}), -32004),
    ];
    for (id, (method, params, code)) in (1..).zip(cases) {
        let response = peer.request(id, method, params).await;
        assert_eq!(error_code(&response), code, "{method}");
    }
}

#[tokio::test]
async fn unset_providers_keep_default_capabilities() {
    let (server, _peer) = bare_server();

    let caps = server.protocol().capabilities();
    assert_eq!(
        caps,
        &json!({
            "prompts": {"listChanged": false},
            "resources": {"subscribe": false, "listChanged": false},
            "tools": {"listChanged": false}
        })
    );
}

#[tokio::test]
async fn log_messages_pass_without_logging_provider() {
    let (server, mut peer) = bare_server();

    assert!(server
        .send_log_message(LogLevel::Debug, None, json!("unfiltered"))
        .await
        .unwrap());
    let message = peer.recv().await;
    assert_eq!(message["params"], json!({"level": "debug", "data": "unfiltered"}));
}

#[tokio::test]
async fn closed_server_stops_sending() {
    let (server, _peer) = bare_server();

    server.close().await.unwrap();
    assert!(server.protocol().is_closed());
    assert!(matches!(
        server.notify_tools_list_changed().await,
        Err(McpError::Closed)
    ));
}
