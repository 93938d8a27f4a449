//! MCP server: the method router.
//!
//! A [`Server`] owns one [`Protocol`] and installs a handler for every
//! protocol method it serves. Each handler shapes the request params,
//! forwards to the configured provider, and shapes the provider's answer
//! into the result object. When a provider is not configured, list methods
//! answer with an empty list and action methods fail.
//!
//! | Method | Unset provider |
//! |---|---|
//! | `ping` | always `{}` |
//! | `tools/list`, `resources/list`, `prompts/list`, `roots/list` | empty list |
//! | `tools/call`, `resources/read`, `resources/subscribe`, `resources/unsubscribe`, `prompts/get` | invalid params |
//! | `logging/setLevel`, `sampling/createMessage` | capability not supported |

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::McpError;
use crate::mcp::capabilities::{layer_overrides, ServerIdentity};
use crate::mcp::dispatcher::{Protocol, ProtocolOptions};
use crate::mcp::protocol::ErrorObject;
use crate::mcp::transport::{StdioTransport, Transport};
use crate::providers::{
    LogLevel, LoggingProvider, PromptProvider, ResourceProvider, RootProvider, SamplingProvider,
    ToolProvider,
};

/// Parameters for `tools/call`.
#[derive(Debug, Clone, Deserialize)]
struct ToolCallParams {
    /// Name of the tool to call.
    name: String,
    /// Arguments for the tool.
    #[serde(default)]
    arguments: Value,
}

/// Parameters for the `resources/*` methods that take a URI.
#[derive(Debug, Clone, Deserialize)]
struct ResourceParams {
    uri: String,
}

/// Parameters for `prompts/get`.
#[derive(Debug, Clone, Deserialize)]
struct PromptGetParams {
    name: String,
    #[serde(default)]
    arguments: HashMap<String, String>,
}

/// Parameters for `logging/setLevel`.
#[derive(Debug, Clone, Deserialize)]
struct SetLevelParams {
    level: LogLevel,
}

/// Configures and builds a [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    identity: ServerIdentity,
    options: ProtocolOptions,
    tools: Option<Arc<dyn ToolProvider>>,
    resources: Option<Arc<dyn ResourceProvider>>,
    prompts: Option<Arc<dyn PromptProvider>>,
    roots: Option<Arc<dyn RootProvider>>,
    logging: Option<Arc<dyn LoggingProvider>>,
    sampling: Option<Arc<dyn SamplingProvider>>,
}

impl ServerBuilder {
    /// Starts a builder for the given identity.
    #[must_use]
    pub fn new(identity: ServerIdentity) -> Self {
        Self {
            identity,
            ..Self::default()
        }
    }

    /// Sets the protocol core options.
    #[must_use]
    pub fn options(mut self, options: ProtocolOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the tool provider.
    #[must_use]
    pub fn tools(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.tools = Some(provider);
        self
    }

    /// Sets the resource provider.
    #[must_use]
    pub fn resources(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.resources = Some(provider);
        self
    }

    /// Sets the prompt provider.
    #[must_use]
    pub fn prompts(mut self, provider: Arc<dyn PromptProvider>) -> Self {
        self.prompts = Some(provider);
        self
    }

    /// Sets the root provider.
    #[must_use]
    pub fn roots(mut self, provider: Arc<dyn RootProvider>) -> Self {
        self.roots = Some(provider);
        self
    }

    /// Sets the logging provider.
    #[must_use]
    pub fn logging(mut self, provider: Arc<dyn LoggingProvider>) -> Self {
        self.logging = Some(provider);
        self
    }

    /// Sets the sampling provider.
    #[must_use]
    pub fn sampling(mut self, provider: Arc<dyn SamplingProvider>) -> Self {
        self.sampling = Some(provider);
        self
    }

    /// Capabilities implied by the configured providers.
    fn provider_capabilities(&self) -> Value {
        let mut caps = Map::new();
        if self.tools.is_some() {
            caps.insert("tools".into(), json!({"listChanged": true}));
        }
        if let Some(resources) = &self.resources {
            caps.insert(
                "resources".into(),
                json!({"subscribe": resources.supports_subscribe(), "listChanged": true}),
            );
        }
        if self.prompts.is_some() {
            caps.insert("prompts".into(), json!({"listChanged": true}));
        }
        if self.roots.is_some() {
            caps.insert("roots".into(), json!({"listChanged": true}));
        }
        if self.logging.is_some() {
            caps.insert("logging".into(), json!({}));
        }
        if self.sampling.is_some() {
            caps.insert("sampling".into(), json!({}));
        }
        Value::Object(caps)
    }

    /// Builds the server over `transport` and installs its routes.
    ///
    /// Capability overrides on the identity win over those implied by the
    /// configured providers, which win over the defaults. A `null` override
    /// removes the capability outright.
    #[must_use]
    pub fn build(self, transport: Arc<dyn Transport>) -> Server {
        let mut capabilities = self.provider_capabilities();
        layer_overrides(&mut capabilities, &self.identity.capabilities);
        let identity = ServerIdentity {
            capabilities,
            ..self.identity
        };

        let protocol = Protocol::with_options(transport, identity, self.options);
        let server = Server {
            protocol,
            resources: self.resources,
            logging: self.logging,
        };
        server.install_routes(self.tools, self.prompts, self.roots, self.sampling);
        server
    }
}

/// An MCP server bound to one transport.
///
/// Cloning is cheap; clones share the same protocol core.
#[derive(Clone)]
pub struct Server {
    protocol: Protocol,
    resources: Option<Arc<dyn ResourceProvider>>,
    logging: Option<Arc<dyn LoggingProvider>>,
}

impl Server {
    /// Starts a [`ServerBuilder`].
    #[must_use]
    pub fn builder(identity: ServerIdentity) -> ServerBuilder {
        ServerBuilder::new(identity)
    }

    /// Returns the protocol core, for registering extra handlers or sending
    /// requests to the client.
    #[must_use]
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    fn install_routes(
        &self,
        tools: Option<Arc<dyn ToolProvider>>,
        prompts: Option<Arc<dyn PromptProvider>>,
        roots: Option<Arc<dyn RootProvider>>,
        sampling: Option<Arc<dyn SamplingProvider>>,
    ) {
        let p = &self.protocol;

        p.on_request("ping", |_, _| async { Ok(json!({})) });

        let provider = tools.clone();
        p.on_request("tools/list", move |_, _| list_tools(provider.clone()));
        p.on_request("tools/call", move |params, _| call_tool(tools.clone(), params));

        let provider = self.resources.clone();
        p.on_request("resources/list", move |_, _| list_resources(provider.clone()));
        let provider = self.resources.clone();
        p.on_request("resources/read", move |params, _| {
            read_resource(provider.clone(), params)
        });
        let provider = self.resources.clone();
        p.on_request("resources/subscribe", move |params, _| {
            subscribe(provider.clone(), params, true)
        });
        let provider = self.resources.clone();
        p.on_request("resources/unsubscribe", move |params, _| {
            subscribe(provider.clone(), params, false)
        });

        let provider = prompts.clone();
        p.on_request("prompts/list", move |_, _| list_prompts(provider.clone()));
        p.on_request("prompts/get", move |params, _| get_prompt(prompts.clone(), params));

        p.on_request("roots/list", move |_, _| list_roots(roots.clone()));

        let provider = self.logging.clone();
        p.on_request("logging/setLevel", move |params, _| {
            set_level(provider.clone(), params)
        });
        p.on_request("sampling/createMessage", move |params, _| {
            create_message(sampling.clone(), params)
        });
    }

    /// Tells the client the tool list changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be sent.
    pub async fn notify_tools_list_changed(&self) -> Result<(), McpError> {
        self.protocol
            .send_notification("notifications/tools/list_changed", None)
            .await
    }

    /// Tells the client the resource list changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be sent.
    pub async fn notify_resources_list_changed(&self) -> Result<(), McpError> {
        self.protocol
            .send_notification("notifications/resources/list_changed", None)
            .await
    }

    /// Tells the client the prompt list changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be sent.
    pub async fn notify_prompts_list_changed(&self) -> Result<(), McpError> {
        self.protocol
            .send_notification("notifications/prompts/list_changed", None)
            .await
    }

    /// Tells the client the root list changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be sent.
    pub async fn notify_roots_list_changed(&self) -> Result<(), McpError> {
        self.protocol
            .send_notification("notifications/roots/list_changed", None)
            .await
    }

    /// Tells the client a resource changed, if it subscribed to it.
    ///
    /// Returns `true` if a notification was sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be sent.
    pub async fn notify_resource_updated(&self, uri: &str) -> Result<bool, McpError> {
        let subscribed = self
            .resources
            .as_ref()
            .is_some_and(|resources| resources.is_subscribed(uri));
        if !subscribed {
            debug!(uri, "no subscription, not notifying");
            return Ok(false);
        }

        self.protocol
            .send_notification("notifications/resources/updated", Some(json!({"uri": uri})))
            .await?;
        Ok(true)
    }

    /// Sends a log message to the client.
    ///
    /// With a logging provider configured, messages below its level are
    /// suppressed. Returns `true` if a notification was sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be sent.
    pub async fn send_log_message(
        &self,
        level: LogLevel,
        logger: Option<&str>,
        data: Value,
    ) -> Result<bool, McpError> {
        if let Some(logging) = &self.logging {
            if level < logging.level() {
                return Ok(false);
            }
        }

        let mut params = json!({"level": level, "data": data});
        if let Some(logger) = logger {
            params["logger"] = json!(logger);
        }
        self.protocol
            .send_notification("notifications/message", Some(params))
            .await?;
        Ok(true)
    }

    /// Closes the protocol core and its transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to shut down.
    pub async fn close(&self) -> Result<(), McpError> {
        self.protocol.close().await
    }
}

/// Serves `server` over a stdio transport until EOF or a shutdown signal.
///
/// At EOF every message already read is answered before the transport
/// closes. Requests the server sent are rejected, since no response can
/// arrive any more.
///
/// # Errors
///
/// Returns an error if reading the transport fails.
#[cfg(unix)]
pub async fn serve_stdio(server: &Server, transport: &StdioTransport) -> Result<(), McpError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint =
        signal(SignalKind::interrupt()).map_err(|e| McpError::Transport(e.into()))?;
    let mut sigterm =
        signal(SignalKind::terminate()).map_err(|e| McpError::Transport(e.into()))?;

    let input_ended = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, initiating graceful shutdown");
            false
        }

        _ = sigterm.recv() => {
            info!("Received SIGTERM, initiating graceful shutdown");
            false
        }

        result = transport.listen() => {
            result?;
            true
        }
    };

    if input_ended {
        server.protocol.fail_pending();
        tokio::select! {
            () = server.protocol.drain() => {}

            _ = sigint.recv() => {
                info!("Received SIGINT while finishing requests, shutting down");
            }

            _ = sigterm.recv() => {
                info!("Received SIGTERM while finishing requests, shutting down");
            }
        }
    }

    server.close().await
}

/// Serves `server` over a stdio transport until EOF or a shutdown signal.
///
/// At EOF every message already read is answered before the transport
/// closes.
///
/// # Errors
///
/// Returns an error if reading the transport fails.
#[cfg(windows)]
pub async fn serve_stdio(server: &Server, transport: &StdioTransport) -> Result<(), McpError> {
    let input_ended = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            false
        }

        result = transport.listen() => {
            result?;
            true
        }
    };

    if input_ended {
        server.protocol.fail_pending();
        tokio::select! {
            () = server.protocol.drain() => {}

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C while finishing requests, shutting down");
            }
        }
    }

    server.close().await
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ErrorObject> {
    let params = params.ok_or_else(|| ErrorObject::invalid_params("Missing params"))?;
    serde_json::from_value(params)
        .map_err(|e| ErrorObject::invalid_params(format!("Invalid params: {e}")))
}

fn not_configured(area: &str) -> McpError {
    ErrorObject::invalid_params(format!("No {area} provider configured")).into()
}

async fn list_tools(tools: Option<Arc<dyn ToolProvider>>) -> Result<Value, McpError> {
    let tools = match tools {
        Some(provider) => provider.list().await?,
        None => Vec::new(),
    };
    Ok(json!({ "tools": tools }))
}

async fn call_tool(
    tools: Option<Arc<dyn ToolProvider>>,
    params: Option<Value>,
) -> Result<Value, McpError> {
    let tools = tools.ok_or_else(|| not_configured("tool"))?;
    let params: ToolCallParams = parse_params(params)?;

    let result = tools.call(&params.name, params.arguments).await?;
    Ok(serde_json::to_value(result)?)
}

async fn list_resources(resources: Option<Arc<dyn ResourceProvider>>) -> Result<Value, McpError> {
    let resources = match resources {
        Some(provider) => provider.list().await?,
        None => Vec::new(),
    };
    Ok(json!({ "resources": resources }))
}

async fn read_resource(
    resources: Option<Arc<dyn ResourceProvider>>,
    params: Option<Value>,
) -> Result<Value, McpError> {
    let resources = resources.ok_or_else(|| not_configured("resource"))?;
    let params: ResourceParams = parse_params(params)?;

    let contents = resources.read(&params.uri).await?;
    Ok(json!({ "contents": [contents] }))
}

async fn subscribe(
    resources: Option<Arc<dyn ResourceProvider>>,
    params: Option<Value>,
    subscribe: bool,
) -> Result<Value, McpError> {
    let resources = resources.ok_or_else(|| not_configured("resource"))?;
    let params: ResourceParams = parse_params(params)?;

    if subscribe {
        resources.subscribe(&params.uri).await?;
    } else {
        resources.unsubscribe(&params.uri).await?;
    }
    Ok(json!({}))
}

async fn list_prompts(prompts: Option<Arc<dyn PromptProvider>>) -> Result<Value, McpError> {
    let prompts = match prompts {
        Some(provider) => provider.list().await?,
        None => Vec::new(),
    };
    Ok(json!({ "prompts": prompts }))
}

async fn get_prompt(
    prompts: Option<Arc<dyn PromptProvider>>,
    params: Option<Value>,
) -> Result<Value, McpError> {
    let prompts = prompts.ok_or_else(|| not_configured("prompt"))?;
    let params: PromptGetParams = parse_params(params)?;

    let messages = prompts.get(&params.name, &params.arguments).await?;
    Ok(json!({ "messages": messages }))
}

async fn list_roots(roots: Option<Arc<dyn RootProvider>>) -> Result<Value, McpError> {
    let roots = match roots {
        Some(provider) => provider.list().await?,
        None => Vec::new(),
    };
    Ok(json!({ "roots": roots }))
}

async fn set_level(
    logging: Option<Arc<dyn LoggingProvider>>,
    params: Option<Value>,
) -> Result<Value, McpError> {
    let logging = logging.ok_or_else(|| ErrorObject::capability_not_supported("logging"))?;
    let params: SetLevelParams = parse_params(params)?;

    logging.set_level(params.level).await?;
    Ok(json!({}))
}

async fn create_message(
    sampling: Option<Arc<dyn SamplingProvider>>,
    params: Option<Value>,
) -> Result<Value, McpError> {
    let sampling = sampling.ok_or_else(|| ErrorObject::capability_not_supported("sampling"))?;
    let params: Map<String, Value> = parse_params(params)?;

    sampling.create_message(Value::Object(params)).await
}
