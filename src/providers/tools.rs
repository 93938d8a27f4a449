//! Tools: named operations the client can invoke with JSON arguments.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::McpError;
use crate::mcp::dispatcher::panic_message;
use crate::mcp::protocol::ErrorObject;

/// A tool definition for the `tools/list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

impl Tool {
    /// Creates a tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Content item in a tool call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Base64-encoded image content.
    Image {
        /// The image data.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool, so we must take &bool here
const fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates an error text result.
    ///
    /// Use this for failures the model should see and react to. Failures of
    /// the call itself are returned as errors instead.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }
}

/// Serves `tools/list` and `tools/call`.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Lists the available tools.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool list cannot be produced.
    async fn list(&self) -> Result<Vec<Tool>, McpError>;

    /// Calls a tool.
    ///
    /// # Errors
    ///
    /// Returns a tool execution error for unknown tools or failed calls, or
    /// an invalid params error for bad arguments.
    async fn call(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError>;
}

/// A registered tool implementation.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<ToolCallResult, McpError>> + Send + Sync>;

#[derive(Clone)]
struct RegisteredTool {
    tool: Tool,
    handler: ToolHandler,
}

/// In-memory [`ToolProvider`].
///
/// Tools are listed in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<IndexMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool and the function that runs it.
    ///
    /// # Errors
    ///
    /// Returns an invalid params error if the name is empty or taken, or the
    /// input schema is not an object schema.
    pub fn register<F, Fut>(&self, tool: Tool, handler: F) -> Result<(), ErrorObject>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolCallResult, McpError>> + Send + 'static,
    {
        if tool.name.trim().is_empty() {
            return Err(ErrorObject::invalid_params("Tool name must not be empty"));
        }
        if tool.input_schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(ErrorObject::invalid_params(format!(
                "Tool {} must have an input schema of type \"object\"",
                tool.name
            )));
        }

        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(&tool.name) {
            return Err(ErrorObject::invalid_params(format!(
                "Tool already registered: {}",
                tool.name
            )));
        }

        debug!(tool = %tool.name, "registered tool");
        let handler: ToolHandler = Arc::new(move |arguments| handler(arguments).boxed());
        tools.insert(tool.name.clone(), RegisteredTool { tool, handler });
        Ok(())
    }

    /// Removes a tool. Returns `true` if it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(name)
            .is_some()
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, name: &str) -> Option<RegisteredTool> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl ToolProvider for ToolRegistry {
    async fn list(&self) -> Result<Vec<Tool>, McpError> {
        Ok(self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|registered| registered.tool.clone())
            .collect())
    }

    async fn call(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let Some(registered) = self.lookup(name) else {
            return Err(ErrorObject::tool_execution(format!("Unknown tool: {name}")).into());
        };

        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        validate_arguments(&registered.tool.input_schema, &arguments)?;

        debug!(tool = name, "calling tool");
        let handler = registered.handler;
        let outcome = AssertUnwindSafe(async move { handler(arguments).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(result) => result.map_err(|e| match e {
                McpError::Rpc(error) => McpError::Rpc(error),
                other => ErrorObject::tool_execution(format!("Tool {name} failed: {other}")).into(),
            }),
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(tool = name, %detail, "tool panicked");
                Err(ErrorObject::tool_execution(format!("Tool {name} panicked: {detail}")).into())
            }
        }
    }
}

/// Checks arguments against the `required`, `properties.*.type` and
/// `additionalProperties` keywords of an object schema.
///
/// Anything else in the schema is ignored.
///
/// # Errors
///
/// Returns an invalid params error describing the first violation.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), ErrorObject> {
    let Value::Object(arguments) = arguments else {
        return Err(ErrorObject::invalid_params("Tool arguments must be an object"));
    };

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    for field in required {
        if !arguments.contains_key(field) {
            return Err(ErrorObject::invalid_params(format!(
                "Missing required argument: {field}"
            )));
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in arguments {
        let declared = properties.and_then(|p| p.get(key));
        let Some(declared) = declared else {
            if closed {
                return Err(ErrorObject::invalid_params(format!(
                    "Unexpected argument: {key}"
                )));
            }
            continue;
        };

        let type_ok = match declared.get("type") {
            Some(Value::String(expected)) => matches_type(expected, value),
            Some(Value::Array(options)) => options
                .iter()
                .filter_map(Value::as_str)
                .any(|expected| matches_type(expected, value)),
            _ => true,
        };
        if !type_ok {
            return Err(ErrorObject::invalid_params(format!(
                "Argument {key} has the wrong type (expected {})",
                declared["type"]
            )));
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::ErrorCode;
    use serde_json::json;

    fn echo_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"message": {"type": "string"}, "repeat": {"type": "integer"}},
            "required": ["message"]
        })
    }

    fn registry_with_echo() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry
            .register(
                Tool::new("echo", echo_schema()).with_description("Echoes its input"),
                |args| async move {
                    let message = args["message"].as_str().unwrap_or_default().to_string();
                    Ok(ToolCallResult::text(message))
                },
            )
            .unwrap();
        registry
    }

    fn code(err: &McpError) -> Option<ErrorCode> {
        err.as_rpc().and_then(ErrorObject::kind)
    }

    #[test]
    fn tool_serialises_with_camel_case_schema() {
        let tool = Tool::new("echo", json!({"type": "object"}));
        assert_eq!(
            serde_json::to_value(&tool).unwrap(),
            json!({"name": "echo", "inputSchema": {"type": "object"}})
        );
    }

    #[test]
    fn tool_call_result_serialisation() {
        assert_eq!(
            serde_json::to_value(ToolCallResult::text("hi")).unwrap(),
            json!({"content": [{"type": "text", "text": "hi"}]})
        );
        assert_eq!(
            serde_json::to_value(ToolCallResult::error("bad")).unwrap(),
            json!({"content": [{"type": "text", "text": "bad"}], "isError": true})
        );
    }

    #[test]
    fn register_rejects_bad_descriptors() {
        let registry = registry_with_echo();
        let noop = |_| async { Ok(ToolCallResult::text("")) };

        assert!(registry.register(Tool::new("", json!({"type": "object"})), noop).is_err());
        assert!(registry.register(Tool::new("x", json!({"type": "string"})), noop).is_err());
        assert!(registry.register(Tool::new("echo", echo_schema()), noop).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn list_preserves_registration_order() {
        let registry = registry_with_echo();
        registry
            .register(Tool::new("alpha", json!({"type": "object"})), |_| async {
                Ok(ToolCallResult::text("a"))
            })
            .unwrap();

        let names: Vec<_> = registry.list().await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["echo", "alpha"]);
    }

    #[tokio::test]
    async fn call_runs_handler() {
        let registry = registry_with_echo();
        let result = registry.call("echo", json!({"message": "hi"})).await.unwrap();
        assert_eq!(result, ToolCallResult::text("hi"));
    }

    #[tokio::test]
    async fn unknown_tool_is_tool_execution_error() {
        let registry = registry_with_echo();
        let err = registry.call("nope", json!({})).await.unwrap_err();
        assert_eq!(code(&err), Some(ErrorCode::ToolExecutionError));
    }

    #[tokio::test]
    async fn arguments_are_checked() {
        let registry = registry_with_echo();

        let err = registry.call("echo", json!({})).await.unwrap_err();
        assert_eq!(code(&err), Some(ErrorCode::InvalidParams));

        let err = registry.call("echo", Value::Null).await.unwrap_err();
        assert_eq!(code(&err), Some(ErrorCode::InvalidParams));

        let err = registry
            .call("echo", json!({"message": "hi", "repeat": 1.5}))
            .await
            .unwrap_err();
        assert_eq!(code(&err), Some(ErrorCode::InvalidParams));

        let err = registry.call("echo", json!(["hi"])).await.unwrap_err();
        assert_eq!(code(&err), Some(ErrorCode::InvalidParams));
    }

    #[tokio::test]
    async fn handler_failure_becomes_tool_execution_error() {
        let registry = ToolRegistry::new();
        registry
            .register(Tool::new("fail", json!({"type": "object"})), |_| async {
                Err(McpError::other("backend unavailable"))
            })
            .unwrap();

        let err = registry.call("fail", json!({})).await.unwrap_err();
        assert_eq!(code(&err), Some(ErrorCode::ToolExecutionError));
        assert!(err.to_string().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn panicking_tool_becomes_tool_execution_error() {
        let registry = ToolRegistry::new();
        registry
            .register(Tool::new("explode", json!({"type": "object"})), |_| async { panic!("fuse lit") })
            .unwrap();

        let err = registry.call("explode", json!({})).await.unwrap_err();
        assert_eq!(code(&err), Some(ErrorCode::ToolExecutionError));
        assert!(err.to_string().contains("fuse lit"));

        // The registry is still usable afterwards.
        assert!(registry.lookup("explode").is_some());
    }

    #[tokio::test]
    async fn unregister_removes_tool() {
        let registry = registry_with_echo();
        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
        assert!(registry.is_empty());
        assert!(registry.call("echo", json!({"message": "x"})).await.is_err());
    }

    #[test]
    fn closed_schemas_reject_extra_arguments() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": ["string", "null"]}},
            "additionalProperties": false
        });

        assert!(validate_arguments(&schema, &json!({"a": null})).is_ok());
        assert!(validate_arguments(&schema, &json!({"a": "x"})).is_ok());
        assert!(validate_arguments(&schema, &json!({"a": 1})).is_err());
        assert!(validate_arguments(&schema, &json!({"b": 1})).is_err());
        assert!(validate_arguments(&json!({"type": "object"}), &json!({"b": 1})).is_ok());
    }
}
