//! JSON-RPC 2.0 message types for MCP protocol.
//!
//! This module defines the envelope types used in the Model Context Protocol
//! and the classifier that turns a decoded JSON value into one of them.
//!
//! # Message Types
//!
//! - **Request**: A message expecting a response (has `id` and `method`)
//! - **Response**: A reply to a request (has `id` and `result` or `error`)
//! - **Notification**: A one-way message (has `method`, no `id`)
//!
//! # MCP-Specific Constraints
//!
//! - Request IDs must be strings or integers (never `null`)
//! - Request IDs must be unique among the sender's outstanding requests
//! - A response carries exactly one of `result` or `error`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The JSON-RPC version marker carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// The MCP protocol version this implementation speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// A JSON-RPC 2.0 request ID.
///
/// Per the MCP specification, IDs must be strings or integers, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl RequestId {
    /// Recovers an ID from a raw JSON value.
    ///
    /// Returns `None` for anything that is not a string or an integer.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// Unique request identifier.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification message.
///
/// Notifications do not have an ID and never receive a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Creates a new notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// The outcome half of a response: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    /// The request succeeded.
    Result(Value),
    /// The request failed.
    Error(ErrorObject),
}

/// A JSON-RPC 2.0 response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// The request ID this response corresponds to.
    ///
    /// `None` (serialised as `null`) when the request's ID could not be recovered.
    pub id: Option<RequestId>,

    /// The result or error.
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            payload: ResponsePayload::Result(result),
        }
    }

    /// Creates a new error response.
    #[must_use]
    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    /// Returns `true` if this response carries an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }
}

/// The closed taxonomy of MCP error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Inbound bytes did not decode to a structurally valid envelope.
    ParseError,
    /// The envelope decoded but fails shape or semantic validation.
    InvalidRequest,
    /// No handler is registered for the request's method.
    MethodNotFound,
    /// Handler-level parameter validation failure.
    InvalidParams,
    /// Any handler failure that is not already a typed protocol error.
    InternalError,
    /// Resource URI unknown to the provider.
    ResourceNotFound,
    /// Tool missing, or its execution failed.
    ToolExecutionError,
    /// Prompt name unknown to the provider.
    PromptNotFound,
    /// The requested optional capability has no provider configured.
    CapabilityNotSupported,
}

impl ErrorCode {
    /// Every error kind, in taxonomy order.
    pub const ALL: [Self; 9] = [
        Self::ParseError,
        Self::InvalidRequest,
        Self::MethodNotFound,
        Self::InvalidParams,
        Self::InternalError,
        Self::ResourceNotFound,
        Self::ToolExecutionError,
        Self::PromptNotFound,
        Self::CapabilityNotSupported,
    ];

    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ResourceNotFound => -32001,
            Self::ToolExecutionError => -32002,
            Self::PromptNotFound => -32003,
            Self::CapabilityNotSupported => -32004,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ResourceNotFound => "Resource not found",
            Self::ToolExecutionError => "Tool execution error",
            Self::PromptNotFound => "Prompt not found",
            Self::CapabilityNotSupported => "Capability not supported",
        }
    }

    /// Looks up the error kind for a numeric code.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

/// A JSON-RPC 2.0 error object.
///
/// This is both the wire representation of an error and the typed protocol
/// error that handlers return to have their code, message and data forwarded
/// to the peer verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct ErrorObject {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Creates a new error from an error code with its default message.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self::with_message(code, code.default_message())
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Adds additional data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Returns the error kind, if the code belongs to the known taxonomy.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }

    /// Creates a parse error.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::from_code(ErrorCode::ParseError)
    }

    /// Creates an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidRequest, message)
    }

    /// Creates a method not found error.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::with_message(
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// Creates an invalid params error.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidParams, message)
    }

    /// Creates an internal error.
    ///
    /// The peer-visible message stays fixed; the failure's description goes
    /// into `data`.
    #[must_use]
    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::InternalError).with_data(Value::String(detail.into()))
    }

    /// Creates a resource not found error.
    #[must_use]
    pub fn resource_not_found(uri: &str) -> Self {
        Self::with_message(
            ErrorCode::ResourceNotFound,
            format!("Resource not found: {uri}"),
        )
    }

    /// Creates a tool execution error.
    #[must_use]
    pub fn tool_execution(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ToolExecutionError, message)
    }

    /// Creates a prompt not found error.
    #[must_use]
    pub fn prompt_not_found(name: &str) -> Self {
        Self::with_message(ErrorCode::PromptNotFound, format!("Prompt not found: {name}"))
    }

    /// Creates a capability not supported error.
    #[must_use]
    pub fn capability_not_supported(capability: &str) -> Self {
        Self::with_message(
            ErrorCode::CapabilityNotSupported,
            format!("Capability not supported: {capability}"),
        )
    }
}

/// Any classified protocol message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A response to an earlier request.
    Response(JsonRpcResponse),
    /// A notification (no response expected).
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Returns the kind of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Request(_) => MessageKind::Request,
            Self::Response(_) => MessageKind::Response,
            Self::Notification(_) => MessageKind::Notification,
        }
    }

    /// Returns the method name, if this message carries one.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) => None,
        }
    }

    /// Returns the message ID, if it has one.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => resp.id.as_ref(),
            Self::Notification(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(req: JsonRpcRequest) -> Self {
        Self::Request(req)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(resp: JsonRpcResponse) -> Self {
        Self::Response(resp)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notif: JsonRpcNotification) -> Self {
        Self::Notification(notif)
    }
}

/// The three envelope shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has `id` and `method`.
    Request,
    /// Has `id` and `result` or `error`.
    Response,
    /// Has `method` and no `id`.
    Notification,
}

/// A message that could not be classified or failed shape validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct EnvelopeError {
    /// The shape the message was classified as, or `None` if it matched none.
    pub kind: Option<MessageKind>,
    /// The ID recovered from the message, if any.
    pub id: Option<RequestId>,
    /// What was wrong with it.
    pub detail: String,
}

impl EnvelopeError {
    fn unclassifiable(id: Option<RequestId>, detail: impl Into<String>) -> Self {
        Self {
            kind: None,
            id,
            detail: detail.into(),
        }
    }

    fn invalid(kind: MessageKind, id: Option<RequestId>, detail: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            id,
            detail: detail.into(),
        }
    }

    /// Returns the error response owed to the peer.
    ///
    /// Unclassifiable messages get a parse error, malformed requests and
    /// notifications an invalid request error. Malformed responses get
    /// nothing: there is no one to answer.
    #[must_use]
    pub fn reply(&self) -> Option<JsonRpcResponse> {
        let error = match self.kind {
            None => ErrorObject::parse_error().with_data(Value::String(self.detail.clone())),
            Some(MessageKind::Request | MessageKind::Notification) => {
                ErrorObject::invalid_request(self.detail.clone())
            }
            Some(MessageKind::Response) => return None,
        };
        Some(JsonRpcResponse::error(self.id.clone(), error))
    }
}

/// Classifies and validates a decoded message.
///
/// Precedence: `id` + `method` is a request; `id` + `result`/`error` is a
/// response; `method` without `id` is a notification; anything else is
/// unclassifiable.
///
/// # Errors
///
/// Returns an [`EnvelopeError`] if the value matches no shape, or matches one
/// but fails that shape's validation.
pub fn classify(value: Value) -> Result<JsonRpcMessage, EnvelopeError> {
    let Value::Object(obj) = value else {
        return Err(EnvelopeError::unclassifiable(
            None,
            "message is not a JSON object",
        ));
    };

    let has_id = obj.contains_key("id");
    let has_method = obj.contains_key("method");
    let has_outcome = obj.contains_key("result") || obj.contains_key("error");

    if has_id && has_method {
        validate_request(obj).map(JsonRpcMessage::Request)
    } else if has_id && has_outcome {
        validate_response(obj).map(JsonRpcMessage::Response)
    } else if has_method {
        validate_notification(obj).map(JsonRpcMessage::Notification)
    } else {
        let id = obj.get("id").and_then(RequestId::from_value);
        Err(EnvelopeError::unclassifiable(
            id,
            "message is neither a request, a response nor a notification",
        ))
    }
}

/// Parses a JSON string and classifies it.
///
/// # Errors
///
/// Returns an [`EnvelopeError`] if the text is not JSON or the message is
/// malformed.
pub fn parse_message(json: &str) -> Result<JsonRpcMessage, EnvelopeError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| EnvelopeError::unclassifiable(None, format!("invalid JSON: {e}")))?;
    classify(value)
}

fn check_version(obj: &Map<String, Value>) -> Result<(), &'static str> {
    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => Ok(()),
        _ => Err("jsonrpc field must be \"2.0\""),
    }
}

fn take_method(obj: &mut Map<String, Value>) -> Result<String, &'static str> {
    match obj.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => Ok(method),
        Some(Value::String(_)) => Err("method field cannot be empty"),
        _ => Err("method field must be a string"),
    }
}

fn take_params(obj: &mut Map<String, Value>) -> Result<Option<Value>, &'static str> {
    match obj.remove("params") {
        None | Some(Value::Null) => Ok(None),
        Some(params @ (Value::Object(_) | Value::Array(_))) => Ok(Some(params)),
        Some(_) => Err("params field must be an object or an array"),
    }
}

fn validate_request(mut obj: Map<String, Value>) -> Result<JsonRpcRequest, EnvelopeError> {
    let invalid = |id: Option<RequestId>, detail: &str| {
        EnvelopeError::invalid(MessageKind::Request, id, detail)
    };

    let id = obj
        .get("id")
        .and_then(RequestId::from_value)
        .ok_or_else(|| invalid(None, "id field must be a string or an integer"))?;
    check_version(&obj).map_err(|e| invalid(Some(id.clone()), e))?;
    let method = take_method(&mut obj).map_err(|e| invalid(Some(id.clone()), e))?;
    let params = take_params(&mut obj).map_err(|e| invalid(Some(id.clone()), e))?;

    Ok(JsonRpcRequest::new(id, method, params))
}

fn validate_notification(mut obj: Map<String, Value>) -> Result<JsonRpcNotification, EnvelopeError> {
    let invalid = |detail: &str| EnvelopeError::invalid(MessageKind::Notification, None, detail);

    check_version(&obj).map_err(invalid)?;
    let method = take_method(&mut obj).map_err(invalid)?;
    let params = take_params(&mut obj).map_err(invalid)?;

    Ok(JsonRpcNotification::new(method, params))
}

fn validate_response(mut obj: Map<String, Value>) -> Result<JsonRpcResponse, EnvelopeError> {
    let raw_id = obj.remove("id").unwrap_or(Value::Null);
    let id = RequestId::from_value(&raw_id);
    let invalid = |detail: String| EnvelopeError::invalid(MessageKind::Response, id.clone(), detail);

    if id.is_none() && !raw_id.is_null() {
        return Err(invalid("id field must be a string, an integer or null".into()));
    }
    check_version(&obj).map_err(|e| invalid(e.into()))?;

    let payload = match (obj.remove("result"), obj.remove("error")) {
        (Some(result), None) => ResponsePayload::Result(result),
        (None, Some(error)) => {
            let error = serde_json::from_value(error)
                .map_err(|e| invalid(format!("malformed error object: {e}")))?;
            ResponsePayload::Error(error)
        }
        _ => {
            return Err(invalid(
                "response must carry exactly one of result or error".into(),
            ))
        }
    };

    Ok(JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        payload,
    })
}
