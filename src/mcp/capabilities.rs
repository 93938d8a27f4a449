//! Capability negotiation types.
//!
//! The server's capability descriptor is computed once, from
//! [`ServerCapabilities::default`] merged with the embedding application's
//! overrides, and never changes afterwards.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server name used when none is configured.
pub const SERVER_NAME: &str = "mcp-dispatch";

/// Server information for the initialisation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl ServerInfo {
    /// Creates server information from a name and version.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self::new(SERVER_NAME, env!("CARGO_PKG_VERSION"))
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

/// The static identity a protocol core answers `initialize` with.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerIdentity {
    /// Name and version.
    pub info: ServerInfo,
    /// Capability overrides, merged over the defaults key by key.
    pub capabilities: Value,
    /// Optional usage instructions for the client.
    pub instructions: Option<String>,
}

impl ServerIdentity {
    /// Creates an identity with no capability overrides and no instructions.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: ServerInfo::new(name, version),
            capabilities: Value::Object(Map::new()),
            instructions: None,
        }
    }

    /// Sets the capability overrides.
    #[must_use]
    pub fn with_capabilities(mut self, overrides: Value) -> Self {
        self.capabilities = overrides;
        self
    }

    /// Sets the instructions string.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

impl Default for ServerIdentity {
    fn default() -> Self {
        let info = ServerInfo::default();
        Self::new(info.name, info.version)
    }
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    pub capabilities: Map<String, Value>,
    /// Client information.
    pub client_info: ClientInfo,
}

/// Result of the initialize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// The server's protocol version.
    pub protocol_version: String,
    /// Merged server capabilities.
    pub capabilities: Value,
    /// Server identity.
    pub server_info: ServerInfo,
    /// Optional usage instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Capabilities that a server may declare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Server emits log messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<EmptyCapability>,

    /// Server provides prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,

    /// Server provides resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,

    /// Server provides tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,

    /// Server exposes filesystem roots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<ListChangedCapability>,

    /// Server can service sampling requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<EmptyCapability>,

    /// Experimental capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            logging: None,
            prompts: Some(ListChangedCapability::default()),
            resources: Some(ResourcesCapability::default()),
            tools: Some(ListChangedCapability::default()),
            roots: None,
            sampling: None,
            experimental: None,
        }
    }
}

/// A capability with no sub-flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyCapability {}

/// A capability whose only sub-flag is list change notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedCapability {
    /// Whether the list can change during the session.
    pub list_changed: bool,
}

/// Resource capability sub-flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    /// Whether clients may subscribe to resource updates.
    pub subscribe: bool,
    /// Whether the resource list can change during the session.
    pub list_changed: bool,
}

/// Merges capability overrides over a set of defaults.
///
/// Objects merge recursively and the override wins for every other key. A
/// `null` override removes the key.
#[must_use]
pub fn merge_capabilities(defaults: &ServerCapabilities, overrides: &Value) -> Value {
    let mut merged = serde_json::to_value(defaults).unwrap_or_else(|_| Value::Object(Map::new()));
    merge_json(&mut merged, overrides);
    merged
}

/// Recursively merges `overlay` into `base`.
fn merge_json(base: &mut Value, overlay: &Value) {
    let (Value::Object(base), Value::Object(overlay)) = (base, overlay) else {
        return;
    };

    for (key, value) in overlay {
        if value.is_null() {
            base.remove(key);
            continue;
        }
        if let (Some(existing @ Value::Object(_)), Value::Object(_)) = (base.get_mut(key), value) {
            merge_json(existing, value);
            continue;
        }
        base.insert(key.clone(), value.clone());
    }
}

/// Layers `overlay` over `base` without resolving removals.
///
/// Objects merge recursively and `null` values are kept, so a later
/// [`merge_capabilities`] still sees them and removes the key from the
/// defaults as well.
pub(crate) fn layer_overrides(base: &mut Value, overlay: &Value) {
    let (Value::Object(base), Value::Object(overlay)) = (base, overlay) else {
        return;
    };

    for (key, value) in overlay {
        if let (Some(existing @ Value::Object(_)), Value::Object(_)) = (base.get_mut(key), value) {
            layer_overrides(existing, value);
            continue;
        }
        base.insert(key.clone(), value.clone());
    }
}
