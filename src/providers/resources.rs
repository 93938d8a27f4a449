//! Resources: URI-addressed documents the client can read and watch.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::validate_uri;
use crate::error::McpError;
use crate::mcp::protocol::ErrorObject;

/// A resource descriptor for the `resources/list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource URI. Must carry a scheme.
    pub uri: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Resource {
    /// Creates a resource descriptor.
    #[must_use]
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Contents of a resource, as returned by `resources/read`.
///
/// Exactly one of `text` and `blob` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// Resource URI.
    pub uri: String,
    /// MIME type of the contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64-encoded binary contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ResourceContents {
    /// Creates text contents.
    #[must_use]
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: None,
            text: Some(text.into()),
            blob: None,
        }
    }

    /// Creates binary contents, base64-encoding `bytes`.
    #[must_use]
    pub fn blob(uri: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            uri: uri.into(),
            mime_type: None,
            text: None,
            blob: Some(BASE64_STANDARD.encode(bytes)),
        }
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: Option<String>) -> Self {
        self.mime_type = mime_type;
        self
    }
}

/// Serves `resources/list`, `resources/read` and, optionally,
/// `resources/subscribe` and `resources/unsubscribe`.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Lists the available resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be produced.
    async fn list(&self) -> Result<Vec<Resource>, McpError>;

    /// Reads one resource.
    ///
    /// # Errors
    ///
    /// Returns a resource not found error for unknown URIs.
    async fn read(&self, uri: &str) -> Result<ResourceContents, McpError>;

    /// Subscribes the client to updates of `uri`.
    ///
    /// # Errors
    ///
    /// Returns a capability not supported error unless overridden.
    async fn subscribe(&self, uri: &str) -> Result<(), McpError> {
        let _ = uri;
        Err(ErrorObject::capability_not_supported("resources/subscribe").into())
    }

    /// Cancels a subscription.
    ///
    /// # Errors
    ///
    /// Returns a capability not supported error unless overridden.
    async fn unsubscribe(&self, uri: &str) -> Result<(), McpError> {
        let _ = uri;
        Err(ErrorObject::capability_not_supported("resources/unsubscribe").into())
    }

    /// Returns `true` if this provider implements subscriptions.
    fn supports_subscribe(&self) -> bool {
        false
    }

    /// Returns `true` if the client is subscribed to `uri`.
    fn is_subscribed(&self, uri: &str) -> bool {
        let _ = uri;
        false
    }
}

#[derive(Debug, Clone)]
enum Body {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Entry {
    resource: Resource,
    body: Body,
}

/// In-memory [`ResourceProvider`] with subscription support.
///
/// Resources are listed in registration order.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: RwLock<IndexMap<String, Entry>>,
    subscriptions: Mutex<HashSet<String>>,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a text resource.
    ///
    /// # Errors
    ///
    /// Returns an invalid params error if the URI has no scheme, the name is
    /// empty, or the URI is already registered.
    pub fn register_text(
        &self,
        resource: Resource,
        text: impl Into<String>,
    ) -> Result<(), ErrorObject> {
        self.insert(resource, Body::Text(text.into()))
    }

    /// Registers a binary resource. Its contents are served base64-encoded.
    ///
    /// # Errors
    ///
    /// As [`ResourceRegistry::register_text`].
    pub fn register_binary(&self, resource: Resource, bytes: Vec<u8>) -> Result<(), ErrorObject> {
        self.insert(resource, Body::Binary(bytes))
    }

    fn insert(&self, resource: Resource, body: Body) -> Result<(), ErrorObject> {
        validate_uri(&resource.uri)?;
        if resource.name.trim().is_empty() {
            return Err(ErrorObject::invalid_params(format!(
                "Resource {} must have a name",
                resource.uri
            )));
        }

        let mut resources = self.resources.write().unwrap_or_else(PoisonError::into_inner);
        if resources.contains_key(&resource.uri) {
            return Err(ErrorObject::invalid_params(format!(
                "Resource already registered: {}",
                resource.uri
            )));
        }

        debug!(uri = %resource.uri, "registered resource");
        resources.insert(resource.uri.clone(), Entry { resource, body });
        Ok(())
    }

    /// Removes a resource and any subscription to it. Returns `true` if it
    /// was registered.
    pub fn unregister(&self, uri: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(uri)
            .is_some()
    }

    /// Returns the number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no resources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, uri: &str) -> bool {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(uri)
    }
}

#[async_trait]
impl ResourceProvider for ResourceRegistry {
    async fn list(&self) -> Result<Vec<Resource>, McpError> {
        Ok(self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.resource.clone())
            .collect())
    }

    async fn read(&self, uri: &str) -> Result<ResourceContents, McpError> {
        validate_uri(uri)?;

        let entry = self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
            .ok_or_else(|| ErrorObject::resource_not_found(uri))?;

        let contents = match &entry.body {
            Body::Text(text) => ResourceContents::text(uri, text.clone()),
            Body::Binary(bytes) => ResourceContents::blob(uri, bytes),
        };
        Ok(contents.with_mime_type(entry.resource.mime_type))
    }

    async fn subscribe(&self, uri: &str) -> Result<(), McpError> {
        validate_uri(uri)?;
        if !self.contains(uri) {
            return Err(ErrorObject::resource_not_found(uri).into());
        }

        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.to_string());
        debug!(uri, "subscribed to resource");
        Ok(())
    }

    async fn unsubscribe(&self, uri: &str) -> Result<(), McpError> {
        validate_uri(uri)?;
        let removed = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
        if removed {
            debug!(uri, "unsubscribed from resource");
        }
        Ok(())
    }

    fn supports_subscribe(&self) -> bool {
        true
    }

    fn is_subscribed(&self, uri: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(uri)
    }
}
