//! Roots: the locations the server considers in scope.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::validate_uri;
use crate::error::McpError;
use crate::mcp::protocol::ErrorObject;

/// A root for the `roots/list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Root URI. Must carry a scheme.
    pub uri: String,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Root {
    /// Creates an unnamed root.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Serves `roots/list`.
#[async_trait]
pub trait RootProvider: Send + Sync {
    /// Lists the roots.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be produced.
    async fn list(&self) -> Result<Vec<Root>, McpError>;
}

/// In-memory [`RootProvider`].
#[derive(Debug, Default)]
pub struct RootRegistry {
    roots: RwLock<Vec<Root>>,
}

impl RootRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from a list of roots.
    ///
    /// # Errors
    ///
    /// Returns an invalid params error for the first root without a scheme
    /// or with a duplicate URI.
    pub fn from_roots(roots: impl IntoIterator<Item = Root>) -> Result<Self, ErrorObject> {
        let registry = Self::new();
        for root in roots {
            registry.add(root)?;
        }
        Ok(registry)
    }

    /// Adds a root.
    ///
    /// # Errors
    ///
    /// Returns an invalid params error if the URI has no scheme or is
    /// already present.
    pub fn add(&self, root: Root) -> Result<(), ErrorObject> {
        validate_uri(&root.uri)?;

        let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
        if roots.iter().any(|r| r.uri == root.uri) {
            return Err(ErrorObject::invalid_params(format!(
                "Root already registered: {}",
                root.uri
            )));
        }
        roots.push(root);
        Ok(())
    }

    /// Removes a root. Returns `true` if it was present.
    pub fn remove(&self, uri: &str) -> bool {
        let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
        let before = roots.len();
        roots.retain(|r| r.uri != uri);
        roots.len() != before
    }

    /// Returns the number of roots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if there are no roots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RootProvider for RootRegistry {
    async fn list(&self) -> Result<Vec<Root>, McpError> {
        Ok(self
            .roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
