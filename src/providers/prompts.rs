//! Prompts: named message templates the client can expand with arguments.

use std::collections::{HashMap, HashSet};
use std::sync::{LazyLock, PoisonError, RwLock};

use async_trait::async_trait;
use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::McpError;
use crate::mcp::protocol::ErrorObject;

/// `{{name}}` placeholders, optionally padded with whitespace.
static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*)\s*\}\}"));

fn placeholder() -> Result<&'static Regex, ErrorObject> {
    PLACEHOLDER
        .as_ref()
        .map_err(|e| ErrorObject::internal_error(e.to_string()))
}

/// A prompt descriptor for the `prompts/list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Unique prompt name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

impl Prompt {
    /// Creates a prompt with no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares an argument.
    #[must_use]
    pub fn with_argument(mut self, argument: PromptArgument) -> Self {
        self.arguments.push(argument);
        self
    }
}

/// One argument a prompt accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name, as used in `{{name}}` placeholders.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied.
    #[serde(default)]
    pub required: bool,
}

impl PromptArgument {
    /// Declares a required argument.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: true,
        }
    }

    /// Declares an optional argument.
    #[must_use]
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: false,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Who a prompt message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The model side of the conversation.
    Assistant,
}

/// Content of a prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// One message of an expanded prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Message author.
    pub role: Role,
    /// Message content.
    pub content: PromptContent,
}

impl PromptMessage {
    /// Creates a text message.
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: PromptContent::Text { text: text.into() },
        }
    }
}

/// Serves `prompts/list` and `prompts/get`.
#[async_trait]
pub trait PromptProvider: Send + Sync {
    /// Lists the available prompts.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be produced.
    async fn list(&self) -> Result<Vec<Prompt>, McpError>;

    /// Expands a prompt with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns a prompt not found error for unknown names, or an invalid
    /// params error for missing or unknown arguments.
    async fn get(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<Vec<PromptMessage>, McpError>;
}

#[derive(Debug, Clone)]
struct Template {
    prompt: Prompt,
    messages: Vec<PromptMessage>,
}

/// In-memory [`PromptProvider`] backed by `{{name}}` message templates.
///
/// Prompts are listed in registration order.
#[derive(Debug, Default)]
pub struct PromptRegistry {
    templates: RwLock<IndexMap<String, Template>>,
}

impl PromptRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a prompt and its message templates.
    ///
    /// # Errors
    ///
    /// Returns an invalid params error if the name is empty or taken, an
    /// argument is declared twice, or a template references an undeclared
    /// argument.
    pub fn register(&self, prompt: Prompt, messages: Vec<PromptMessage>) -> Result<(), ErrorObject> {
        if prompt.name.trim().is_empty() {
            return Err(ErrorObject::invalid_params("Prompt name must not be empty"));
        }

        let mut declared = HashSet::new();
        for argument in &prompt.arguments {
            if argument.name.trim().is_empty() || !declared.insert(argument.name.as_str()) {
                return Err(ErrorObject::invalid_params(format!(
                    "Prompt {} declares an empty or duplicate argument",
                    prompt.name
                )));
            }
        }

        let placeholder = placeholder()?;
        for message in &messages {
            let PromptContent::Text { text } = &message.content;
            if let Some(unknown) = placeholder
                .captures_iter(text)
                .map(|caps| caps.get(1).map_or("", |m| m.as_str()))
                .find(|name| !declared.contains(name))
            {
                return Err(ErrorObject::invalid_params(format!(
                    "Prompt {} references undeclared argument: {unknown}",
                    prompt.name
                )));
            }
        }

        let mut templates = self.templates.write().unwrap_or_else(PoisonError::into_inner);
        if templates.contains_key(&prompt.name) {
            return Err(ErrorObject::invalid_params(format!(
                "Prompt already registered: {}",
                prompt.name
            )));
        }

        debug!(prompt = %prompt.name, "registered prompt");
        templates.insert(prompt.name.clone(), Template { prompt, messages });
        Ok(())
    }

    /// Removes a prompt. Returns `true` if it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(name)
            .is_some()
    }

    /// Returns the number of registered prompts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no prompts are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PromptProvider for PromptRegistry {
    async fn list(&self) -> Result<Vec<Prompt>, McpError> {
        Ok(self
            .templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|template| template.prompt.clone())
            .collect())
    }

    async fn get(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<Vec<PromptMessage>, McpError> {
        let template = self
            .templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ErrorObject::prompt_not_found(name))?;

        for argument in &template.prompt.arguments {
            if argument.required && !arguments.contains_key(&argument.name) {
                return Err(ErrorObject::invalid_params(format!(
                    "Missing required argument: {}",
                    argument.name
                ))
                .into());
            }
        }
        if let Some(unknown) = arguments
            .keys()
            .find(|key| !template.prompt.arguments.iter().any(|a| &a.name == *key))
        {
            return Err(ErrorObject::invalid_params(format!("Unknown argument: {unknown}")).into());
        }

        let placeholder = placeholder()?;
        Ok(template
            .messages
            .iter()
            .map(|message| {
                let PromptContent::Text { text } = &message.content;
                let expanded = placeholder.replace_all(text, |caps: &Captures<'_>| {
                    arguments.get(&caps[1]).cloned().unwrap_or_default()
                });
                PromptMessage::text(message.role, expanded)
            })
            .collect())
    }
}
