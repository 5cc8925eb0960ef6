//! The invocation capability consumed by stages.
//!
//! The core never talks to a model directly. It hands a rendered prompt and
//! the stage's opaque [`InvocationConfig`] to an [`Invoker`], which returns
//! plain text. Adapters for concrete providers normalize whatever their
//! client returns into that single string before it reaches a stage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Per-stage invocation settings.
///
/// The core forwards these untouched; only the invoker interprets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationConfig {
    /// The stage identifier this call is made for.
    pub stage_id: String,
    /// Model identifier, if the stage pins one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Agent description / system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-text instructions appended by the invoker.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<String>,
    /// Named tools the agent may use.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Whether the response should be formatted as markdown.
    #[serde(default)]
    pub markdown: bool,
    /// Additional decoding or provider parameters.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl InvocationConfig {
    /// Creates a config for the given stage.
    #[must_use]
    pub fn new(stage_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            ..Default::default()
        }
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the agent description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds an instruction.
    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instructions.push(instruction.into());
        self
    }

    /// Adds a tool name.
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.push(tool.into());
        self
    }

    /// Sets the markdown flag.
    #[must_use]
    pub fn with_markdown(mut self, markdown: bool) -> Self {
        self.markdown = markdown;
        self
    }

    /// Adds a free-form parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Failure category reported by an invoker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationErrorKind {
    /// The call did not finish in time.
    Timeout,
    /// The transport failed (connection, TLS, HTTP status).
    Transport,
    /// The provider rejected the call for quota or rate reasons.
    Quota,
    /// The provider answered with something that is not usable text.
    MalformedResponse,
    /// Anything else.
    Other,
}

impl fmt::Display for InvocationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Transport => write!(f, "transport"),
            Self::Quota => write!(f, "quota"),
            Self::MalformedResponse => write!(f, "malformed_response"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Error returned by an [`Invoker`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct InvocationError {
    /// Failure category.
    pub kind: InvocationErrorKind,
    /// Human-readable cause.
    pub message: String,
}

impl InvocationError {
    /// Creates a new invocation error.
    #[must_use]
    pub fn new(kind: InvocationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(InvocationErrorKind::Timeout, message)
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(InvocationErrorKind::Transport, message)
    }

    /// Creates a quota error.
    #[must_use]
    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(InvocationErrorKind::Quota, message)
    }

    /// Creates a malformed response error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(InvocationErrorKind::MalformedResponse, message)
    }
}

/// The external text-generation capability.
///
/// Implementations may be slow and may fail; they must be safe to share
/// between concurrently running pipelines.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Sends a prompt and returns the generated text.
    async fn invoke(
        &self,
        prompt: &str,
        config: &InvocationConfig,
    ) -> Result<String, InvocationError>;
}

/// An invoker backed by a synchronous closure.
///
/// Useful for deterministic transforms, demos and benchmarks.
pub struct FnInvoker<F>
where
    F: Fn(&str, &InvocationConfig) -> Result<String, InvocationError> + Send + Sync,
{
    func: F,
}

impl<F> FnInvoker<F>
where
    F: Fn(&str, &InvocationConfig) -> Result<String, InvocationError> + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FnInvoker<F>
where
    F: Fn(&str, &InvocationConfig) -> Result<String, InvocationError> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInvoker").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Invoker for FnInvoker<F>
where
    F: Fn(&str, &InvocationConfig) -> Result<String, InvocationError> + Send + Sync,
{
    async fn invoke(
        &self,
        prompt: &str,
        config: &InvocationConfig,
    ) -> Result<String, InvocationError> {
        (self.func)(prompt, config)
    }
}
