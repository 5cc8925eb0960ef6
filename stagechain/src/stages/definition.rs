//! Declarative stage definitions, loadable from configuration.

use super::{PromptStage, PromptTemplate};
use crate::invoke::{InvocationConfig, Invoker};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Serializable description of one prompt stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Stage name; also the key its output is stored under.
    pub name: String,
    /// The prompt template.
    pub template: PromptTemplate,
    /// Agent description / system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-text instructions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<String>,
    /// Model identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tool names made available to the agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Ask for markdown output.
    #[serde(default = "default_markdown")]
    pub markdown: bool,
    /// Per-reference budget override in characters; 0 disables truncation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_budget_chars: Option<usize>,
    /// Per-call timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    /// Whether the output is a generated artifact worth storing on its own.
    #[serde(default)]
    pub artifact: bool,
}

fn default_markdown() -> bool {
    true
}

impl StageDefinition {
    /// Creates a definition with a name and template.
    #[must_use]
    pub fn new(name: impl Into<String>, template: impl Into<PromptTemplate>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            description: None,
            instructions: Vec::new(),
            model: None,
            tools: Vec::new(),
            markdown: default_markdown(),
            reference_budget_chars: None,
            timeout_seconds: None,
            artifact: false,
        }
    }

    /// Sets the agent description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the instructions.
    #[must_use]
    pub fn with_instructions(mut self, instructions: &[&str]) -> Self {
        self.instructions = instructions.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Adds a tool name.
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.push(tool.into());
        self
    }

    /// Overrides the reference budget.
    #[must_use]
    pub fn with_reference_budget_chars(mut self, chars: usize) -> Self {
        self.reference_budget_chars = Some(chars);
        self
    }

    /// Marks the output as an artifact.
    #[must_use]
    pub fn as_artifact(mut self) -> Self {
        self.artifact = true;
        self
    }

    /// Returns the invocation config this definition describes.
    #[must_use]
    pub fn invocation_config(&self) -> InvocationConfig {
        InvocationConfig {
            stage_id: self.name.clone(),
            model: self.model.clone(),
            description: self.description.clone(),
            instructions: self.instructions.clone(),
            tools: self.tools.clone(),
            markdown: self.markdown,
            parameters: std::collections::HashMap::new(),
        }
    }

    /// Returns the per-stage timeout.
    ///
    /// Values that are not a positive, representable number of seconds
    /// yield `None`.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.and_then(timeout_from_secs)
    }

    /// Builds a [`PromptStage`].
    ///
    /// `default_budget` and `default_timeout` apply when the definition
    /// does not override them.
    #[must_use]
    pub fn build(
        &self,
        invoker: Arc<dyn Invoker>,
        default_budget: Option<usize>,
        default_timeout: Option<Duration>,
    ) -> PromptStage {
        let budget = match self.reference_budget_chars {
            Some(0) => None,
            Some(chars) => Some(chars),
            None => default_budget,
        };
        let timeout = self.timeout().or(default_timeout);

        let mut stage = PromptStage::new(&self.name, self.template.clone(), invoker)
            .with_config(self.invocation_config())
            .with_reference_budget(budget);
        if let Some(limit) = timeout {
            stage = stage.with_timeout(limit);
        }
        if self.artifact {
            stage = stage.producing_artifact();
        }
        stage
    }
}

/// Converts seconds to a timeout; `None` unless positive and representable.
pub(crate) fn timeout_from_secs(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}
