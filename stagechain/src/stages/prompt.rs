//! The LLM-backed stage: render a prompt, call the invoker.

use super::{PromptTemplate, Stage, StageResult};
use crate::context::StageContext;
use crate::errors::{MissingReferenceError, StageInvocationError, StagechainError};
use crate::invoke::{InvocationConfig, InvocationErrorKind, Invoker};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default per-reference truncation budget, in characters.
pub const DEFAULT_REFERENCE_BUDGET: usize = 4000;

/// A stage that renders a template and sends it to an [`Invoker`].
pub struct PromptStage {
    name: String,
    template: PromptTemplate,
    invoker: Arc<dyn Invoker>,
    config: InvocationConfig,
    reference_budget: Option<usize>,
    timeout: Option<Duration>,
    produces_artifact: bool,
}

impl PromptStage {
    /// Creates a prompt stage with the default reference budget and no timeout.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        template: impl Into<PromptTemplate>,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        let name = name.into();
        Self {
            config: InvocationConfig::new(&name),
            name,
            template: template.into(),
            invoker,
            reference_budget: Some(DEFAULT_REFERENCE_BUDGET),
            timeout: None,
            produces_artifact: false,
        }
    }

    /// Replaces the invocation config. The stage id is kept in sync with the name.
    #[must_use]
    pub fn with_config(mut self, config: InvocationConfig) -> Self {
        self.config = InvocationConfig {
            stage_id: self.name.clone(),
            ..config
        };
        self
    }

    /// Sets the per-reference budget; `None` disables truncation.
    #[must_use]
    pub fn with_reference_budget(mut self, budget: Option<usize>) -> Self {
        self.reference_budget = budget;
        self
    }

    /// Bounds how long a single invocation may take.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Marks the stage output as a standalone generated artifact.
    #[must_use]
    pub fn producing_artifact(mut self) -> Self {
        self.produces_artifact = true;
        self
    }

    /// Returns the template.
    #[must_use]
    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Returns the invocation config.
    #[must_use]
    pub fn config(&self) -> &InvocationConfig {
        &self.config
    }

    /// Returns the reference budget.
    #[must_use]
    pub fn reference_budget(&self) -> Option<usize> {
        self.reference_budget
    }

    /// Renders the prompt this stage would send.
    ///
    /// # Errors
    ///
    /// Returns `MissingReferenceError` if the template names an output
    /// that has not been produced.
    pub fn render(&self, ctx: &StageContext<'_>) -> Result<String, MissingReferenceError> {
        self.template.render(ctx, self.reference_budget)
    }
}

impl fmt::Debug for PromptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptStage")
            .field("name", &self.name)
            .field("template", &self.template.source())
            .field("reference_budget", &self.reference_budget)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for PromptStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<String> {
        self.template.references()
    }

    fn produces_artifact(&self) -> bool {
        self.produces_artifact
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageResult, StagechainError> {
        let prompt = self.render(ctx)?;
        debug!(
            stage = ctx.stage_name(),
            prompt_chars = prompt.chars().count(),
            "Invoking stage"
        );

        let call = self.invoker.invoke(&prompt, &self.config);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(StageInvocationError::new(
                        ctx.stage_name(),
                        InvocationErrorKind::Timeout,
                        format!("no response within {}ms", limit.as_millis()),
                    )
                    .into())
                }
            },
            None => call.await,
        };

        let text = outcome
            .map_err(|err| StageInvocationError::from_invocation(ctx.stage_name(), err))?;
        Ok(StageResult::new(text))
    }
}
