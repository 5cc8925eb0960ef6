//! Stage trait and implementations.
//!
//! Stages are the units of work in a pipeline. Each one reads the outputs
//! of the stages before it and produces one piece of text.

mod definition;
mod prompt;
mod result;
mod template;

pub use definition::StageDefinition;
pub(crate) use definition::timeout_from_secs;
pub use prompt::{PromptStage, DEFAULT_REFERENCE_BUDGET};
pub use result::StageResult;
pub use template::{truncate_chars, PromptTemplate};

use crate::context::StageContext;
use crate::errors::StagechainError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Returns the names of prior stages this stage reads.
    ///
    /// Used by the pipeline builder to reject forward references.
    fn references(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the output should also be stored as a standalone artifact
    /// when checkpointed.
    fn produces_artifact(&self) -> bool {
        false
    }

    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Read-only view of the run input and prior outputs
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageResult, StagechainError>;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageContext<'_>) -> Result<StageResult, StagechainError> + Send + Sync,
{
    name: String,
    references: Vec<String>,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext<'_>) -> Result<StageResult, StagechainError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            references: Vec::new(),
            func,
        }
    }

    /// Declares the prior stages the function reads.
    #[must_use]
    pub fn with_references(mut self, references: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.references = references.into_iter().map(Into::into).collect();
        self
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext<'_>) -> Result<StageResult, StagechainError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("references", &self.references)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext<'_>) -> Result<StageResult, StagechainError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<String> {
        self.references.clone()
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageResult, StagechainError> {
        (self.func)(ctx)
    }
}
