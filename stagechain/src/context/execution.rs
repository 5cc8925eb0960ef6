//! The read-only view a stage gets while executing.

use super::{Context, PipelineInput, RunIdentity};

/// Everything a stage may look at while it runs.
///
/// Holds borrows only: the run owns the context, the stage reads it.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    run: &'a RunIdentity,
    stage_name: &'a str,
    input: &'a PipelineInput,
    outputs: &'a Context,
}

impl<'a> StageContext<'a> {
    /// Creates a new stage context.
    #[must_use]
    pub fn new(
        run: &'a RunIdentity,
        stage_name: &'a str,
        input: &'a PipelineInput,
        outputs: &'a Context,
    ) -> Self {
        Self {
            run,
            stage_name,
            input,
            outputs,
        }
    }

    /// Returns the run identity.
    #[must_use]
    pub fn run(&self) -> &'a RunIdentity {
        self.run
    }

    /// Returns the key the stage's output will be stored under.
    #[must_use]
    pub fn stage_name(&self) -> &'a str {
        self.stage_name
    }

    /// Returns the run input.
    #[must_use]
    pub fn input(&self) -> &'a PipelineInput {
        self.input
    }

    /// Returns the outputs of every stage that ran before this one.
    #[must_use]
    pub fn outputs(&self) -> &'a Context {
        self.outputs
    }
}
