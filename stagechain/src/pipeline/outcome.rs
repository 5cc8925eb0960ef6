//! What a completed run hands back.

use crate::context::Context;
use crate::errors::{CheckpointWriteError, StagechainError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Ordered mapping of stage name to output text.
///
/// Serializes as a JSON object whose key order is execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultBundle {
    outputs: Context,
}

impl ResultBundle {
    /// Returns one stage's output.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<&str> {
        self.outputs.get(stage)
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.outputs.keys()
    }

    /// Returns the number of outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Returns true if there are no outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Returns the output of the last stage.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.outputs.latest().map(|(_, text)| text)
    }

    /// Iterates `(stage, text)` pairs in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outputs.iter()
    }

    /// Borrows the underlying context.
    #[must_use]
    pub fn as_context(&self) -> &Context {
        &self.outputs
    }

    /// Renders every output under a `##` heading named after its stage.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        for (stage, text) in self.outputs.iter() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("## ");
            out.push_str(&heading(stage));
            out.push_str("\n\n");
            out.push_str(text.trim_end());
            out.push('\n');
        }
        out
    }
}

impl From<Context> for ResultBundle {
    fn from(outputs: Context) -> Self {
        Self { outputs }
    }
}

impl From<ResultBundle> for Context {
    fn from(bundle: ResultBundle) -> Self {
        bundle.outputs
    }
}

/// `deep_dive` -> `Deep Dive`, `REFINE_2` -> `Refine 2`.
fn heading(key: &str) -> String {
    key.split(['_', '-'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// The run identifier.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// Stage outputs in execution order.
    pub results: ResultBundle,
    /// Wall time of the run.
    pub duration: Duration,
    /// Iteration numbers saved during the run, in order.
    pub iterations: Vec<u64>,
    /// Checkpoint writes that failed. The run itself still succeeded.
    pub checkpoint_errors: Vec<CheckpointWriteError>,
}

impl PipelineOutcome {
    /// Returns true if every checkpoint write succeeded.
    #[must_use]
    pub fn is_fully_checkpointed(&self) -> bool {
        self.checkpoint_errors.is_empty()
    }

    /// Returns the newest saved iteration number.
    #[must_use]
    pub fn last_iteration(&self) -> Option<u64> {
        self.iterations.last().copied()
    }

    /// Returns the results, or the first checkpoint write error.
    ///
    /// # Errors
    ///
    /// Returns `StagechainError::CheckpointWrite` if any write failed.
    pub fn into_result(self) -> Result<ResultBundle, StagechainError> {
        match self.checkpoint_errors.into_iter().next() {
            Some(err) => Err(err.into()),
            None => Ok(self.results),
        }
    }
}
