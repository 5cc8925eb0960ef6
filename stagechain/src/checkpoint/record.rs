//! The persisted snapshot of one iteration.

use crate::context::{Context, PipelineInput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One checkpointed snapshot of a run's results.
///
/// `iteration_number` is stamped by the store on save; records built with
/// [`IterationRecord::new`] carry 0 until then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// The iteration number, unique within a store.
    pub iteration_number: u64,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// The run that produced the snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// The stage or phase whose completion triggered the snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// The run input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<PipelineInput>,
    /// Every output produced so far, in execution order.
    pub results: Context,
    /// Generated artifact, also stored as a standalone file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

impl IterationRecord {
    /// Creates an unnumbered record holding `results`.
    #[must_use]
    pub fn new(results: Context) -> Self {
        Self {
            iteration_number: 0,
            timestamp: Utc::now(),
            run_id: None,
            stage: None,
            input: None,
            results,
            artifact: None,
        }
    }

    /// Sets the producing run.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Sets the stage that completed.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Sets the run input.
    #[must_use]
    pub fn with_input(mut self, input: PipelineInput) -> Self {
        self.input = Some(input);
        self
    }

    /// Attaches a generated artifact.
    #[must_use]
    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    pub(crate) fn numbered(mut self, iteration: u64) -> Self {
        self.iteration_number = iteration;
        self
    }
}
