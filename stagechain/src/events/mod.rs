//! Lifecycle events emitted by pipelines and the refinement loop.
//!
//! Sinks are handed to a pipeline explicitly through its builder; there is
//! no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

/// Event names.
pub mod names {
    /// A run has started.
    pub const RUN_STARTED: &str = "run.started";
    /// A run finished with every stage completed.
    pub const RUN_COMPLETED: &str = "run.completed";
    /// A run stopped on an error or cancellation.
    pub const RUN_FAILED: &str = "run.failed";
    /// A stage is about to invoke.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage returned a result.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// An iteration record was persisted.
    pub const CHECKPOINT_SAVED: &str = "checkpoint.saved";
    /// An iteration record could not be persisted.
    pub const CHECKPOINT_FAILED: &str = "checkpoint.failed";
    /// A refinement loop resumed from a stored record.
    pub const REFINEMENT_RESUMED: &str = "refinement.resumed";
}
