//! # Stagechain
//!
//! Sequential, rate-paced pipelines of text-generating stages.
//!
//! Each stage builds a prompt from the run input and the outputs of the
//! stages before it, sends the prompt to an external [`Invoker`](invoke::Invoker), and
//! stores the reply under its own name. Stagechain provides:
//!
//! - **Ordered execution**: stages run strictly one after another
//! - **Call pacing**: a shared [`RateLimiter`](ratelimit::RateLimiter) spaces every external call
//! - **Iteration checkpoints**: numbered snapshots after each stage
//! - **Resumable refinement**: an analyze, generate and refine loop that
//!   picks up from its latest checkpoint
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagechain::prelude::*;
//!
//! let invoker: Arc<dyn Invoker> = Arc::new(MyModelClient::new());
//! let pipeline = Preset::DeepResearch
//!     .builder(&invoker)
//!     .with_checkpoint_store(Arc::new(DirCheckpointStore::new("research_output")))
//!     .build()?;
//!
//! let outcome = pipeline
//!     .run(PipelineInput::new("quantum error correction").with_depth(Depth::Comprehensive))
//!     .await?;
//! println!("{}", outcome.results.to_markdown());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod invoke;
pub mod observability;
pub mod pipeline;
pub mod presets;
pub mod ratelimit;
pub mod refinement;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::checkpoint::{
        CheckpointStore, DirCheckpointStore, InMemoryCheckpointStore, IterationRecord,
    };
    pub use crate::config::StagechainConfig;
    pub use crate::context::{Context, Depth, PipelineInput, RunIdentity, StageContext};
    pub use crate::errors::{
        CheckpointReadError, CheckpointWriteError, ConfigError, ContractErrorInfo,
        PipelineValidationError, StageInvocationError, StagechainError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::invoke::{InvocationConfig, InvocationError, Invoker};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{Pipeline, PipelineBuilder, PipelineOutcome, ResultBundle};
    pub use crate::presets::Preset;
    pub use crate::ratelimit::RateLimiter;
    pub use crate::refinement::{RefinementLoop, RefinementOutcome};
    pub use crate::stages::{FnStage, PromptStage, Stage, StageDefinition, StageResult};
    pub use std::sync::Arc;
}
