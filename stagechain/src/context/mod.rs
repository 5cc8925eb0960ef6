//! Context management for pipeline execution.
//!
//! This module provides:
//! - The ordered, append-only [`Context`] of stage outputs
//! - The run input and depth hint
//! - Run identity and the per-stage read-only view

mod execution;
mod identity;
mod input;
mod outputs;

pub use execution::StageContext;
pub use identity::RunIdentity;
pub use input::{Depth, PipelineInput};
pub use outputs::Context;

/// Placeholder and key reserved for the run input.
pub const INPUT_KEY: &str = "input";

/// Placeholder reserved for the depth hint.
pub const DEPTH_KEY: &str = "depth";

/// Placeholder reserved for the most recent output.
pub const LATEST_KEY: &str = "latest";

/// Names no stage may use.
pub const RESERVED_KEYS: [&str; 3] = [INPUT_KEY, DEPTH_KEY, LATEST_KEY];
