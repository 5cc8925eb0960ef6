//! Pipeline construction and execution.
//!
//! A pipeline runs its stages strictly one after another. Each stage sees
//! the outputs of every stage before it; its own output is appended under
//! its name. Every external call waits for the shared
//! [`RateLimiter`](crate::ratelimit::RateLimiter) first. With a checkpoint
//! store attached, one iteration record is saved after each stage.

mod builder;
mod outcome;
mod runner;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use outcome::{PipelineOutcome, ResultBundle};
pub use runner::Pipeline;

pub(crate) use builder::validate_stages;
pub(crate) use runner::{checkpoint, execute_stage};
