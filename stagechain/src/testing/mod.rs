//! Testing utilities for stagechain pipelines.
//!
//! Provides a scripted [`Invoker`](crate::invoke::Invoker) that records
//! prompts and call timings so tests can assert on ordering, pacing and
//! prompt content without a model.

mod mocks;

pub use mocks::{RecordedCall, ScriptedInvoker};
