//! Error types for the stagechain core.
//!
//! Every failure the pipeline can surface is a variant of [`StagechainError`].
//! Stage invocation failures abort a run; checkpoint write failures are
//! reported next to a successful result; checkpoint read failures are logged
//! and skipped while enumerating records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::invoke::{InvocationError, InvocationErrorKind};

/// The main error type for stagechain operations.
#[derive(Debug, Error)]
pub enum StagechainError {
    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A stage's external invocation failed.
    #[error("{0}")]
    StageInvocation(#[from] StageInvocationError),

    /// A key was written twice into a run context.
    #[error("{0}")]
    DataConflict(#[from] DataConflictError),

    /// A prompt template referenced an output that is not available.
    #[error("{0}")]
    MissingReference(#[from] MissingReferenceError),

    /// Persisting an iteration record failed.
    #[error("{0}")]
    CheckpointWrite(#[from] CheckpointWriteError),

    /// Reading an iteration record failed.
    #[error("{0}")]
    CheckpointRead(#[from] CheckpointReadError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The run was cancelled before completion.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),
}

impl StagechainError {
    /// Returns the name of the stage that failed, if the error is stage-scoped.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageInvocation(err) => Some(&err.stage),
            Self::MissingReference(err) => Some(&err.stage),
            _ => None,
        }
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-MISSING_REF").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline definition is rejected.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a stage's invocation capability fails.
///
/// The pipeline never retries: this error terminates the run.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' invocation failed ({kind}): {message}")]
pub struct StageInvocationError {
    /// The stage whose call failed.
    pub stage: String,
    /// The failure category reported by the invoker.
    pub kind: InvocationErrorKind,
    /// The underlying cause.
    pub message: String,
}

impl StageInvocationError {
    /// Creates a new stage invocation error.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        kind: InvocationErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
        }
    }

    /// Wraps an invoker error with the stage that produced it.
    #[must_use]
    pub fn from_invocation(stage: impl Into<String>, err: InvocationError) -> Self {
        Self {
            stage: stage.into(),
            kind: err.kind,
            message: err.message,
        }
    }

    /// Converts to an event payload.
    #[must_use]
    pub fn to_event_data(&self) -> serde_json::Value {
        serde_json::json!({
            "stage": self.stage,
            "kind": self.kind.to_string(),
            "error": self.message,
        })
    }
}

/// Error raised when writing to an existing key in a run context.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Data conflict: key '{key}' already exists")]
pub struct DataConflictError {
    /// The conflicting key.
    pub key: String,
}

impl DataConflictError {
    /// Creates a new data conflict error.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Error raised when a template names an output the context does not hold.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Stage '{stage}' references '{reference}' which has not been produced")]
pub struct MissingReferenceError {
    /// The stage rendering the template.
    pub stage: String,
    /// The placeholder that could not be resolved.
    pub reference: String,
}

impl MissingReferenceError {
    /// Creates a new missing reference error.
    #[must_use]
    pub fn new(stage: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            reference: reference.into(),
        }
    }
}

/// Errors raised while persisting an iteration record.
#[derive(Debug, Clone, Error)]
pub enum CheckpointWriteError {
    /// The iteration number is already present in the store.
    #[error("Iteration {iteration} already exists in the checkpoint store")]
    IterationTaken {
        /// The conflicting iteration number.
        iteration: u64,
    },

    /// The record or its artifact could not be written.
    #[error("Failed to write iteration {iteration} to {}: {reason}", path.display())]
    Io {
        /// The iteration being saved.
        iteration: u64,
        /// The file that could not be written.
        path: PathBuf,
        /// The underlying cause.
        reason: String,
    },

    /// No iteration number could be allocated.
    #[error("Failed to allocate an iteration number in {}: {reason}", path.display())]
    Allocation {
        /// The store location that could not be scanned.
        path: PathBuf,
        /// The underlying cause.
        reason: String,
    },

    /// The record could not be serialized.
    #[error("Failed to serialize iteration {iteration}: {reason}")]
    Serialization {
        /// The iteration being saved.
        iteration: u64,
        /// The underlying cause.
        reason: String,
    },
}

impl CheckpointWriteError {
    /// Returns the iteration number that failed to persist, if one was
    /// allocated.
    #[must_use]
    pub fn iteration(&self) -> Option<u64> {
        match self {
            Self::IterationTaken { iteration }
            | Self::Io { iteration, .. }
            | Self::Serialization { iteration, .. } => Some(*iteration),
            Self::Allocation { .. } => None,
        }
    }
}

/// Error raised when a single iteration record cannot be read.
#[derive(Debug, Clone, Error)]
#[error("Failed to read checkpoint {}: {reason}", path.display())]
pub struct CheckpointReadError {
    /// The record location.
    pub path: PathBuf,
    /// The underlying cause.
    pub reason: String,
}

impl CheckpointReadError {
    /// Creates a new checkpoint read error.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {}: {reason}", path.display())]
    Io {
        /// The config path.
        path: PathBuf,
        /// The underlying cause.
        reason: String,
    },

    /// The configuration document is not valid TOML for the schema.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value is syntactically valid but unusable.
    #[error("Invalid config value for '{field}': {reason}")]
    Invalid {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "my_stage");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"my_stage".to_string()));
    }

    #[test]
    fn test_validation_error_code() {
        let err = PipelineValidationError::new("empty")
            .with_error_info(ContractErrorInfo::new("CONTRACT-004-EMPTY", "empty"));
        assert_eq!(err.code(), Some("CONTRACT-004-EMPTY"));
        assert_eq!(PipelineValidationError::new("plain").code(), None);
    }

    #[test]
    fn test_stage_invocation_error_message() {
        let err = StageInvocationError::from_invocation(
            "analysis",
            InvocationError::timeout("deadline exceeded"),
        );

        assert_eq!(err.stage, "analysis");
        assert_eq!(err.kind, InvocationErrorKind::Timeout);
        assert!(err.to_string().contains("analysis"));
        assert!(err.to_string().contains("deadline exceeded"));
        assert_eq!(err.to_event_data()["kind"], "timeout");
    }

    #[test]
    fn test_stage_accessor() {
        let err: StagechainError =
            StageInvocationError::new("b", InvocationErrorKind::Transport, "reset").into();
        assert_eq!(err.stage(), Some("b"));

        let err: StagechainError = MissingReferenceError::new("c", "a").into();
        assert_eq!(err.stage(), Some("c"));

        let err = StagechainError::Cancelled("stop".into());
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn test_checkpoint_write_error_iteration() {
        let err = CheckpointWriteError::Io {
            iteration: 7,
            path: PathBuf::from("/tmp/x"),
            reason: "denied".into(),
        };
        assert_eq!(err.iteration(), Some(7));
        assert!(err.to_string().contains("/tmp/x"));
        assert_eq!(CheckpointWriteError::IterationTaken { iteration: 3 }.iteration(), Some(3));

        let err = CheckpointWriteError::Allocation {
            path: PathBuf::from("/tmp/x"),
            reason: "denied".into(),
        };
        assert_eq!(err.iteration(), None);
    }
}
