//! Pipeline builder with validation.

use super::Pipeline;
use crate::cancellation::CancellationToken;
use crate::checkpoint::CheckpointStore;
use crate::context::RESERVED_KEYS;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::events::{EventSink, NoOpEventSink};
use crate::invoke::Invoker;
use crate::ratelimit::RateLimiter;
use crate::stages::{Stage, StageDefinition, DEFAULT_REFERENCE_BUDGET};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating validated pipelines.
///
/// Stages run in the order they are added. Validation happens in
/// [`PipelineBuilder::build`].
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
    limiter: Option<Arc<RateLimiter>>,
    store: Option<Arc<dyn CheckpointStore>>,
    sink: Option<Arc<dyn EventSink>>,
    cancellation: Option<Arc<CancellationToken>>,
    reference_budget: Option<usize>,
    timeout: Option<Duration>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            limiter: None,
            store: None,
            sink: None,
            cancellation: None,
            reference_budget: Some(DEFAULT_REFERENCE_BUDGET),
            timeout: None,
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends a prompt stage built from a definition.
    ///
    /// The builder's default budget and timeout apply unless the definition
    /// overrides them, so set those first.
    #[must_use]
    pub fn add_definition(self, definition: &StageDefinition, invoker: Arc<dyn Invoker>) -> Self {
        let stage = definition.build(invoker, self.reference_budget, self.timeout);
        self.stage(Arc::new(stage))
    }

    /// Appends prompt stages for every definition, in order.
    #[must_use]
    pub fn add_definitions(mut self, definitions: &[StageDefinition], invoker: &Arc<dyn Invoker>) -> Self {
        for definition in definitions {
            self = self.add_definition(definition, invoker.clone());
        }
        self
    }

    /// Sets the default per-reference budget for definitions added later.
    #[must_use]
    pub fn with_reference_budget(mut self, budget: Option<usize>) -> Self {
        self.reference_budget = budget;
        self
    }

    /// Sets the default per-call timeout for definitions added later.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shares a rate limiter. Defaults to a private 250 ms limiter.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Checkpoints every completed stage into `store`.
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sends lifecycle events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Stops runs before the next stage once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages added.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a `PipelineValidationError` when the pipeline is empty, a
    /// stage name is blank, reserved or repeated, or a stage references an
    /// output that no earlier stage produces.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        validate_stages(&self.stages)?;

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
            limiter: self.limiter.unwrap_or_default(),
            store: self.store,
            sink: self.sink.unwrap_or_else(|| Arc::new(NoOpEventSink)),
            cancellation: self.cancellation,
        })
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("stages", &self.stages)
            .field("checkpointing", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) fn validate_stages(stages: &[Arc<dyn Stage>]) -> Result<(), PipelineValidationError> {
    if stages.is_empty() {
        return Err(PipelineValidationError::new("Pipeline has no stages").with_error_info(
            ContractErrorInfo::new("CONTRACT-004-EMPTY", "Cannot build an empty pipeline")
                .with_fix_hint("Add at least one stage to the pipeline before building."),
        ));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for stage in stages {
        let name = stage.name();

        if name.trim().is_empty() || name.contains(['{', '}']) {
            return Err(PipelineValidationError::new(format!("Invalid stage name '{name}'"))
                .with_stages(vec![name.to_string()])
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-NAME", "Stage names must be non-blank and brace-free")
                        .with_fix_hint("Use a short identifier such as 'analysis'."),
                ));
        }

        if RESERVED_KEYS.contains(&name) {
            return Err(PipelineValidationError::new(format!("Stage name '{name}' is reserved"))
                .with_stages(vec![name.to_string()])
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-RESERVED", format!("'{name}' is a reserved placeholder"))
                        .with_fix_hint(format!("Rename the stage; {} are reserved.", RESERVED_KEYS.join(", ")))
                        .with_context_entry("stage", name),
                ));
        }

        for reference in stage.references() {
            if seen.contains(reference.as_str()) {
                continue;
            }
            let later = stages.iter().any(|s| s.name() == reference);
            let summary = if later {
                format!("'{reference}' runs after '{name}'")
            } else {
                format!("No stage named '{reference}'")
            };
            return Err(PipelineValidationError::new(format!(
                "Stage '{name}' references '{reference}' which is not produced by an earlier stage"
            ))
            .with_stages(vec![name.to_string(), reference.clone()])
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-MISSING_REF", summary)
                    .with_fix_hint("Reference only stages added before this one.")
                    .with_context_entry("reference", reference.as_str()),
            ));
        }

        if !seen.insert(name) {
            return Err(PipelineValidationError::new(format!("Duplicate stage name '{name}'"))
                .with_stages(vec![name.to_string()])
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-DUPLICATE", format!("Stage '{name}' is defined twice"))
                        .with_fix_hint("Each stage name becomes an output key and must be unique."),
                ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{FnStage, StageResult};
    use crate::testing::ScriptedInvoker;

    fn fn_stage(name: &str) -> Arc<dyn Stage> {
        Arc::new(FnStage::new(name, |_| Ok(StageResult::new("x"))))
    }

    fn code_of(builder: PipelineBuilder) -> String {
        builder.build().unwrap_err().code().unwrap_or_default().to_string()
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        assert_eq!(code_of(PipelineBuilder::new("p")), "CONTRACT-004-EMPTY");
    }

    #[test]
    fn test_duplicate_rejected() {
        let builder = PipelineBuilder::new("p").stage(fn_stage("a")).stage(fn_stage("a"));
        assert_eq!(code_of(builder), "CONTRACT-004-DUPLICATE");
    }

    #[test]
    fn test_reserved_and_blank_names_rejected() {
        assert_eq!(code_of(PipelineBuilder::new("p").stage(fn_stage("input"))), "CONTRACT-004-RESERVED");
        assert_eq!(code_of(PipelineBuilder::new("p").stage(fn_stage("latest"))), "CONTRACT-004-RESERVED");
        assert_eq!(code_of(PipelineBuilder::new("p").stage(fn_stage("  "))), "CONTRACT-004-NAME");
        assert_eq!(code_of(PipelineBuilder::new("p").stage(fn_stage("{a}"))), "CONTRACT-004-NAME");
    }

    #[test]
    fn test_forward_reference_rejected() {
        let invoker: Arc<dyn Invoker> = Arc::new(ScriptedInvoker::new());
        let builder = PipelineBuilder::new("p")
            .add_definition(&StageDefinition::new("a", "{input} {b}"), invoker.clone())
            .add_definition(&StageDefinition::new("b", "{input}"), invoker);

        let err = builder.build().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-MISSING_REF"));
        assert_eq!(err.stages, vec!["a".to_string(), "b".to_string()]);
        assert!(err.error_info.unwrap().summary.contains("runs after"));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let stage = FnStage::new("a", |_| Ok(StageResult::new("x"))).with_references(["ghost"]);
        let err = PipelineBuilder::new("p").stage(Arc::new(stage)).build().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-MISSING_REF"));
        assert!(err.error_info.unwrap().summary.contains("No stage named"));
    }

    #[test]
    fn test_backward_references_accepted() {
        let invoker: Arc<dyn Invoker> = Arc::new(ScriptedInvoker::new());
        let definitions = vec![
            StageDefinition::new("a", "Topic: {input}"),
            StageDefinition::new("b", "Build on {a}"),
            StageDefinition::new("c", "Combine {a} and {b} at {depth} depth"),
        ];
        let pipeline = PipelineBuilder::new("p")
            .add_definitions(&definitions, &invoker)
            .build()
            .unwrap();
        assert_eq!(pipeline.stage_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_builder_defaults_flow_into_definitions() {
        let invoker: Arc<dyn Invoker> = Arc::new(ScriptedInvoker::new());
        let builder = PipelineBuilder::new("p")
            .with_reference_budget(Some(1000))
            .add_definition(&StageDefinition::new("a", "{input}"), invoker);
        assert_eq!(builder.stage_count(), 1);
        assert_eq!(builder.name(), "p");
        assert!(builder.build().is_ok());
    }
}
