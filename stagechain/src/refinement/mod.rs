//! Multi-round refinement with resumable checkpoints.
//!
//! The loop walks `ANALYZE -> GENERATE -> REFINE_1 -> ... -> REFINE_n`.
//! Each phase's output is stored under its key and checkpointed before the
//! next phase starts. A failed checkpoint write aborts the loop, since a
//! later resume depends on it.
//!
//! Resuming loads the newest readable record, seeds the context with its
//! results and continues at the first phase the record does not hold.

mod phase;

pub use phase::{Phase, ANALYZE_KEY, GENERATE_KEY, REFINE_PREFIX};

use crate::cancellation::CancellationToken;
use crate::checkpoint::{CheckpointStore, IterationRecord};
use crate::context::{Context, PipelineInput, RunIdentity, StageContext};
use crate::errors::StagechainError;
use crate::events::{names, EventSink, NoOpEventSink};
use crate::invoke::Invoker;
use crate::pipeline::{checkpoint, execute_stage, ResultBundle};
use crate::ratelimit::RateLimiter;
use crate::stages::{Stage, StageDefinition};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Stage definitions for the three refinement roles.
///
/// The generate template usually reads `{ANALYZE}`; the refine template
/// reads `{latest}`, the previous round's artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementDefinitions {
    /// Analysis stage.
    pub analyze: StageDefinition,
    /// Initial generation stage.
    pub generate: StageDefinition,
    /// Refinement stage, reused every round.
    pub refine: StageDefinition,
}

/// Result of a refinement loop.
#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    /// The run identifier.
    pub run_id: Uuid,
    /// Every phase output, in order.
    pub results: ResultBundle,
    /// Iteration numbers saved by this invocation.
    pub iterations: Vec<u64>,
    /// The record the loop resumed from, if any.
    pub resumed_from: Option<u64>,
}

impl RefinementOutcome {
    /// Returns the newest artifact: the last refinement, else the generation.
    #[must_use]
    pub fn final_artifact(&self) -> Option<&str> {
        self.results
            .iter()
            .filter(|(key, _)| Phase::from_key(key).is_some_and(Phase::produces_artifact))
            .last()
            .map(|(_, text)| text)
    }
}

/// Drives the analyze/generate/refine state machine.
pub struct RefinementLoop {
    name: String,
    analyze: Arc<dyn Stage>,
    generate: Arc<dyn Stage>,
    refine: Arc<dyn Stage>,
    store: Arc<dyn CheckpointStore>,
    limiter: Arc<RateLimiter>,
    sink: Arc<dyn EventSink>,
    cancellation: Option<Arc<CancellationToken>>,
}

impl RefinementLoop {
    /// Creates a loop checkpointing into `store`.
    #[must_use]
    pub fn new(
        analyze: Arc<dyn Stage>,
        generate: Arc<dyn Stage>,
        refine: Arc<dyn Stage>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            name: "refinement".to_string(),
            analyze,
            generate,
            refine,
            store,
            limiter: Arc::new(RateLimiter::default()),
            sink: Arc::new(NoOpEventSink),
            cancellation: None,
        }
    }

    /// Builds the three prompt stages from definitions.
    #[must_use]
    pub fn from_definitions(
        definitions: &RefinementDefinitions,
        invoker: &Arc<dyn Invoker>,
        store: Arc<dyn CheckpointStore>,
        reference_budget: Option<usize>,
        timeout: Option<Duration>,
    ) -> Self {
        let build = |def: &StageDefinition| -> Arc<dyn Stage> {
            Arc::new(def.build(invoker.clone(), reference_budget, timeout))
        };
        Self::new(
            build(&definitions.analyze),
            build(&definitions.generate),
            build(&definitions.refine),
            store,
        )
    }

    /// Sets the name used for run identities and spans.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Shares a rate limiter.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Sends lifecycle events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Stops before the next phase once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Runs every phase from `ANALYZE`, with `rounds` refinements.
    ///
    /// # Errors
    ///
    /// Returns the first stage error or checkpoint write error.
    pub async fn run(
        &self,
        input: impl Into<PipelineInput>,
        rounds: u32,
    ) -> Result<RefinementOutcome, StagechainError> {
        let run = RunIdentity::new(&self.name);
        self.drive(run, input.into(), Context::new(), rounds, None).await
    }

    /// Continues from the newest readable record, or starts fresh if the
    /// store holds none.
    ///
    /// The input saved with the record takes precedence over `input`, so a
    /// resumed loop keeps working on the goal it started with. `input` is
    /// used when there is no record or the record carries no input.
    ///
    /// # Errors
    ///
    /// Returns a `CheckpointRead` error if the store cannot be listed, else
    /// the same errors as [`RefinementLoop::run`].
    pub async fn resume(
        &self,
        input: impl Into<PipelineInput>,
        rounds: u32,
    ) -> Result<RefinementOutcome, StagechainError> {
        let input = input.into();
        let Some(record) = self.store.load_latest().await? else {
            info!(loop_name = %self.name, "No checkpoint found, starting from ANALYZE");
            return self.run(input, rounds).await;
        };

        let next = Phase::resume_point(&record.results);
        info!(
            loop_name = %self.name,
            iteration = record.iteration_number,
            next_phase = %next,
            "Resuming refinement"
        );
        self.sink.try_emit(
            names::REFINEMENT_RESUMED,
            Some(json!({"iteration": record.iteration_number, "next_phase": next.key()})),
        );

        let input = match record.input {
            Some(saved) => {
                if saved != input {
                    warn!(
                        saved = %saved.goal,
                        given = %input.goal,
                        "Resuming with the input saved in the checkpoint"
                    );
                }
                saved
            }
            None => input,
        };
        let run = match record.run_id {
            Some(run_id) => RunIdentity::with_run_id(&self.name, run_id),
            None => RunIdentity::new(&self.name),
        };
        self.drive(run, input, record.results, rounds, Some(record.iteration_number))
            .await
    }

    fn stage_for(&self, phase: Phase) -> &dyn Stage {
        match phase {
            Phase::Analyze => self.analyze.as_ref(),
            Phase::Generate => self.generate.as_ref(),
            Phase::Refine(_) => self.refine.as_ref(),
        }
    }

    async fn drive(
        &self,
        run: RunIdentity,
        input: PipelineInput,
        seed: Context,
        rounds: u32,
        resumed_from: Option<u64>,
    ) -> Result<RefinementOutcome, StagechainError> {
        let span = info_span!("refinement.run", loop_name = %self.name, run_id = %run.run_id, rounds);
        async move {
            let mut outputs = seed;
            let mut iterations = Vec::new();
            let mut phase = Phase::resume_point(&outputs);

            while phase.within(rounds) {
                if let Some(token) = &self.cancellation {
                    token.check()?;
                }

                let key = phase.key();
                let ctx = StageContext::new(&run, &key, &input, &outputs);
                let result = execute_stage(self.stage_for(phase), &self.limiter, self.sink.as_ref(), &ctx).await?;
                let text = result.into_text();

                let mut record = IterationRecord::new(Context::new())
                    .with_run_id(run.run_id)
                    .with_stage(key.as_str())
                    .with_input(input.clone());
                if phase.produces_artifact() {
                    record = record.with_artifact(text.as_str());
                }
                outputs.insert(key, text)?;
                record.results = outputs.clone();

                iterations.push(checkpoint(self.store.as_ref(), self.sink.as_ref(), record).await?);
                phase = phase.next();
            }

            info!(phases = outputs.len(), saved = iterations.len(), "Refinement finished");
            Ok(RefinementOutcome {
                run_id: run.run_id,
                results: ResultBundle::from(outputs),
                iterations,
                resumed_from,
            })
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for RefinementLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementLoop")
            .field("name", &self.name)
            .field("analyze", &self.analyze.name())
            .field("generate", &self.generate.name())
            .field("refine", &self.refine.name())
            .finish_non_exhaustive()
    }
}
