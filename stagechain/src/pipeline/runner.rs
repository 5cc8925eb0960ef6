//! Sequential pipeline driver.

use super::{PipelineOutcome, ResultBundle};
use crate::cancellation::CancellationToken;
use crate::checkpoint::{save_next, CheckpointStore, IterationRecord};
use crate::context::{Context, PipelineInput, RunIdentity, StageContext};
use crate::errors::{CheckpointWriteError, StagechainError};
use crate::events::{names, EventSink};
use crate::observability::SpanTimer;
use crate::ratelimit::RateLimiter;
use crate::stages::{Stage, StageResult};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// An ordered chain of stages. Build one with
/// [`PipelineBuilder`](super::PipelineBuilder).
///
/// A pipeline holds no per-run state, so one instance may serve concurrent
/// runs; they share its rate limiter and checkpoint store.
pub struct Pipeline {
    pub(super) name: String,
    pub(super) stages: Vec<Arc<dyn Stage>>,
    pub(super) limiter: Arc<RateLimiter>,
    pub(super) store: Option<Arc<dyn CheckpointStore>>,
    pub(super) sink: Arc<dyn EventSink>,
    pub(super) cancellation: Option<Arc<CancellationToken>>,
}

impl Pipeline {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Runs every stage in order.
    ///
    /// # Errors
    ///
    /// The first failing stage aborts the run and its error is returned;
    /// no partial results are returned. Checkpoint write failures do not
    /// abort; they are reported in [`PipelineOutcome::checkpoint_errors`].
    pub async fn run(&self, input: impl Into<PipelineInput>) -> Result<PipelineOutcome, StagechainError> {
        let run = RunIdentity::new(&self.name);
        self.drive(run, input.into(), Context::new()).await
    }

    /// Runs the pipeline once per input, concurrently.
    ///
    /// Every run gets its own run id and context. The runs share this
    /// pipeline's rate limiter, so their external calls are still paced as
    /// one stream. Results come back in input order.
    pub async fn run_all<I>(&self, inputs: I) -> Vec<Result<PipelineOutcome, StagechainError>>
    where
        I: IntoIterator,
        I::Item: Into<PipelineInput>,
    {
        join_all(inputs.into_iter().map(|input| self.run(input))).await
    }

    /// Continues from a checkpointed snapshot.
    ///
    /// The snapshot seeds the context; stages whose output it already holds
    /// are skipped. Entries for stages this pipeline does not declare are
    /// dropped, so the bundle holds exactly the declared stages. The
    /// record's run id is kept when present.
    ///
    /// # Errors
    ///
    /// Same as [`Pipeline::run`].
    pub async fn resume_from(
        &self,
        record: &IterationRecord,
        input: impl Into<PipelineInput>,
    ) -> Result<PipelineOutcome, StagechainError> {
        let run = match record.run_id {
            Some(run_id) => RunIdentity::with_run_id(&self.name, run_id),
            None => RunIdentity::new(&self.name),
        };
        info!(
            pipeline = %self.name,
            iteration = record.iteration_number,
            completed = record.results.len(),
            "Resuming pipeline from checkpoint"
        );
        let mut seed = Context::new();
        for stage in &self.stages {
            if let Some(text) = record.results.get(stage.name()) {
                seed.insert(stage.name(), text)?;
            }
        }
        if seed.len() < record.results.len() {
            let dropped: Vec<&str> = record
                .results
                .keys()
                .into_iter()
                .filter(|key| !seed.contains(key))
                .collect();
            warn!(?dropped, "Ignoring checkpoint entries for undeclared stages");
        }
        self.drive(run, input.into(), seed).await
    }

    async fn drive(
        &self,
        run: RunIdentity,
        input: PipelineInput,
        seed: Context,
    ) -> Result<PipelineOutcome, StagechainError> {
        let span = info_span!("pipeline.run", pipeline = %self.name, run_id = %run.run_id);
        async move {
            let timer = SpanTimer::start(format!("pipeline.{}", self.name));
            self.sink.try_emit(names::RUN_STARTED, Some(run.to_event_data()));

            let mut outputs = seed;
            let mut iterations = Vec::new();
            let mut checkpoint_errors = Vec::new();

            for stage in &self.stages {
                if outputs.contains(stage.name()) {
                    debug!(stage = stage.name(), "Stage output already present, skipping");
                    continue;
                }

                let step = async {
                    if let Some(token) = &self.cancellation {
                        token.check()?;
                    }
                    let ctx = StageContext::new(&run, stage.name(), &input, &outputs);
                    execute_stage(stage.as_ref(), &self.limiter, self.sink.as_ref(), &ctx).await
                };
                let result = match step.await {
                    Ok(result) => result,
                    Err(err) => {
                        self.emit_failure(&run, &err);
                        return Err(err);
                    }
                };
                outputs.insert(stage.name(), result.into_text())?;

                if let Some(store) = &self.store {
                    let mut record = IterationRecord::new(outputs.clone())
                        .with_run_id(run.run_id)
                        .with_stage(stage.name())
                        .with_input(input.clone());
                    if stage.produces_artifact() {
                        if let Some(text) = outputs.get(stage.name()) {
                            record = record.with_artifact(text);
                        }
                    }
                    match checkpoint(store.as_ref(), self.sink.as_ref(), record).await {
                        Ok(iteration) => iterations.push(iteration),
                        Err(err) => checkpoint_errors.push(err),
                    }
                }
            }

            let duration = timer.finish();
            info!(
                stages = outputs.len(),
                duration_ms = duration.as_millis() as u64,
                "Pipeline completed"
            );
            self.sink.try_emit(
                names::RUN_COMPLETED,
                Some(json!({
                    "pipeline": self.name,
                    "run_id": run.run_id.to_string(),
                    "stages": outputs.len(),
                    "checkpoint_errors": checkpoint_errors.len(),
                })),
            );

            Ok(PipelineOutcome {
                run_id: run.run_id,
                pipeline: self.name.clone(),
                results: ResultBundle::from(outputs),
                duration,
                iterations,
                checkpoint_errors,
            })
        }
        .instrument(span)
        .await
    }

    fn emit_failure(&self, run: &RunIdentity, err: &StagechainError) {
        warn!(error = %err, stage = ?err.stage(), "Pipeline run failed");
        self.sink.try_emit(
            names::RUN_FAILED,
            Some(json!({
                "pipeline": self.name,
                "run_id": run.run_id.to_string(),
                "stage": err.stage(),
                "error": err.to_string(),
            })),
        );
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("min_interval", &self.limiter.min_interval())
            .field("checkpointing", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

/// Waits for the limiter, then executes one stage with events and timing.
pub(crate) async fn execute_stage(
    stage: &dyn Stage,
    limiter: &RateLimiter,
    sink: &dyn EventSink,
    ctx: &StageContext<'_>,
) -> Result<StageResult, StagechainError> {
    limiter.await_turn().await;

    let name = stage.name();
    let timer = SpanTimer::start(format!("stage.{name}"));
    sink.try_emit(
        names::STAGE_STARTED,
        Some(json!({"stage": name, "run_id": ctx.run().run_id.to_string()})),
    );
    debug!(stage = name, prior_outputs = ctx.outputs().len(), "Executing stage");

    match stage.execute(ctx).await {
        Ok(result) => {
            let duration_ms = timer.elapsed_ms();
            debug!(stage = name, duration_ms, chars = result.text.chars().count(), "Stage completed");
            sink.try_emit(
                names::STAGE_COMPLETED,
                Some(json!({
                    "stage": name,
                    "run_id": ctx.run().run_id.to_string(),
                    "duration_ms": duration_ms,
                })),
            );
            Ok(result)
        }
        Err(err) => {
            let data = match &err {
                StagechainError::StageInvocation(e) => e.to_event_data(),
                other => json!({"stage": name, "error": other.to_string()}),
            };
            sink.try_emit(names::STAGE_FAILED, Some(data));
            Err(err)
        }
    }
}

/// Reserves a number and saves `record`, reporting the outcome as events.
pub(crate) async fn checkpoint(
    store: &dyn CheckpointStore,
    sink: &dyn EventSink,
    record: IterationRecord,
) -> Result<u64, CheckpointWriteError> {
    let stage = record.stage.clone();
    match save_next(store, record).await {
        Ok(saved) => {
            debug!(iteration = saved.iteration_number, stage = ?stage, "Checkpoint saved");
            sink.try_emit(
                names::CHECKPOINT_SAVED,
                Some(json!({"iteration": saved.iteration_number, "stage": stage})),
            );
            Ok(saved.iteration_number)
        }
        Err(err) => {
            warn!(error = %err, stage = ?stage, "Checkpoint write failed");
            sink.try_emit(
                names::CHECKPOINT_FAILED,
                Some(json!({"iteration": err.iteration(), "stage": stage, "error": err.to_string()})),
            );
            Err(err)
        }
    }
}
