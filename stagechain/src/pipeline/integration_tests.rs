//! End-to-end tests for pipeline execution.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore, IterationRecord, MockCheckpointStore};
    use crate::context::{Context, Depth, PipelineInput};
    use crate::errors::{CheckpointWriteError, StagechainError};
    use crate::events::{names, CollectingEventSink};
    use crate::invoke::{InvocationError, Invoker};
    use crate::pipeline::{Pipeline, PipelineBuilder};
    use crate::ratelimit::RateLimiter;
    use crate::stages::{FnStage, StageDefinition, StageResult};
    use crate::testing::ScriptedInvoker;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn abc_definitions() -> Vec<StageDefinition> {
        vec![
            StageDefinition::new("A", "Investigate: {input}"),
            StageDefinition::new("B", "Expand on this:\n{A}"),
            StageDefinition::new("C", "Conclude from:\n{B}").as_artifact(),
        ]
    }

    fn abc_pipeline(invoker: Arc<ScriptedInvoker>) -> PipelineBuilder {
        let invoker: Arc<dyn Invoker> = invoker;
        PipelineBuilder::new("abc")
            .with_rate_limiter(Arc::new(RateLimiter::disabled()))
            .add_definitions(&abc_definitions(), &invoker)
    }

    #[tokio::test]
    async fn test_three_stage_chain_threads_outputs() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let pipeline = abc_pipeline(invoker.clone()).build().unwrap();

        let outcome = pipeline.run("quantum error correction").await.unwrap();

        assert_eq!(outcome.results.keys(), vec!["A", "B", "C"]);
        assert_eq!(outcome.results.get("A"), Some("A-out"));
        assert_eq!(outcome.results.get("C"), Some("C-out"));
        assert_eq!(invoker.stage_order(), vec!["A", "B", "C"]);
        assert_eq!(invoker.prompts_for("A"), vec!["Investigate: quantum error correction".to_string()]);
        assert!(invoker.prompts_for("B")[0].contains("A-out"));
        assert!(invoker.prompts_for("C")[0].contains("B-out"));
        assert!(outcome.iterations.is_empty());
        assert!(outcome.is_fully_checkpointed());
    }

    #[tokio::test]
    async fn test_key_order_and_size_match_declaration() {
        let names = ["plan", "hypotheses", "reviews", "rankings", "evolved"];
        let mut builder = PipelineBuilder::new("order").with_rate_limiter(Arc::new(RateLimiter::disabled()));
        for name in names {
            builder = builder.stage(Arc::new(FnStage::new(name, |ctx| {
                Ok(StageResult::new(format!("{}#{}", ctx.stage_name(), ctx.outputs().len())))
            })));
        }

        let outcome = builder.build().unwrap().run("topic").await.unwrap();
        assert_eq!(outcome.results.keys(), names.to_vec());
        assert_eq!(outcome.results.len(), names.len());
        assert_eq!(outcome.results.get("evolved"), Some("evolved#4"));
        assert_eq!(outcome.results.last(), Some("evolved#4"));
    }

    #[tokio::test]
    async fn test_depth_and_truncation_reach_prompts() {
        let invoker = Arc::new(ScriptedInvoker::new().with_response("framework", "0123456789"));
        let dyn_invoker: Arc<dyn Invoker> = invoker.clone();
        let pipeline = PipelineBuilder::new("research")
            .with_rate_limiter(Arc::new(RateLimiter::disabled()))
            .with_reference_budget(Some(4))
            .add_definition(
                &StageDefinition::new("framework", "Create a {depth} framework for: {input}"),
                dyn_invoker.clone(),
            )
            .add_definition(&StageDefinition::new("deep_dive", "[{framework}]"), dyn_invoker)
            .build()
            .unwrap();

        pipeline
            .run(PipelineInput::new("a very long topic").with_depth(Depth::Exhaustive))
            .await
            .unwrap();

        assert_eq!(
            invoker.prompts_for("framework"),
            vec!["Create a exhaustive framework for: a very long topic".to_string()]
        );
        assert_eq!(invoker.prompts_for("deep_dive"), vec!["[0123]".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_paced_by_limiter() {
        let interval = Duration::from_millis(250);
        let invoker = Arc::new(ScriptedInvoker::new());
        let pipeline = abc_pipeline(invoker.clone())
            .with_rate_limiter(Arc::new(RateLimiter::new(interval)))
            .build()
            .unwrap();

        let start = Instant::now();
        pipeline.run("topic").await.unwrap();
        assert!(start.elapsed() >= interval * 2);

        let calls = invoker.calls();
        for pair in calls.windows(2) {
            assert!(pair[1].started_at - pair[0].started_at >= interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_share_limiter() {
        let interval = Duration::from_millis(200);
        let limiter = Arc::new(RateLimiter::new(interval));
        let invoker = Arc::new(ScriptedInvoker::new());

        let first = abc_pipeline(invoker.clone()).with_rate_limiter(limiter.clone()).build().unwrap();
        let second = abc_pipeline(invoker.clone()).with_rate_limiter(limiter.clone()).build().unwrap();

        let (a, b) = tokio::join!(first.run("one"), second.run("two"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(limiter.turns(), 6);

        let mut starts: Vec<Instant> = invoker.calls().iter().map(|c| c.started_at).collect();
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_all_keeps_input_order_and_pacing() {
        let interval = Duration::from_millis(100);
        let invoker = Arc::new(ScriptedInvoker::new());
        let pipeline = abc_pipeline(invoker.clone())
            .with_rate_limiter(Arc::new(RateLimiter::new(interval)))
            .build()
            .unwrap();

        let outcomes = pipeline.run_all(["one", "two", "three"]).await;

        assert_eq!(outcomes.len(), 3);
        let run_ids: Vec<_> = outcomes.iter().map(|o| o.as_ref().unwrap().run_id).collect();
        assert_ne!(run_ids[0], run_ids[1]);
        assert_ne!(run_ids[1], run_ids[2]);
        assert_eq!(pipeline.rate_limiter().turns(), 9);

        let mut starts: Vec<Instant> = invoker.calls().iter().map(|c| c.started_at).collect();
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
        let a_prompts = invoker.prompts_for("A");
        assert!(a_prompts.contains(&"Investigate: three".to_string()));
    }

    #[tokio::test]
    async fn test_mid_pipeline_failure_aborts_without_later_checkpoints() {
        let invoker = Arc::new(ScriptedInvoker::new().with_failure("B", InvocationError::quota("429")));
        let store = Arc::new(InMemoryCheckpointStore::new());
        let pipeline = abc_pipeline(invoker.clone())
            .with_checkpoint_store(store.clone())
            .build()
            .unwrap();

        let err = pipeline.run("topic").await.unwrap_err();

        match &err {
            StagechainError::StageInvocation(e) => assert_eq!(e.stage, "B"),
            other => panic!("expected StageInvocation, got {other:?}"),
        }
        assert_eq!(invoker.stage_order(), vec!["A", "B"]);
        assert_eq!(store.iterations().await.unwrap(), vec![1]);
        let only = store.load_latest().await.unwrap().unwrap();
        assert_eq!(only.results.keys(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_checkpoint_after_every_stage() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let pipeline = abc_pipeline(invoker)
            .with_checkpoint_store(store.clone())
            .build()
            .unwrap();

        let outcome = pipeline.run("topic").await.unwrap();

        assert_eq!(outcome.iterations, vec![1, 2, 3]);
        assert_eq!(store.next_iteration_number().await.unwrap(), 4);

        let first = store.load(1).await.unwrap().unwrap();
        assert_eq!(first.stage.as_deref(), Some("A"));
        assert_eq!(first.results.len(), 1);
        assert_eq!(first.run_id, Some(outcome.run_id));

        let last = store.load_latest().await.unwrap().unwrap();
        assert_eq!(last.results.keys(), vec!["A", "B", "C"]);
        assert_eq!(last.artifact.as_deref(), Some("C-out"));
        assert!(store.artifact(2).is_none());
        assert_eq!(store.artifact(3).as_deref(), Some("C-out"));
    }

    #[tokio::test]
    async fn test_checkpoint_write_failure_does_not_abort() {
        let next = Arc::new(AtomicU64::new(0));
        let mut store = MockCheckpointStore::new();
        store
            .expect_reserve_iteration()
            .times(3)
            .returning(move || Ok(next.fetch_add(1, Ordering::SeqCst) + 1));
        store.expect_save().times(3).returning(|iteration, _| {
            Err(CheckpointWriteError::Io {
                iteration,
                path: PathBuf::from("/readonly/iterations"),
                reason: "permission denied".into(),
            })
        });

        let invoker = Arc::new(ScriptedInvoker::new());
        let pipeline = abc_pipeline(invoker.clone())
            .with_checkpoint_store(Arc::new(store))
            .build()
            .unwrap();

        let outcome = pipeline.run("topic").await.unwrap();

        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.iterations.is_empty());
        assert_eq!(outcome.checkpoint_errors.len(), 3);
        assert_eq!(outcome.checkpoint_errors[2].iteration(), Some(3));
        assert!(matches!(
            outcome.into_result(),
            Err(StagechainError::CheckpointWrite(CheckpointWriteError::Io { iteration: 1, .. }))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_stage() {
        let token = Arc::new(CancellationToken::new());
        let stop = token.clone();
        let pipeline = PipelineBuilder::new("cancel")
            .with_rate_limiter(Arc::new(RateLimiter::disabled()))
            .with_cancellation(token)
            .stage(Arc::new(FnStage::new("first", move |_| {
                stop.cancel("operator stop");
                Ok(StageResult::new("done"))
            })))
            .stage(Arc::new(FnStage::new("second", |_| Ok(StageResult::new("never")))))
            .build()
            .unwrap();

        match pipeline.run("topic").await {
            Err(StagechainError::Cancelled(reason)) => assert_eq!(reason, "operator stop"),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resume_from_record_skips_completed_stages() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let pipeline = abc_pipeline(invoker.clone())
            .with_checkpoint_store(store.clone())
            .build()
            .unwrap();

        let seed: Context = [("A", "seeded analysis")].into_iter().collect();
        store.save(5, IterationRecord::new(seed)).await.unwrap();
        let record = store.load_latest().await.unwrap().unwrap();

        let outcome = pipeline.resume_from(&record, "topic").await.unwrap();

        assert_eq!(invoker.stage_order(), vec!["B", "C"]);
        assert!(invoker.prompts_for("B")[0].contains("seeded analysis"));
        assert_eq!(outcome.results.keys(), vec!["A", "B", "C"]);
        assert_eq!(outcome.iterations, vec![6, 7]);
    }

    #[tokio::test]
    async fn test_resume_from_drops_undeclared_entries() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let pipeline = abc_pipeline(invoker.clone()).build().unwrap();

        let seed: Context = [("A", "seeded"), ("GENERATE", "stray"), ("B", "also seeded")]
            .into_iter()
            .collect();
        let record = IterationRecord::new(seed);

        let outcome = pipeline.resume_from(&record, "topic").await.unwrap();

        assert_eq!(invoker.stage_order(), vec!["C"]);
        assert_eq!(outcome.results.keys(), vec!["A", "B", "C"]);
        assert_eq!(outcome.results.get("GENERATE"), None);
        assert_eq!(outcome.results.get("B"), Some("also seeded"));
    }

    #[tokio::test]
    async fn test_lifecycle_events_in_order() {
        let sink = Arc::new(CollectingEventSink::new());
        let invoker = Arc::new(ScriptedInvoker::new().with_failure("C", InvocationError::timeout("slow")));
        let pipeline: Pipeline = abc_pipeline(invoker)
            .with_event_sink(sink.clone())
            .build()
            .unwrap();

        assert!(pipeline.run("topic").await.is_err());

        assert_eq!(
            sink.event_types(),
            vec![
                names::RUN_STARTED,
                names::STAGE_STARTED,
                names::STAGE_COMPLETED,
                names::STAGE_STARTED,
                names::STAGE_COMPLETED,
                names::STAGE_STARTED,
                names::STAGE_FAILED,
                names::RUN_FAILED,
            ]
        );
        let failed = &sink.events_of_type(names::STAGE_FAILED)[0];
        assert_eq!(failed.field("stage"), Some("C"));
        assert_eq!(failed.field("kind"), Some("timeout"));
    }
}
