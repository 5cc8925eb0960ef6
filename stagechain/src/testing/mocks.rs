//! Scripted invokers for testing pipelines without a model.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::invoke::{InvocationConfig, InvocationError, Invoker};

/// One call observed by a [`ScriptedInvoker`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The stage id from the invocation config.
    pub stage_id: String,
    /// The prompt that was sent.
    pub prompt: String,
    /// When the call started.
    pub started_at: Instant,
}

/// An invoker that answers from a script and records every call.
///
/// Unscripted stages answer `"<stage_id>-out"`.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    responses: HashMap<String, String>,
    failures: HashMap<String, InvocationError>,
    latency: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedInvoker {
    /// Creates an invoker that echoes `"<stage_id>-out"`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the response for a stage.
    #[must_use]
    pub fn with_response(mut self, stage_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.responses.insert(stage_id.into(), text.into());
        self
    }

    /// Makes every call for a stage fail.
    #[must_use]
    pub fn with_failure(mut self, stage_id: impl Into<String>, error: InvocationError) -> Self {
        self.failures.insert(stage_id.into(), error);
        self
    }

    /// Delays every answer.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns every call received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the stage ids in call order.
    #[must_use]
    pub fn stage_order(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.stage_id.clone()).collect()
    }

    /// Returns the prompts sent for one stage.
    #[must_use]
    pub fn prompts_for(&self, stage_id: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.stage_id == stage_id)
            .map(|c| c.prompt.clone())
            .collect()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(
        &self,
        prompt: &str,
        config: &InvocationConfig,
    ) -> Result<String, InvocationError> {
        self.calls.lock().push(RecordedCall {
            stage_id: config.stage_id.clone(),
            prompt: prompt.to_string(),
            started_at: Instant::now(),
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(err) = self.failures.get(&config.stage_id) {
            return Err(err.clone());
        }

        Ok(self
            .responses
            .get(&config.stage_id)
            .cloned()
            .unwrap_or_else(|| format!("{}-out", config.stage_id)))
    }
}
