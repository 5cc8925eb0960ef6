//! In-process checkpoint store.

use super::{CheckpointStore, IterationRecord};
use crate::errors::{CheckpointReadError, CheckpointWriteError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<u64, String>,
    artifacts: BTreeMap<u64, String>,
    last_reserved: u64,
}

/// Checkpoint store kept in memory. Records are held as serialized JSON so
/// reads behave like the on-disk store.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    state: Mutex<State>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw text under `iteration`, bypassing serialization.
    pub fn insert_raw(&self, iteration: u64, raw: impl Into<String>) {
        self.state.lock().records.insert(iteration, raw.into());
    }

    /// Returns the standalone artifact stored for `iteration`.
    #[must_use]
    pub fn artifact(&self, iteration: u64) -> Option<String> {
        self.state.lock().artifacts.get(&iteration).cloned()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    fn parse(iteration: u64, raw: &str) -> Result<IterationRecord, CheckpointReadError> {
        serde_json::from_str(raw)
            .map_err(|e| CheckpointReadError::new(format!("memory://iteration_{iteration}"), e.to_string()))
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn next_iteration_number(&self) -> Result<u64, CheckpointReadError> {
        let state = self.state.lock();
        let persisted = state.records.keys().next_back().copied().unwrap_or(0);
        Ok(persisted.max(state.last_reserved) + 1)
    }

    async fn reserve_iteration(&self) -> Result<u64, CheckpointWriteError> {
        let mut state = self.state.lock();
        let persisted = state.records.keys().next_back().copied().unwrap_or(0);
        let next = persisted.max(state.last_reserved) + 1;
        state.last_reserved = next;
        Ok(next)
    }

    async fn save(
        &self,
        iteration: u64,
        record: IterationRecord,
    ) -> Result<IterationRecord, CheckpointWriteError> {
        let record = record.numbered(iteration);
        let raw = serde_json::to_string_pretty(&record).map_err(|e| CheckpointWriteError::Serialization {
            iteration,
            reason: e.to_string(),
        })?;

        let mut state = self.state.lock();
        if state.records.contains_key(&iteration) {
            return Err(CheckpointWriteError::IterationTaken { iteration });
        }
        state.records.insert(iteration, raw);
        if let Some(artifact) = &record.artifact {
            state.artifacts.insert(iteration, artifact.clone());
        }
        state.last_reserved = state.last_reserved.max(iteration);
        Ok(record)
    }

    async fn load_latest(&self) -> Result<Option<IterationRecord>, CheckpointReadError> {
        let records: Vec<(u64, String)> = self
            .state
            .lock()
            .records
            .iter()
            .rev()
            .map(|(n, raw)| (*n, raw.clone()))
            .collect();

        for (iteration, raw) in records {
            match Self::parse(iteration, &raw) {
                Ok(record) => return Ok(Some(record)),
                Err(err) => warn!(iteration, error = %err, "Skipping unreadable iteration record"),
            }
        }
        Ok(None)
    }

    async fn load(&self, iteration: u64) -> Result<Option<IterationRecord>, CheckpointReadError> {
        let raw = self.state.lock().records.get(&iteration).cloned();
        raw.map(|raw| Self::parse(iteration, &raw)).transpose()
    }

    async fn iterations(&self) -> Result<Vec<u64>, CheckpointReadError> {
        Ok(self.state.lock().records.keys().copied().collect())
    }
}
