//! Durable iteration records with monotonic numbering.
//!
//! A [`CheckpointStore`] persists one [`IterationRecord`] per completed
//! stage or refinement phase. Numbers are allocated with
//! [`CheckpointStore::reserve_iteration`], which never hands out the same
//! number twice, even to concurrent writers sharing the store.
//!
//! Records that cannot be read are skipped with a warning when scanning for
//! the latest one; they still count when computing the next number.

mod dir;
mod memory;
mod record;

pub use dir::{DirCheckpointStore, DEFAULT_ARTIFACT_EXTENSION, DEFAULT_ARTIFACT_PREFIX};
pub use memory::InMemoryCheckpointStore;
pub use record::IterationRecord;

use crate::errors::{CheckpointReadError, CheckpointWriteError};
use async_trait::async_trait;
use tracing::debug;

/// How many numbers [`save_next`] tries before giving up on a contended store.
pub const MAX_SAVE_ATTEMPTS: u32 = 8;

/// Storage backend for iteration records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the number the next reservation would receive: one greater
    /// than any persisted or reserved number, or 1 for an empty store.
    async fn next_iteration_number(&self) -> Result<u64, CheckpointReadError>;

    /// Atomically allocates the next iteration number.
    async fn reserve_iteration(&self) -> Result<u64, CheckpointWriteError>;

    /// Persists `record` under `iteration` and returns it as stored.
    ///
    /// If the record carries an artifact, the artifact is also stored on its
    /// own. Saving an existing number fails with `IterationTaken`.
    async fn save(
        &self,
        iteration: u64,
        record: IterationRecord,
    ) -> Result<IterationRecord, CheckpointWriteError>;

    /// Loads the newest readable record.
    async fn load_latest(&self) -> Result<Option<IterationRecord>, CheckpointReadError>;

    /// Loads one record; `None` if it does not exist.
    async fn load(&self, iteration: u64) -> Result<Option<IterationRecord>, CheckpointReadError>;

    /// Returns every persisted iteration number, ascending.
    async fn iterations(&self) -> Result<Vec<u64>, CheckpointReadError>;
}

/// Reserves a number and saves `record` under it.
///
/// Another writer sharing the same backing storage may claim the reserved
/// number first. The save is then retried under a fresh reservation, up to
/// [`MAX_SAVE_ATTEMPTS`] numbers in total.
pub async fn save_next(
    store: &dyn CheckpointStore,
    record: IterationRecord,
) -> Result<IterationRecord, CheckpointWriteError> {
    let mut attempt = 1;
    loop {
        let iteration = store.reserve_iteration().await?;
        match store.save(iteration, record.clone()).await {
            Err(CheckpointWriteError::IterationTaken { iteration }) if attempt < MAX_SAVE_ATTEMPTS => {
                debug!(iteration, attempt, "Iteration claimed by another writer, reserving again");
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}
