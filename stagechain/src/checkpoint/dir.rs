//! Directory-backed checkpoint store.
//!
//! Layout under the root directory:
//!
//! ```text
//! iterations/iteration_<n>.json      structured records
//! artifacts/<prefix>_<n>.<ext>       standalone generated artifacts
//! ```
//!
//! Records are written to a temporary file and hard-linked into place, so a
//! number that already exists on disk is never overwritten, even by another
//! process sharing the directory.

use super::{CheckpointStore, IterationRecord};
use crate::errors::{CheckpointReadError, CheckpointWriteError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default artifact file name prefix.
pub const DEFAULT_ARTIFACT_PREFIX: &str = "implementation";

/// Default artifact file extension.
pub const DEFAULT_ARTIFACT_EXTENSION: &str = "txt";

const ITERATIONS_DIR: &str = "iterations";
const ARTIFACTS_DIR: &str = "artifacts";
const RECORD_PREFIX: &str = "iteration_";
const RECORD_SUFFIX: &str = ".json";

/// Checkpoint store persisting records as JSON files in a directory.
#[derive(Debug)]
pub struct DirCheckpointStore {
    root: PathBuf,
    artifact_prefix: String,
    artifact_extension: String,
    last_reserved: Mutex<u64>,
}

impl DirCheckpointStore {
    /// Creates a store rooted at `root`. Directories are created on first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            artifact_prefix: DEFAULT_ARTIFACT_PREFIX.to_string(),
            artifact_extension: DEFAULT_ARTIFACT_EXTENSION.to_string(),
            last_reserved: Mutex::new(0),
        }
    }

    /// Sets the artifact file prefix and extension.
    #[must_use]
    pub fn with_artifact_naming(mut self, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        self.artifact_prefix = prefix.into();
        self.artifact_extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the record for `iteration`.
    #[must_use]
    pub fn record_path(&self, iteration: u64) -> PathBuf {
        self.iterations_dir()
            .join(format!("{RECORD_PREFIX}{iteration}{RECORD_SUFFIX}"))
    }

    /// Returns the path of the artifact for `iteration`.
    #[must_use]
    pub fn artifact_path(&self, iteration: u64) -> PathBuf {
        let name = if self.artifact_extension.is_empty() {
            format!("{}_{iteration}", self.artifact_prefix)
        } else {
            format!("{}_{iteration}.{}", self.artifact_prefix, self.artifact_extension)
        };
        self.root.join(ARTIFACTS_DIR).join(name)
    }

    fn iterations_dir(&self) -> PathBuf {
        self.root.join(ITERATIONS_DIR)
    }

    /// Lists the numbers of conforming record file names. Other entries are
    /// ignored. A missing directory is an empty store.
    async fn scan(&self) -> std::io::Result<Vec<u64>> {
        let mut entries = match fs::read_dir(self.iterations_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut numbers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            match name.to_str().and_then(parse_record_name) {
                Some(n) => numbers.push(n),
                None => debug!(entry = ?name, "Ignoring non-conforming checkpoint entry"),
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    async fn read_record(&self, iteration: u64) -> Result<Option<IterationRecord>, CheckpointReadError> {
        let path = self.record_path(iteration);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointReadError::new(&path, e.to_string())),
        };
        let record: IterationRecord =
            serde_json::from_str(&raw).map_err(|e| CheckpointReadError::new(&path, e.to_string()))?;
        if record.iteration_number != iteration {
            return Err(CheckpointReadError::new(
                &path,
                format!("record declares iteration {}", record.iteration_number),
            ));
        }
        Ok(Some(record))
    }

    async fn link_record(&self, iteration: u64, json: &str) -> Result<(), CheckpointWriteError> {
        let dir = self.iterations_dir();
        let io_err = |path: &Path, e: std::io::Error| CheckpointWriteError::Io {
            iteration,
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        fs::create_dir_all(&dir).await.map_err(|e| io_err(&dir, e))?;

        let target = self.record_path(iteration);
        let staging = dir.join(format!(".{RECORD_PREFIX}{iteration}.{}.tmp", Uuid::new_v4()));
        fs::write(&staging, json).await.map_err(|e| io_err(&staging, e))?;

        let linked = fs::hard_link(&staging, &target).await;
        if let Err(e) = fs::remove_file(&staging).await {
            warn!(path = %staging.display(), error = %e, "Failed to remove staging file");
        }
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(CheckpointWriteError::IterationTaken { iteration })
            }
            Err(e) => Err(io_err(&target, e)),
        }
    }
}

fn parse_record_name(name: &str) -> Option<u64> {
    name.strip_prefix(RECORD_PREFIX)?
        .strip_suffix(RECORD_SUFFIX)?
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
}

#[async_trait]
impl CheckpointStore for DirCheckpointStore {
    async fn next_iteration_number(&self) -> Result<u64, CheckpointReadError> {
        let last_reserved = self.last_reserved.lock().await;
        let persisted = self
            .scan()
            .await
            .map_err(|e| CheckpointReadError::new(self.iterations_dir(), e.to_string()))?;
        Ok(persisted.last().copied().unwrap_or(0).max(*last_reserved) + 1)
    }

    async fn reserve_iteration(&self) -> Result<u64, CheckpointWriteError> {
        let mut last_reserved = self.last_reserved.lock().await;
        let persisted = self.scan().await.map_err(|e| CheckpointWriteError::Allocation {
            path: self.iterations_dir(),
            reason: e.to_string(),
        })?;
        let next = persisted.last().copied().unwrap_or(0).max(*last_reserved) + 1;
        *last_reserved = next;
        Ok(next)
    }

    async fn save(
        &self,
        iteration: u64,
        record: IterationRecord,
    ) -> Result<IterationRecord, CheckpointWriteError> {
        let record = record.numbered(iteration);
        let json = serde_json::to_string_pretty(&record).map_err(|e| CheckpointWriteError::Serialization {
            iteration,
            reason: e.to_string(),
        })?;

        self.link_record(iteration, &json).await?;
        {
            let mut last_reserved = self.last_reserved.lock().await;
            *last_reserved = (*last_reserved).max(iteration);
        }

        if let Some(artifact) = &record.artifact {
            let path = self.artifact_path(iteration);
            let write = async {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&path, artifact).await
            };
            write.await.map_err(|e| CheckpointWriteError::Io {
                iteration,
                path: path.clone(),
                reason: e.to_string(),
            })?;
        }

        debug!(iteration, root = %self.root.display(), "Saved iteration record");
        Ok(record)
    }

    async fn load_latest(&self) -> Result<Option<IterationRecord>, CheckpointReadError> {
        let numbers = self
            .scan()
            .await
            .map_err(|e| CheckpointReadError::new(self.iterations_dir(), e.to_string()))?;

        for iteration in numbers.into_iter().rev() {
            match self.read_record(iteration).await {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => {}
                Err(err) => warn!(iteration, error = %err, "Skipping unreadable iteration record"),
            }
        }
        Ok(None)
    }

    async fn load(&self, iteration: u64) -> Result<Option<IterationRecord>, CheckpointReadError> {
        self.read_record(iteration).await
    }

    async fn iterations(&self) -> Result<Vec<u64>, CheckpointReadError> {
        self.scan()
            .await
            .map_err(|e| CheckpointReadError::new(self.iterations_dir(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::save_next;
    use crate::context::Context;
    use pretty_assertions::assert_eq;

    fn record(stage: &str, text: &str) -> IterationRecord {
        let results: Context = [(stage, text)].into_iter().collect();
        IterationRecord::new(results).with_stage(stage)
    }

    #[test]
    fn test_parse_record_name() {
        assert_eq!(parse_record_name("iteration_12.json"), Some(12));
        assert_eq!(parse_record_name("iteration_0.json"), None);
        assert_eq!(parse_record_name("iteration_abc.json"), None);
        assert_eq!(parse_record_name("iteration_3.json.bak"), None);
        assert_eq!(parse_record_name(".iteration_3.tmp"), None);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirCheckpointStore::new(tmp.path().join("project"));
        assert_eq!(store.next_iteration_number().await.unwrap(), 1);
        assert!(store.load_latest().await.unwrap().is_none());
        assert!(store.iterations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_next_after_save_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirCheckpointStore::new(tmp.path());
        for k in 1..=3 {
            let saved = save_next(&store, record("a", "x")).await.unwrap();
            assert_eq!(saved.iteration_number, k);
            assert_eq!(store.next_iteration_number().await.unwrap(), k + 1);
        }

        let reopened = DirCheckpointStore::new(tmp.path());
        assert_eq!(reopened.next_iteration_number().await.unwrap(), 4);
        assert_eq!(reopened.reserve_iteration().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_non_conforming_entries_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirCheckpointStore::new(tmp.path());
        for n in [1, 2, 4] {
            store.save(n, record("a", "x")).await.unwrap();
        }
        let dir = tmp.path().join("iterations");
        std::fs::write(dir.join("iteration_malformed.json"), "{}").unwrap();
        std::fs::write(dir.join("notes.txt"), "scratch").unwrap();
        std::fs::create_dir(dir.join("iteration_7")).unwrap();

        assert_eq!(store.next_iteration_number().await.unwrap(), 5);
        assert_eq!(store.iterations().await.unwrap(), vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_load_latest_skips_malformed_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirCheckpointStore::new(tmp.path());
        store.save(1, record("a", "first")).await.unwrap();
        store.save(2, record("a", "second")).await.unwrap();
        std::fs::write(store.record_path(3), "{ truncated").unwrap();

        assert_eq!(store.next_iteration_number().await.unwrap(), 4);
        let latest = store.load_latest().await.unwrap().unwrap();
        assert_eq!(latest.iteration_number, 2);
        assert_eq!(latest.results.get("a"), Some("second"));
        assert!(store.load(3).await.is_err());
        assert!(store.load(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_artifact_written_as_plain_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirCheckpointStore::new(tmp.path()).with_artifact_naming("mlx_implementation", ".py");
        store
            .save(1, record("GENERATE", "code").with_artifact("import mlx.core as mx\n"))
            .await
            .unwrap();

        let path = store.artifact_path(1);
        assert!(path.ends_with("artifacts/mlx_implementation_1.py"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "import mlx.core as mx\n");

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.record_path(1)).unwrap()).unwrap();
        assert_eq!(json["iteration_number"], 1);
        assert_eq!(json["results"]["GENERATE"], "code");
    }

    #[tokio::test]
    async fn test_existing_number_never_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let first = DirCheckpointStore::new(tmp.path());
        let second = DirCheckpointStore::new(tmp.path());

        assert_eq!(first.reserve_iteration().await.unwrap(), 1);
        assert_eq!(second.reserve_iteration().await.unwrap(), 1);

        first.save(1, record("a", "winner")).await.unwrap();
        let err = second.save(1, record("a", "loser")).await.unwrap_err();
        assert!(matches!(err, CheckpointWriteError::IterationTaken { iteration: 1 }));

        let stored = first.load(1).await.unwrap().unwrap();
        assert_eq!(stored.results.get("a"), Some("winner"));
        assert_eq!(second.reserve_iteration().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_two_stores_on_one_directory_keep_every_record() {
        let tmp = tempfile::tempdir().unwrap();
        let first = DirCheckpointStore::new(tmp.path());
        let second = DirCheckpointStore::new(tmp.path());

        let mut numbers = Vec::new();
        for round in 0..20 {
            let (a, b) = tokio::join!(
                save_next(&first, record("a", &format!("first-{round}"))),
                save_next(&second, record("b", &format!("second-{round}"))),
            );
            numbers.push(a.unwrap().iteration_number);
            numbers.push(b.unwrap().iteration_number);
        }

        numbers.sort_unstable();
        numbers.dedup();
        assert_eq!(numbers.len(), 40);
        assert_eq!(first.iterations().await.unwrap(), numbers);
    }

    #[tokio::test]
    async fn test_write_failure_propagates() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let store = DirCheckpointStore::new(&blocker);
        let err = store.save(1, record("a", "x")).await.unwrap_err();
        assert!(matches!(err, CheckpointWriteError::Io { iteration: 1, .. }));
    }
}
