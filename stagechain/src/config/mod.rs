//! File and environment configuration.
//!
//! ```toml
//! preset = "deep_research"
//!
//! [rate_limit]
//! min_interval_ms = 250
//!
//! [prompt]
//! reference_budget_chars = 4000   # 0 disables truncation
//!
//! [checkpoint]
//! dir = "mlx_output"
//! artifact_prefix = "mlx_implementation"
//! artifact_extension = "py"
//!
//! [invocation]
//! timeout_seconds = 120
//!
//! [[stages]]
//! name = "summary"
//! template = "Summarize: {input}"
//! ```
//!
//! `STAGECHAIN_MIN_INTERVAL_MS` and `STAGECHAIN_CHECKPOINT_DIR` override the
//! file when set.

use crate::checkpoint::{CheckpointStore, DirCheckpointStore, DEFAULT_ARTIFACT_EXTENSION, DEFAULT_ARTIFACT_PREFIX};
use crate::errors::ConfigError;
use crate::invoke::Invoker;
use crate::observability::LogFormat;
use crate::pipeline::PipelineBuilder;
use crate::presets::{self, Preset};
use crate::ratelimit::RateLimiter;
use crate::refinement::{RefinementDefinitions, RefinementLoop};
use crate::stages::{timeout_from_secs, StageDefinition, DEFAULT_REFERENCE_BUDGET};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Overrides `rate_limit.min_interval_ms`.
pub const ENV_MIN_INTERVAL_MS: &str = "STAGECHAIN_MIN_INTERVAL_MS";
/// Overrides `checkpoint.dir`.
pub const ENV_CHECKPOINT_DIR: &str = "STAGECHAIN_CHECKPOINT_DIR";

/// Call pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum milliseconds between the starts of two external calls.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_min_interval_ms() -> u64 {
    250
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

/// Prompt rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Characters kept from each substituted output; 0 disables truncation.
    #[serde(default = "default_reference_budget")]
    pub reference_budget_chars: usize,
}

fn default_reference_budget() -> usize {
    DEFAULT_REFERENCE_BUDGET
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            reference_budget_chars: default_reference_budget(),
        }
    }
}

/// Checkpoint persistence. No directory means no checkpointing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Root directory of the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Artifact file name prefix.
    #[serde(default = "default_artifact_prefix")]
    pub artifact_prefix: String,
    /// Artifact file extension, without the dot.
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,
}

fn default_artifact_prefix() -> String {
    DEFAULT_ARTIFACT_PREFIX.to_string()
}

fn default_artifact_extension() -> String {
    DEFAULT_ARTIFACT_EXTENSION.to_string()
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: None,
            artifact_prefix: default_artifact_prefix(),
            artifact_extension: default_artifact_extension(),
        }
    }
}

/// External call settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationSettings {
    /// Per-call timeout. Unset means no timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Filter used when `STAGECHAIN_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

/// Refinement loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Number of refine rounds after generation.
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Custom stage definitions; the built-in conversion loop otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<RefinementDefinitions>,
}

fn default_rounds() -> u32 {
    3
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            stages: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagechainConfig {
    /// Built-in chain used when `stages` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<Preset>,
    /// Call pacing.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Prompt rendering.
    #[serde(default)]
    pub prompt: PromptConfig,
    /// Checkpoint persistence.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// External call settings.
    #[serde(default)]
    pub invocation: InvocationSettings,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Refinement loop settings.
    #[serde(default)]
    pub refinement: RefinementConfig,
    /// Explicit stage chain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageDefinition>,
}

impl StagechainConfig {
    /// Parses and validates a TOML document. Environment overrides are not
    /// applied.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` or `ConfigError::Invalid`.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, else the
    /// parse and validation errors of [`StagechainConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&source)?.with_env_overrides()
    }

    /// Applies `STAGECHAIN_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if an override does not parse.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if an override does not parse.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(raw) = lookup(ENV_MIN_INTERVAL_MS) {
            self.rate_limit.min_interval_ms = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: ENV_MIN_INTERVAL_MS.to_string(),
                reason: format!("'{raw}' is not a whole number of milliseconds"),
            })?;
        }
        if let Some(dir) = lookup(ENV_CHECKPOINT_DIR).filter(|d| !d.trim().is_empty()) {
            self.checkpoint.dir = Some(PathBuf::from(dir));
        }
        Ok(self)
    }

    /// Checks values the schema alone cannot.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_timeout("invocation.timeout_seconds", self.invocation.timeout_seconds)?;
        for (index, stage) in self.stages.iter().enumerate() {
            check_timeout(&format!("stages[{index}].timeout_seconds"), stage.timeout_seconds)?;
        }
        if let Some(defs) = &self.refinement.stages {
            for (phase, stage) in [("analyze", &defs.analyze), ("generate", &defs.generate), ("refine", &defs.refine)] {
                check_timeout(&format!("refinement.stages.{phase}.timeout_seconds"), stage.timeout_seconds)?;
            }
        }
        if self.checkpoint.artifact_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "checkpoint.artifact_prefix".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Returns a limiter for the configured interval.
    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(Duration::from_millis(self.rate_limit.min_interval_ms))
    }

    /// Returns the per-reference budget; `None` when truncation is off.
    #[must_use]
    pub fn reference_budget(&self) -> Option<usize> {
        Some(self.prompt.reference_budget_chars).filter(|chars| *chars > 0)
    }

    /// Returns the per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.invocation.timeout_seconds.and_then(timeout_from_secs)
    }

    /// Returns the directory store, if a directory is configured.
    #[must_use]
    pub fn checkpoint_store(&self) -> Option<DirCheckpointStore> {
        self.checkpoint.dir.as_ref().map(|dir| {
            DirCheckpointStore::new(dir)
                .with_artifact_naming(&self.checkpoint.artifact_prefix, &self.checkpoint.artifact_extension)
        })
    }

    /// Returns the explicit stages, else the preset's.
    #[must_use]
    pub fn stage_definitions(&self) -> Vec<StageDefinition> {
        if self.stages.is_empty() {
            self.preset.map(Preset::definitions).unwrap_or_default()
        } else {
            self.stages.clone()
        }
    }

    /// Returns a builder wired with every configured setting and stage.
    ///
    /// The builder gets its own limiter; call
    /// [`PipelineBuilder::with_rate_limiter`] to share one across pipelines.
    #[must_use]
    pub fn pipeline_builder(&self, name: impl Into<String>, invoker: &Arc<dyn Invoker>) -> PipelineBuilder {
        let mut builder = PipelineBuilder::new(name)
            .with_rate_limiter(Arc::new(self.rate_limiter()))
            .with_reference_budget(self.reference_budget());
        if let Some(timeout) = self.timeout() {
            builder = builder.with_timeout(timeout);
        }
        if let Some(store) = self.checkpoint_store() {
            builder = builder.with_checkpoint_store(Arc::new(store));
        }
        builder.add_definitions(&self.stage_definitions(), invoker)
    }

    /// Returns a refinement loop over the configured checkpoint directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if no checkpoint directory is set.
    pub fn refinement_loop(&self, invoker: &Arc<dyn Invoker>) -> Result<RefinementLoop, ConfigError> {
        let store: Arc<dyn CheckpointStore> = Arc::new(self.checkpoint_store().ok_or_else(|| ConfigError::Invalid {
            field: "checkpoint.dir".to_string(),
            reason: "the refinement loop needs a checkpoint directory".to_string(),
        })?);
        let definitions = self.refinement.stages.clone().unwrap_or_else(presets::refinement);
        Ok(
            RefinementLoop::from_definitions(&definitions, invoker, store, self.reference_budget(), self.timeout())
                .with_rate_limiter(Arc::new(self.rate_limiter())),
        )
    }
}

fn check_timeout(field: &str, seconds: Option<f64>) -> Result<(), ConfigError> {
    match seconds {
        Some(secs) if timeout_from_secs(secs).is_none() => Err(ConfigError::Invalid {
            field: field.to_string(),
            reason: format!("{secs} is not a positive, representable number of seconds"),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedInvoker;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = StagechainConfig::from_toml_str("").unwrap();
        assert_eq!(config.rate_limit.min_interval_ms, 250);
        assert_eq!(config.reference_budget(), Some(4000));
        assert_eq!(config.checkpoint.artifact_prefix, "implementation");
        assert_eq!(config.checkpoint.artifact_extension, "txt");
        assert!(config.checkpoint_store().is_none());
        assert!(config.timeout().is_none());
        assert_eq!(config.refinement.rounds, 3);
        assert_eq!(config.logging.filter, "info");
        assert!(config.stage_definitions().is_empty());
    }

    #[test]
    fn test_full_document() {
        let config = StagechainConfig::from_toml_str(
            r#"
            [rate_limit]
            min_interval_ms = 500

            [prompt]
            reference_budget_chars = 0

            [checkpoint]
            dir = "mlx_output"
            artifact_prefix = "mlx_implementation"
            artifact_extension = "py"

            [invocation]
            timeout_seconds = 90

            [logging]
            format = "json"

            [[stages]]
            name = "outline"
            template = "Outline: {input}"

            [[stages]]
            name = "draft"
            template = "Draft from {outline}"
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limiter().min_interval(), Duration::from_millis(500));
        assert_eq!(config.reference_budget(), None);
        assert_eq!(config.timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.logging.format, LogFormat::Json);
        let store = config.checkpoint_store().unwrap();
        assert!(store.artifact_path(2).ends_with("mlx_output/artifacts/mlx_implementation_2.py"));
        assert_eq!(config.stage_definitions().len(), 2);
    }

    #[test]
    fn test_preset_selected_when_no_stages() {
        let config = StagechainConfig::from_toml_str(r#"preset = "co_scientist""#).unwrap();
        assert_eq!(config.stage_definitions().len(), 7);
        assert_eq!(config.stage_definitions()[0].name, "plan");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = StagechainConfig::from_toml_str("[invocation]\ntimeout_seconds = -1").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "invocation.timeout_seconds"));

        let err = StagechainConfig::from_toml_str("[rate_limit]\nmin_interval_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_oversized_timeouts_rejected() {
        let err = StagechainConfig::from_toml_str("[invocation]\ntimeout_seconds = 1e30").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "invocation.timeout_seconds"));

        let err = StagechainConfig::from_toml_str(
            "[[stages]]\nname = \"a\"\ntemplate = \"{input}\"\n\n\
             [[stages]]\nname = \"b\"\ntemplate = \"{a}\"\ntimeout_seconds = inf\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "stages[1].timeout_seconds"));

        let config = StagechainConfig {
            invocation: InvocationSettings { timeout_seconds: Some(1e30) },
            ..StagechainConfig::default()
        };
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [(ENV_MIN_INTERVAL_MS, "1000"), (ENV_CHECKPOINT_DIR, "/tmp/runs")]
            .into_iter()
            .collect();
        let config = StagechainConfig::default()
            .with_overrides_from(|key| env.get(key).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.rate_limit.min_interval_ms, 1000);
        assert_eq!(config.checkpoint.dir, Some(PathBuf::from("/tmp/runs")));

        let err = StagechainConfig::default()
            .with_overrides_from(|key| (key == ENV_MIN_INTERVAL_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = StagechainConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stagechain.toml");
        std::fs::write(&path, "preset = \"quick_conversion\"\n[rate_limit]\nmin_interval_ms = 10\n").unwrap();
        let config = StagechainConfig::load(&path).unwrap();
        assert_eq!(config.preset, Some(Preset::QuickConversion));
    }

    #[tokio::test]
    async fn test_builders_from_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StagechainConfig::from_toml_str(&format!(
            "preset = \"quick_conversion\"\n[rate_limit]\nmin_interval_ms = 0\n[checkpoint]\ndir = {:?}\n",
            tmp.path().display().to_string()
        ))
        .unwrap();
        let invoker: Arc<dyn Invoker> = Arc::new(ScriptedInvoker::new());

        let outcome = config.pipeline_builder("quick", &invoker).build().unwrap().run("model").await.unwrap();
        assert_eq!(outcome.iterations, vec![1, 2, 3]);
        assert!(tmp.path().join("artifacts/implementation_3.txt").exists());

        let refinement = config.refinement_loop(&invoker).unwrap();
        let result = refinement.run("model", 1).await.unwrap();
        assert_eq!(result.iterations, vec![4, 5, 6]);

        let bare = StagechainConfig::default();
        assert!(bare.refinement_loop(&invoker).is_err());
    }
}
