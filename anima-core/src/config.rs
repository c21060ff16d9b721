//! `AnimaConfig` — three-layer configuration merge (compiled defaults →
//! `anima.toml` → `ANIMA_*` environment variables), later layers winning.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{AnimaError, Result};

fn default_agent() -> String {
    "claude".to_string()
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_iteration_cooldown_seconds() -> u64 {
    10
}
fn default_agent_timeout_seconds() -> u64 {
    600
}
fn default_quality_timeout_seconds() -> u64 {
    60
}
fn default_typecheck_timeout_seconds() -> u64 {
    120
}
fn default_test_timeout_seconds() -> u64 {
    120
}
fn default_quota_sleep_rate_limited_seconds() -> u64 {
    60
}
fn default_quota_sleep_exhausted_seconds() -> u64 {
    3600
}
fn default_quota_sleep_max_seconds() -> u64 {
    7200
}
fn default_history_window_for_stuck() -> usize {
    3
}
fn default_protected_paths() -> Vec<String> {
    vec![
        "VISION.md".to_string(),
        "anima-core/src/".to_string(),
        "anima-core/src/dispatch.rs".to_string(),
    ]
}
fn default_true() -> bool {
    true
}

/// Timeouts for the pipeline's blocking operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_agent_timeout_seconds")]
    pub agent_seconds: u64,
    #[serde(default = "default_quality_timeout_seconds")]
    pub quality_seconds: u64,
    #[serde(default = "default_typecheck_timeout_seconds")]
    pub typecheck_seconds: u64,
    #[serde(default = "default_test_timeout_seconds")]
    pub test_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            agent_seconds: default_agent_timeout_seconds(),
            quality_seconds: default_quality_timeout_seconds(),
            typecheck_seconds: default_typecheck_timeout_seconds(),
            test_seconds: default_test_timeout_seconds(),
        }
    }
}

/// Quota sleep bounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_quota_sleep_rate_limited_seconds")]
    pub sleep_rate_limited_seconds: u64,
    #[serde(default = "default_quota_sleep_exhausted_seconds")]
    pub sleep_exhausted_seconds: u64,
    #[serde(default = "default_quota_sleep_max_seconds")]
    pub sleep_max_seconds: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            sleep_rate_limited_seconds: default_quota_sleep_rate_limited_seconds(),
            sleep_exhausted_seconds: default_quota_sleep_exhausted_seconds(),
            sleep_max_seconds: default_quota_sleep_max_seconds(),
        }
    }
}

/// Root configuration value, threaded immutably through the driver context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnimaConfig {
    /// Which agent adapter `ANIMA_AGENT` selects (`claude` | `codex` | `gemini` | …).
    #[serde(default = "default_agent")]
    pub agent: String,

    /// Whether successful iterations push commits/tags to a remote.
    #[serde(default = "default_true")]
    pub auto_push: bool,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    #[serde(default = "default_iteration_cooldown_seconds")]
    pub iteration_cooldown_seconds: u64,

    #[serde(default = "default_history_window_for_stuck")]
    pub history_window_for_stuck: usize,

    /// Paths the driver refuses to let an iteration modify.
    #[serde(default = "default_protected_paths")]
    pub protected_paths: Vec<String>,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub quota: QuotaConfig,
}

impl Default for AnimaConfig {
    fn default() -> Self {
        Self {
            agent: default_agent(),
            auto_push: true,
            max_consecutive_failures: default_max_consecutive_failures(),
            iteration_cooldown_seconds: default_iteration_cooldown_seconds(),
            history_window_for_stuck: default_history_window_for_stuck(),
            protected_paths: default_protected_paths(),
            timeouts: TimeoutsConfig::default(),
            quota: QuotaConfig::default(),
        }
    }
}

impl AnimaConfig {
    /// Validates invariants that the layered merge can't enforce by
    /// construction (a non-numeric `anima.toml` value would already have
    /// failed deserialization; these are the semantic checks).
    pub fn validate(&self) -> Result<()> {
        if self.agent.trim().is_empty() {
            return Err(AnimaError::Other("agent name must not be empty".into()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(AnimaError::Other(
                "max_consecutive_failures must be > 0".into(),
            ));
        }
        if self.quota.sleep_max_seconds == 0 {
            return Err(AnimaError::Other("quota.sleep_max_seconds must be > 0".into()));
        }
        Ok(())
    }
}

/// Three-layer loader: compiled defaults, then an optional `anima.toml`,
/// then `ANIMA_*` environment variables (`ANIMA_QUOTA__SLEEP_MAX_SECONDS`
/// style double-underscore nesting), later layers winning.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn load(&self) -> Result<AnimaConfig> {
        let mut builder = Config::builder();

        let defaults = AnimaConfig::default();
        let defaults_json =
            serde_json::to_string(&defaults).map_err(AnimaError::Json)?;
        builder = builder.add_source(File::from_str(&defaults_json, config::FileFormat::Json));

        if let Some(path) = &self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ANIMA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let built = builder
            .build()
            .map_err(|e| AnimaError::Other(format!("config build failed: {e}")))?;
        let loaded: AnimaConfig = built
            .try_deserialize()
            .map_err(|e| AnimaError::Other(format!("config deserialize failed: {e}")))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Loads from `<project_root>/anima.toml` if present, else just
    /// defaults + environment.
    pub fn load_default(project_root: impl AsRef<Path>) -> Result<AnimaConfig> {
        let candidate = project_root.as_ref().join("anima.toml");
        let loader = if candidate.exists() {
            Self::new().with_file(candidate)
        } else {
            Self::new()
        };
        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
