//! Engine configuration
//!
//! Global settings for the engine, loaded from `engine.yaml`:
//!
//! ```yaml
//! max_concurrency: 4
//! fail_fast: false
//! scripts_dir: scripts
//! playbooks_dir: playbooks
//! cache_dir: .playbook-cache
//! output_dir: .playbook-output
//! timeout: 600
//!
//! success_criteria:
//!   require_all_success: false
//!   minimum_success_percent: 90
//!
//! variables:
//!   channel: stable
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::model::Variables;
use crate::engine::error::ConfigurationError;

/// Pass/fail policy applied to a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    #[serde(default = "default_require_all", alias = "requireAllSuccess")]
    pub require_all_success: bool,

    #[serde(default, alias = "minimumSuccessCount")]
    pub minimum_success_count: u32,

    #[serde(default = "default_success_percent", alias = "minimumSuccessPercent")]
    pub minimum_success_percent: f64,

    /// Job ids whose failures never fail the run
    #[serde(default, alias = "allowedFailures")]
    pub allowed_failures: Vec<String>,
}

fn default_require_all() -> bool {
    true
}

fn default_success_percent() -> f64 {
    100.0
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self {
            require_all_success: default_require_all(),
            minimum_success_count: 0,
            minimum_success_percent: default_success_percent(),
            allowed_failures: Vec::new(),
        }
    }
}

impl SuccessCriteria {
    pub fn is_allowed_failure(&self, job_id: &str) -> bool {
        self.allowed_failures.iter().any(|id| id == job_id)
    }
}

/// Per-playbook override; each present field replaces the default field whole
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteriaOverride {
    #[serde(default, alias = "requireAllSuccess")]
    pub require_all_success: Option<bool>,

    #[serde(default, alias = "minimumSuccessCount")]
    pub minimum_success_count: Option<u32>,

    #[serde(default, alias = "minimumSuccessPercent")]
    pub minimum_success_percent: Option<f64>,

    #[serde(default, alias = "allowedFailures")]
    pub allowed_failures: Option<Vec<String>>,
}

impl SuccessCriteriaOverride {
    pub fn apply(&self, defaults: &SuccessCriteria) -> SuccessCriteria {
        SuccessCriteria {
            require_all_success: self
                .require_all_success
                .unwrap_or(defaults.require_all_success),
            minimum_success_count: self
                .minimum_success_count
                .unwrap_or(defaults.minimum_success_count),
            minimum_success_percent: self
                .minimum_success_percent
                .unwrap_or(defaults.minimum_success_percent),
            allowed_failures: self
                .allowed_failures
                .clone()
                .unwrap_or_else(|| defaults.allowed_failures.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub fail_fast: bool,

    /// Where job ids are resolved to executables
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Where playbooks are looked up by name
    #[serde(default = "default_playbooks_dir")]
    pub playbooks_dir: PathBuf,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Root for captured stdout/stderr and artifacts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Per-instance timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Global default criteria, overridable per playbook
    #[serde(default)]
    pub success_criteria: SuccessCriteria,

    /// Variables applied to every run, below playbook and CLI values
    #[serde(default)]
    pub variables: Variables,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_playbooks_dir() -> PathBuf {
    PathBuf::from("playbooks")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".playbook-cache")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".playbook-output")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            fail_fast: false,
            scripts_dir: default_scripts_dir(),
            playbooks_dir: default_playbooks_dir(),
            cache_dir: default_cache_dir(),
            output_dir: default_output_dir(),
            timeout: None,
            success_criteria: SuccessCriteria::default(),
            variables: Variables::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Read {
            file: path.display().to_string(),
            error: e,
        })?;
        let config: EngineConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigurationError::Parse {
                file: path.display().to_string(),
                error: e,
            })?;
        if config.max_concurrency == 0 {
            return Err(ConfigurationError::Invalid(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}
