//! CI workflow adapter
//!
//! Converts a CI-style job graph (`jobs`, `needs`, `strategy.matrix`, `steps`)
//! into a playbook. Each CI job becomes one orchestration job named by its
//! key; the steps inside it are not translated and are reported as needing
//! manual mapping onto a script. Jobs marked `continue-on-error: true` become
//! allowed failures.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use super::config::{SuccessCriteria, SuccessCriteriaOverride};
use super::loader::{parse_matrix, GraphJob, PlaybookHeader, PlaybookLoader, RawMatrix};
use super::model::{Playbook, Variables};
use crate::engine::error::{ConfigurationError, EngineError};

#[derive(Debug, Deserialize)]
struct WorkflowDocument {
    name: Option<String>,

    #[serde(default)]
    env: Variables,

    jobs: serde_yaml::Mapping,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WorkflowJob {
    #[serde(default)]
    needs: Needs,

    #[serde(default)]
    strategy: Option<WorkflowStrategy>,

    #[serde(default)]
    env: Variables,

    #[serde(default)]
    steps: Vec<serde_yaml::Value>,

    /// Reusable workflow reference
    #[serde(default)]
    uses: Option<String>,

    #[serde(default)]
    timeout_minutes: Option<u64>,

    /// `true`, `false` or an expression string
    #[serde(default)]
    continue_on_error: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Needs {
    One(String),
    Many(Vec<String>),
}

impl Default for Needs {
    fn default() -> Self {
        Needs::Many(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowStrategy {
    #[serde(default)]
    matrix: Option<serde_yaml::Value>,
}

/// Something the adapter could not translate automatically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingNote {
    pub job: String,
    pub message: String,
}

impl fmt::Display for MappingNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.job, self.message)
    }
}

#[derive(Debug)]
pub struct WorkflowConversion {
    pub playbook: Playbook,
    pub notes: Vec<MappingNote>,
}

pub struct WorkflowAdapter {
    loader: PlaybookLoader,
}

impl WorkflowAdapter {
    pub fn new() -> Self {
        Self {
            loader: PlaybookLoader::new(),
        }
    }

    pub fn with_defaults(defaults: SuccessCriteria) -> Self {
        Self {
            loader: PlaybookLoader::with_defaults(defaults),
        }
    }

    pub fn convert_file(&self, path: &Path) -> Result<Playbook, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Read {
            file: path.display().to_string(),
            error: e,
        })?;
        self.convert(&content, &path.display().to_string())
    }

    /// Convert a workflow document, logging anything left for manual mapping
    pub fn convert(&self, source: &str, origin: &str) -> Result<Playbook, EngineError> {
        let conversion = self.convert_detailed(source, origin)?;
        for note in &conversion.notes {
            warn!(job = %note.job, "{}", note.message);
        }
        Ok(conversion.playbook)
    }

    pub fn convert_detailed(
        &self,
        source: &str,
        origin: &str,
    ) -> Result<WorkflowConversion, EngineError> {
        let parse_err = |e| ConfigurationError::Parse {
            file: origin.to_string(),
            error: e,
        };
        let doc: WorkflowDocument = serde_yaml::from_str(source).map_err(parse_err)?;

        let mut notes = Vec::new();
        let mut allowed_failures = Vec::new();
        let mut jobs = Vec::with_capacity(doc.jobs.len());

        for (key, body) in doc.jobs {
            let id: String = serde_yaml::from_value(key).map_err(parse_err)?;
            let job: WorkflowJob = if body.is_null() {
                WorkflowJob::default()
            } else {
                serde_yaml::from_value(body).map_err(parse_err)?
            };

            if !job.steps.is_empty() {
                notes.push(MappingNote {
                    job: id.clone(),
                    message: format!(
                        "{} step(s) not translated; manual mapping required onto script '{}'",
                        job.steps.len(),
                        id
                    ),
                });
            }
            if let Some(uses) = &job.uses {
                notes.push(MappingNote {
                    job: id.clone(),
                    message: format!(
                        "reusable workflow '{}' not translated; manual mapping required",
                        uses
                    ),
                });
            }

            match &job.continue_on_error {
                None | Some(serde_yaml::Value::Bool(false)) => {}
                Some(serde_yaml::Value::Bool(true)) => allowed_failures.push(id.clone()),
                Some(other) => notes.push(MappingNote {
                    job: id.clone(),
                    message: format!(
                        "continue-on-error {:?} not translated; manual mapping required",
                        other
                    ),
                }),
            }

            let matrix = match job.strategy.and_then(|s| s.matrix) {
                None => None,
                Some(serde_yaml::Value::Mapping(map)) => {
                    let mut dimensions = RawMatrix::new();
                    for (name, values) in map {
                        let name: String = serde_yaml::from_value(name).map_err(parse_err)?;
                        if name == "include" || name == "exclude" {
                            notes.push(MappingNote {
                                job: id.clone(),
                                message: format!(
                                    "matrix '{}' entries dropped; manual mapping required",
                                    name
                                ),
                            });
                            continue;
                        }
                        dimensions.insert(name, values);
                    }
                    if dimensions.is_empty() {
                        None
                    } else {
                        Some(parse_matrix(&id, dimensions)?)
                    }
                }
                Some(other) => {
                    return Err(ConfigurationError::InvalidMatrix {
                        job: id,
                        dimension: "matrix".to_string(),
                        reason: format!("expected a mapping of dimensions, got {:?}", other),
                    }
                    .into())
                }
            };

            jobs.push(GraphJob {
                needs: match job.needs {
                    Needs::One(n) => vec![n],
                    Needs::Many(n) => n,
                },
                matrix,
                variables: job.env,
                timeout: job.timeout_minutes.map(|m| m * 60),
                id,
            });
        }

        let header = PlaybookHeader {
            name: doc.name.unwrap_or_else(|| {
                Path::new(origin)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(origin)
                    .to_string()
            }),
            description: None,
            variables: doc.env,
            success_criteria: if allowed_failures.is_empty() {
                None
            } else {
                let mut allowed = self.loader.defaults().allowed_failures.clone();
                allowed.extend(allowed_failures);
                Some(SuccessCriteriaOverride {
                    allowed_failures: Some(allowed),
                    ..SuccessCriteriaOverride::default()
                })
            },
            expected_artifacts: Vec::new(),
        };

        let playbook = self.loader.normalize_graph(header, jobs)?;
        Ok(WorkflowConversion { playbook, notes })
    }
}

impl Default for WorkflowAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::{SchemaVersion, Value};

    const WORKFLOW: &str = r#"
name: ci
env:
  RUST_LOG: info
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - run: cargo clippy
  test:
    needs: lint
    timeout-minutes: 10
    strategy:
      matrix:
        os: [ubuntu-latest, macos-latest]
        toolchain: [stable, nightly]
        include:
          - os: windows-latest
            toolchain: stable
    steps:
      - run: cargo test
  release:
    needs: [lint, test]
    uses: ./.github/workflows/release.yml
"#;

    #[test]
    fn test_convert_job_graph() {
        let conversion = WorkflowAdapter::new()
            .convert_detailed(WORKFLOW, "ci.yml")
            .unwrap();
        let playbook = conversion.playbook;

        assert_eq!(playbook.name, "ci");
        assert_eq!(playbook.schema, SchemaVersion::V3);
        assert_eq!(playbook.variables["RUST_LOG"], Value::from("info"));
        assert_eq!(playbook.stages.len(), 3);

        let test = playbook.job("test").unwrap();
        assert_eq!(test.depends_on, vec!["lint"]);
        assert_eq!(test.timeout, Some(600));
        let matrix = test.matrix.as_ref().unwrap();
        assert_eq!(matrix.len(), 2);
        assert!(!matrix.contains_key("include"));

        assert_eq!(playbook.job("release").unwrap().depends_on, vec!["lint", "test"]);
    }

    #[test]
    fn test_convert_reports_manual_mapping() {
        let conversion = WorkflowAdapter::new()
            .convert_detailed(WORKFLOW, "ci.yml")
            .unwrap();
        let messages: Vec<String> = conversion.notes.iter().map(|n| n.to_string()).collect();

        assert!(messages.iter().any(|m| m.starts_with("lint: 2 step(s)")));
        assert!(messages.iter().any(|m| m.contains("matrix 'include'")));
        assert!(messages.iter().any(|m| m.starts_with("release: reusable workflow")));
        assert!(messages.iter().all(|m| m.contains("manual mapping required")));
    }

    #[test]
    fn test_continue_on_error_becomes_allowed_failure() {
        let defaults = SuccessCriteria {
            allowed_failures: vec!["audit".into()],
            ..SuccessCriteria::default()
        };
        let conversion = WorkflowAdapter::with_defaults(defaults)
            .convert_detailed(
                r#"
jobs:
  build: {}
  docs:
    continue-on-error: true
  bench:
    continue-on-error: ${{ matrix.experimental }}
  lint:
    continue-on-error: false
"#,
                "ci.yml",
            )
            .unwrap();

        let criteria = &conversion.playbook.success_criteria;
        assert_eq!(criteria.allowed_failures, vec!["audit", "docs"]);
        assert!(criteria.require_all_success);
        assert!(conversion
            .notes
            .iter()
            .any(|n| n.job == "bench" && n.message.starts_with("continue-on-error")));

        let reloaded = PlaybookLoader::new()
            .load_str(&conversion.playbook.to_yaml().unwrap(), "ci-playbook.yaml")
            .unwrap();
        assert_eq!(reloaded.success_criteria.allowed_failures, vec!["audit", "docs"]);
    }

    #[test]
    fn test_expression_matrix_rejected() {
        let result = WorkflowAdapter::new().convert(
            r#"
jobs:
  build:
    strategy:
      matrix: ${{ fromJson(needs.setup.outputs.matrix) }}
    steps: []
"#,
            "ci.yml",
        );
        assert!(matches!(
            result,
            Err(EngineError::Configuration(ConfigurationError::InvalidMatrix { .. }))
        ));
    }

    #[test]
    fn test_missing_need_rejected() {
        let result = WorkflowAdapter::new().convert(
            "jobs:\n  deploy:\n    needs: build\n    steps: []\n",
            "ci.yml",
        );
        assert!(matches!(
            result,
            Err(EngineError::Configuration(ConfigurationError::MissingDependency { .. }))
        ));
    }
}
