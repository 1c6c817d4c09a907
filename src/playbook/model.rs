//! Playbook, Stage and Job definitions
//!
//! The canonical model every playbook format is normalized into. Nothing in
//! the engine looks at the source format once a `Playbook` exists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::config::SuccessCriteria;
use super::loader::{normalize_job_id, validate};
use crate::engine::error::EngineError;

// ============================================================================
// Values
// ============================================================================

/// A variable or matrix value.
///
/// Deliberately a closed set so that fingerprints stay deterministic: maps and
/// nulls are rejected at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Named values, always iterated in key order.
pub type Variables = BTreeMap<String, Value>;

/// Matrix dimensions: name -> values to expand over.
pub type Matrix = BTreeMap<String, Vec<Value>>;

/// Overlay `overrides` on top of `base`, replacing whole entries.
pub fn overlay(base: &Variables, overrides: &Variables) -> Variables {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

// ============================================================================
// Playbook
// ============================================================================

/// Source format a playbook was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// Flat list of script references (deprecated)
    V1,
    /// Ordered stages of jobs
    V2,
    /// Job graph with `needs` and `strategy.matrix`
    V3,
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVersion::V1 => f.write_str("v1"),
            SchemaVersion::V2 => f.write_str("v2"),
            SchemaVersion::V3 => f.write_str("v3"),
        }
    }
}

/// A loaded, validated playbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Format the playbook was loaded from
    pub schema: SchemaVersion,

    /// Playbook-level variable defaults
    #[serde(default)]
    pub variables: Variables,

    pub stages: Vec<Stage>,

    /// Effective criteria (global defaults with playbook overrides applied)
    pub success_criteria: SuccessCriteria,

    #[serde(default)]
    pub expected_artifacts: Vec<String>,
}

impl Playbook {
    /// Ad-hoc playbook for an explicit job-id sequence, checked like a
    /// loaded v1 playbook: numeric ids are padded and duplicates rejected
    pub fn from_job_ids(
        name: &str,
        ids: &[String],
        success_criteria: SuccessCriteria,
    ) -> Result<Self, EngineError> {
        let playbook = Self {
            name: name.to_string(),
            description: None,
            schema: SchemaVersion::V1,
            variables: Variables::new(),
            stages: vec![Stage {
                name: "default".to_string(),
                jobs: ids.iter().map(|id| Job::new(normalize_job_id(id))).collect(),
            }],
            success_criteria,
            expected_artifacts: Vec::new(),
        };
        validate(&playbook)?;
        Ok(playbook)
    }

    /// All jobs in stage order
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.stages.iter().flat_map(|s| s.jobs.iter())
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs().find(|j| j.id == id)
    }

    pub fn job_count(&self) -> usize {
        self.stages.iter().map(|s| s.jobs.len()).sum()
    }

    /// Serialize as a job-graph (v3) playbook document
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        #[derive(Serialize)]
        struct Strategy<'a> {
            matrix: &'a Matrix,
        }

        #[derive(Serialize)]
        struct GraphJob<'a> {
            #[serde(skip_serializing_if = "<[String]>::is_empty")]
            needs: &'a [String],
            #[serde(skip_serializing_if = "Option::is_none")]
            strategy: Option<Strategy<'a>>,
            #[serde(skip_serializing_if = "Variables::is_empty")]
            variables: &'a Variables,
            #[serde(skip_serializing_if = "Option::is_none")]
            timeout: Option<u64>,
        }

        #[derive(Serialize)]
        struct Criteria<'a> {
            allowed_failures: &'a [String],
        }

        #[derive(Serialize)]
        struct GraphDocument<'a> {
            name: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            description: Option<&'a str>,
            #[serde(skip_serializing_if = "Variables::is_empty")]
            variables: &'a Variables,
            #[serde(skip_serializing_if = "<[String]>::is_empty")]
            expected_artifacts: &'a [String],
            #[serde(skip_serializing_if = "Option::is_none")]
            success_criteria: Option<Criteria<'a>>,
            jobs: BTreeMap<&'a str, GraphJob<'a>>,
        }

        let jobs = self
            .jobs()
            .map(|job| {
                (
                    job.id.as_str(),
                    GraphJob {
                        needs: &job.depends_on,
                        strategy: job.matrix.as_ref().map(|matrix| Strategy { matrix }),
                        variables: &job.variables,
                        timeout: job.timeout,
                    },
                )
            })
            .collect();

        serde_yaml::to_string(&GraphDocument {
            name: &self.name,
            description: self.description.as_deref(),
            variables: &self.variables,
            expected_artifacts: &self.expected_artifacts,
            success_criteria: (!self.success_criteria.allowed_failures.is_empty()).then(|| {
                Criteria {
                    allowed_failures: &self.success_criteria.allowed_failures,
                }
            }),
            jobs,
        })
    }
}

// ============================================================================
// Stage / Job
// ============================================================================

/// An ordered group of jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub jobs: Vec<Job>,
}

/// One reference to an automation script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Script identifier, e.g. `0042`
    pub id: String,

    #[serde(default)]
    pub variables: Variables,

    #[serde(default)]
    pub matrix: Option<Matrix>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Per-instance timeout in seconds, overriding the engine default
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            variables: Variables::new(),
            matrix: None,
            depends_on: Vec::new(),
            timeout: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_matrix(mut self, matrix: Matrix) -> Self {
        self.matrix = Some(matrix);
        self
    }

    pub fn with_variable(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    pub fn has_matrix(&self) -> bool {
        self.matrix.as_ref().is_some_and(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::ConfigurationError;

    #[test]
    fn test_value_deserialize_closed_set() {
        let vars: Variables = serde_yaml::from_str(
            r#"
flag: true
count: 3
ratio: 0.5
name: stable
archs: [x64, arm64]
"#,
        )
        .unwrap();

        assert_eq!(vars["flag"], Value::Bool(true));
        assert_eq!(vars["count"], Value::Integer(3));
        assert_eq!(vars["ratio"], Value::Float(0.5));
        assert_eq!(vars["name"], Value::String("stable".into()));
        assert_eq!(
            vars["archs"],
            Value::List(vec!["x64".into(), "arm64".into()])
        );
    }

    #[test]
    fn test_value_rejects_maps() {
        let result: Result<Variables, _> = serde_yaml::from_str("nested: {a: 1}");
        assert!(result.is_err());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::List(vec![1.into(), "b".into()]).to_string(), "1,b");
        assert_eq!(Value::Bool(false).to_string(), "false");
    }

    #[test]
    fn test_overlay_replaces_entries() {
        let mut base = Variables::new();
        base.insert("channel".into(), "stable".into());
        base.insert("region".into(), "eu".into());
        let mut overrides = Variables::new();
        overrides.insert("channel".into(), "beta".into());

        let merged = overlay(&base, &overrides);
        assert_eq!(merged["channel"], Value::from("beta"));
        assert_eq!(merged["region"], Value::from("eu"));
    }

    #[test]
    fn test_to_yaml_round_trips_through_graph_shape() {
        let playbook = Playbook {
            name: "graph".into(),
            description: None,
            schema: SchemaVersion::V2,
            variables: Variables::new(),
            stages: vec![Stage {
                name: "s".into(),
                jobs: vec![Job::new("a"), Job::new("b").depends_on(["a"])],
            }],
            success_criteria: SuccessCriteria::default(),
            expected_artifacts: vec![],
        };

        let yaml = playbook.to_yaml().unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert!(doc["jobs"].is_mapping());
        assert_eq!(doc["jobs"]["b"]["needs"][0].as_str(), Some("a"));
    }

    #[test]
    fn test_from_job_ids_pads_and_validates() {
        let ids = vec!["1".to_string(), "0002".to_string(), "deploy".to_string()];
        let playbook = Playbook::from_job_ids("adhoc", &ids, SuccessCriteria::default()).unwrap();
        let got: Vec<_> = playbook.jobs().map(|j| j.id.as_str()).collect();
        assert_eq!(got, vec!["0001", "0002", "deploy"]);

        let dup = vec!["0001".to_string(), "1".to_string()];
        assert!(matches!(
            Playbook::from_job_ids("adhoc", &dup, SuccessCriteria::default()),
            Err(EngineError::Configuration(ConfigurationError::DuplicateJob(id))) if id == "0001"
        ));
    }
}
