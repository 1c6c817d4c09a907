//! Playbook loader
//!
//! Probes the structure of a playbook document, dispatches to the parser for
//! its schema version and normalizes every version into one [`Playbook`].
//!
//! ```yaml
//! # v1 (deprecated): flat list of script references
//! scripts: ["0001", "0002"]
//!
//! # v2: ordered stages
//! stages:
//!   - name: install
//!     jobs: ["0001", { id: "0002", matrix: { arch: [x64, arm64] } }]
//!
//! # v3: job graph
//! jobs:
//!   "0001": {}
//!   "0002": { needs: ["0001"], strategy: { matrix: { os: [linux, mac] } } }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use super::config::{SuccessCriteria, SuccessCriteriaOverride};
use super::model::{Job, Matrix, Playbook, SchemaVersion, Stage, Value, Variables};
use crate::engine::error::{ConfigurationError, EngineError, SchedulingError};
use crate::engine::scheduler::find_cycle;

const PLAYBOOK_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

// ============================================================================
// Raw document shapes
// ============================================================================

/// A job reference as written; YAML reads `0042` as the integer 42.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawJobId {
    Text(String),
    Number(u64),
}

impl From<RawJobId> for String {
    fn from(raw: RawJobId) -> Self {
        match raw {
            RawJobId::Text(s) => s,
            RawJobId::Number(n) => format!("{:04}", n),
        }
    }
}

/// Zero-pad an all-digit id to four places: `7` -> `0007`
pub fn normalize_job_id(id: &str) -> String {
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        format!("{:0>4}", id)
    } else {
        id.to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNeeds {
    One(RawJobId),
    Many(Vec<RawJobId>),
}

impl Default for RawNeeds {
    fn default() -> Self {
        RawNeeds::Many(Vec::new())
    }
}

impl From<RawNeeds> for Vec<String> {
    fn from(raw: RawNeeds) -> Self {
        match raw {
            RawNeeds::One(id) => vec![id.into()],
            RawNeeds::Many(ids) => ids.into_iter().map(Into::into).collect(),
        }
    }
}

pub(crate) type RawMatrix = BTreeMap<String, serde_yaml::Value>;

/// Fields shared by every versioned document
#[derive(Debug, Default, Deserialize)]
struct RawHeader {
    name: Option<String>,

    #[serde(default)]
    description: Option<String>,

    #[serde(default)]
    variables: Variables,

    #[serde(default, alias = "successCriteria")]
    success_criteria: Option<SuccessCriteriaOverride>,

    #[serde(default, alias = "expectedArtifacts")]
    expected_artifacts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyDocument {
    #[serde(flatten)]
    header: RawHeader,

    #[serde(alias = "jobs")]
    scripts: Vec<RawJobId>,
}

#[derive(Debug, Deserialize)]
struct StagedDocument {
    #[serde(flatten)]
    header: RawHeader,

    stages: Vec<RawStage>,
}

#[derive(Debug, Deserialize)]
struct RawStage {
    name: Option<String>,

    #[serde(default, alias = "scripts")]
    jobs: Vec<RawStageJob>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStageJob {
    Ref(RawJobId),
    Full(RawJob),
}

#[derive(Debug, Deserialize)]
struct RawJob {
    id: RawJobId,

    #[serde(default)]
    variables: Variables,

    #[serde(default)]
    matrix: Option<RawMatrix>,

    #[serde(default, alias = "needs", alias = "dependsOn")]
    depends_on: RawNeeds,

    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GraphDocument {
    #[serde(flatten)]
    header: RawHeader,

    jobs: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
struct RawGraphJob {
    #[serde(default, alias = "depends_on", alias = "dependsOn")]
    needs: RawNeeds,

    #[serde(default)]
    strategy: Option<RawStrategy>,

    #[serde(default)]
    variables: Variables,

    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawStrategy {
    #[serde(default)]
    matrix: Option<RawMatrix>,
}

// ============================================================================
// Normalization inputs shared with the workflow adapter
// ============================================================================

/// Playbook-level fields after parsing
#[derive(Debug, Default)]
pub(crate) struct PlaybookHeader {
    pub name: String,
    pub description: Option<String>,
    pub variables: Variables,
    pub success_criteria: Option<SuccessCriteriaOverride>,
    pub expected_artifacts: Vec<String>,
}

impl PlaybookHeader {
    fn from_raw(raw: RawHeader, origin: &str) -> Self {
        Self {
            name: raw.name.unwrap_or_else(|| default_name(origin)),
            description: raw.description,
            variables: raw.variables,
            success_criteria: raw.success_criteria,
            expected_artifacts: raw.expected_artifacts,
        }
    }
}

/// One node of a job graph, before grouping into stages
#[derive(Debug, Clone)]
pub(crate) struct GraphJob {
    pub id: String,
    pub needs: Vec<String>,
    pub matrix: Option<Matrix>,
    pub variables: Variables,
    pub timeout: Option<u64>,
}

fn default_name(origin: &str) -> String {
    Path::new(origin)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(origin)
        .to_string()
}

/// Validate raw matrix dimensions into typed values
pub(crate) fn parse_matrix(job: &str, raw: RawMatrix) -> Result<Matrix, ConfigurationError> {
    let mut matrix = Matrix::new();
    for (dimension, values) in raw {
        let serde_yaml::Value::Sequence(items) = values else {
            return Err(ConfigurationError::InvalidMatrix {
                job: job.to_string(),
                dimension,
                reason: "expected a list of values".to_string(),
            });
        };
        if items.is_empty() {
            return Err(ConfigurationError::EmptyMatrixDimension {
                job: job.to_string(),
                dimension,
            });
        }
        let mut typed = Vec::with_capacity(items.len());
        for item in items {
            let value: Value =
                serde_yaml::from_value(item).map_err(|e| ConfigurationError::InvalidMatrix {
                    job: job.to_string(),
                    dimension: dimension.clone(),
                    reason: e.to_string(),
                })?;
            typed.push(value);
        }
        matrix.insert(dimension, typed);
    }
    Ok(matrix)
}

fn parse_optional_matrix(
    job: &str,
    raw: Option<RawMatrix>,
) -> Result<Option<Matrix>, ConfigurationError> {
    match raw {
        Some(raw) if !raw.is_empty() => parse_matrix(job, raw).map(Some),
        _ => Ok(None),
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Detect the schema version of a parsed document by its structure
pub fn detect_schema(document: &serde_yaml::Value) -> Option<SchemaVersion> {
    match document {
        serde_yaml::Value::Sequence(_) => Some(SchemaVersion::V1),
        serde_yaml::Value::Mapping(map) => {
            if map.get("stages").is_some_and(|v| v.is_sequence()) {
                return Some(SchemaVersion::V2);
            }
            if map.get("scripts").is_some_and(|v| v.is_sequence())
                || map.get("jobs").is_some_and(|v| v.is_sequence())
            {
                return Some(SchemaVersion::V1);
            }
            if map.get("jobs").is_some_and(|v| v.is_mapping()) {
                return Some(SchemaVersion::V3);
            }
            None
        }
        _ => None,
    }
}

pub struct PlaybookLoader {
    defaults: SuccessCriteria,
}

impl PlaybookLoader {
    pub fn new() -> Self {
        Self::with_defaults(SuccessCriteria::default())
    }

    /// Loader resolving playbook overrides against the given global criteria
    pub fn with_defaults(defaults: SuccessCriteria) -> Self {
        Self { defaults }
    }

    /// Global criteria that playbook-level overrides are applied to
    pub fn defaults(&self) -> &SuccessCriteria {
        &self.defaults
    }

    pub fn load_file(&self, path: &Path) -> Result<Playbook, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Read {
            file: path.display().to_string(),
            error: e,
        })?;
        self.load_str(&content, &path.display().to_string())
    }

    /// Load every playbook file in a directory, sorted by file name
    pub fn load_directory(&self, dir: &Path) -> Result<Vec<Playbook>, EngineError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && has_playbook_extension(&path) {
                // engine.yaml lives next to playbooks in small setups
                if path.file_stem().and_then(|s| s.to_str()) == Some("engine") {
                    continue;
                }
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|p| self.load_file(p)).collect()
    }

    /// Load by path, or by name from `playbooks_dir`
    pub fn resolve(&self, reference: &str, playbooks_dir: &Path) -> Result<Playbook, EngineError> {
        let direct = PathBuf::from(reference);
        if direct.is_file() {
            return self.load_file(&direct);
        }

        for ext in PLAYBOOK_EXTENSIONS {
            let candidate = playbooks_dir.join(format!("{}.{}", reference, ext));
            if candidate.is_file() {
                debug!(path = %candidate.display(), "Resolved playbook by name");
                return self.load_file(&candidate);
            }
        }

        Err(ConfigurationError::PlaybookNotFound(reference.to_string()).into())
    }

    /// Parse and normalize a playbook document; `origin` names it in errors
    pub fn load_str(&self, content: &str, origin: &str) -> Result<Playbook, EngineError> {
        let parse_err = |e| ConfigurationError::Parse {
            file: origin.to_string(),
            error: e,
        };

        let document: serde_yaml::Value = serde_yaml::from_str(content).map_err(parse_err)?;
        let schema = detect_schema(&document)
            .ok_or_else(|| ConfigurationError::UnrecognizedFormat(origin.to_string()))?;
        debug!(origin, %schema, "Detected playbook schema");

        match schema {
            SchemaVersion::V1 => {
                warn!(
                    origin,
                    "Legacy v1 playbook format is deprecated; convert it to stages or a job graph"
                );
                let (header, ids) = if document.is_sequence() {
                    let ids: Vec<RawJobId> =
                        serde_yaml::from_value(document).map_err(parse_err)?;
                    (RawHeader::default(), ids)
                } else {
                    let doc: LegacyDocument =
                        serde_yaml::from_value(document).map_err(parse_err)?;
                    (doc.header, doc.scripts)
                };
                let stage = Stage {
                    name: "default".to_string(),
                    jobs: ids.into_iter().map(|id| Job::new(String::from(id))).collect(),
                };
                self.finish(
                    PlaybookHeader::from_raw(header, origin),
                    SchemaVersion::V1,
                    vec![stage],
                )
            }
            SchemaVersion::V2 => {
                let doc: StagedDocument = serde_yaml::from_value(document).map_err(parse_err)?;
                let mut stages = Vec::with_capacity(doc.stages.len());
                for (index, raw_stage) in doc.stages.into_iter().enumerate() {
                    let mut jobs = Vec::with_capacity(raw_stage.jobs.len());
                    for raw_job in raw_stage.jobs {
                        jobs.push(match raw_job {
                            RawStageJob::Ref(id) => Job::new(String::from(id)),
                            RawStageJob::Full(raw) => {
                                let id = String::from(raw.id);
                                let matrix = parse_optional_matrix(&id, raw.matrix)?;
                                Job {
                                    variables: raw.variables,
                                    matrix,
                                    depends_on: raw.depends_on.into(),
                                    timeout: raw.timeout,
                                    id,
                                }
                            }
                        });
                    }
                    stages.push(Stage {
                        name: raw_stage
                            .name
                            .unwrap_or_else(|| format!("stage-{}", index + 1)),
                        jobs,
                    });
                }
                self.finish(
                    PlaybookHeader::from_raw(doc.header, origin),
                    SchemaVersion::V2,
                    stages,
                )
            }
            SchemaVersion::V3 => {
                let doc: GraphDocument = serde_yaml::from_value(document).map_err(parse_err)?;
                let mut jobs = Vec::with_capacity(doc.jobs.len());
                for (key, body) in doc.jobs {
                    let id: String = serde_yaml::from_value::<RawJobId>(key)
                        .map_err(parse_err)?
                        .into();
                    let raw: RawGraphJob = if body.is_null() {
                        RawGraphJob {
                            needs: RawNeeds::default(),
                            strategy: None,
                            variables: Variables::new(),
                            timeout: None,
                        }
                    } else {
                        serde_yaml::from_value(body).map_err(parse_err)?
                    };
                    let matrix =
                        parse_optional_matrix(&id, raw.strategy.and_then(|s| s.matrix))?;
                    jobs.push(GraphJob {
                        needs: raw.needs.into(),
                        matrix,
                        variables: raw.variables,
                        timeout: raw.timeout,
                        id,
                    });
                }
                self.normalize_graph(PlaybookHeader::from_raw(doc.header, origin), jobs)
            }
        }
    }

    /// Group a job graph into stages by topological depth
    pub(crate) fn normalize_graph(
        &self,
        header: PlaybookHeader,
        jobs: Vec<GraphJob>,
    ) -> Result<Playbook, EngineError> {
        let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for job in &jobs {
            if graph.insert(job.id.clone(), job.needs.clone()).is_some() {
                return Err(ConfigurationError::DuplicateJob(job.id.clone()).into());
            }
        }
        for job in &jobs {
            for dep in &job.needs {
                if !graph.contains_key(dep) {
                    return Err(ConfigurationError::MissingDependency {
                        job: job.id.clone(),
                        dependency: dep.clone(),
                    }
                    .into());
                }
            }
        }
        if let Some(path) = find_cycle(&graph) {
            return Err(SchedulingError::Cycle { path }.into());
        }

        let mut depths: HashMap<String, usize> = HashMap::new();
        for id in graph.keys() {
            depth_of(id, &graph, &mut depths);
        }

        let max_depth = depths.values().copied().max().unwrap_or(0);
        let mut stages: Vec<Stage> = (0..=max_depth)
            .map(|d| Stage {
                name: format!("depth-{}", d),
                jobs: Vec::new(),
            })
            .collect();

        for job in jobs {
            let depth = depths.get(&job.id).copied().unwrap_or(0);
            stages[depth].jobs.push(Job {
                variables: job.variables,
                matrix: job.matrix,
                depends_on: job.needs,
                timeout: job.timeout,
                id: job.id,
            });
        }
        stages.retain(|s| !s.jobs.is_empty());

        self.finish(header, SchemaVersion::V3, stages)
    }

    fn finish(
        &self,
        header: PlaybookHeader,
        schema: SchemaVersion,
        stages: Vec<Stage>,
    ) -> Result<Playbook, EngineError> {
        let success_criteria = match &header.success_criteria {
            Some(over) => over.apply(&self.defaults),
            None => self.defaults.clone(),
        };

        let playbook = Playbook {
            name: header.name,
            description: header.description,
            schema,
            variables: header.variables,
            stages,
            success_criteria,
            expected_artifacts: header.expected_artifacts,
        };
        validate(&playbook)?;
        Ok(playbook)
    }
}

impl Default for PlaybookLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn has_playbook_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| PLAYBOOK_EXTENSIONS.contains(&e))
}

fn depth_of(id: &str, graph: &BTreeMap<String, Vec<String>>, memo: &mut HashMap<String, usize>) -> usize {
    if let Some(&d) = memo.get(id) {
        return d;
    }
    let depth = graph
        .get(id)
        .map(|needs| {
            needs
                .iter()
                .map(|dep| depth_of(dep, graph, memo) + 1)
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    memo.insert(id.to_string(), depth);
    depth
}

/// Reference checks run on every playbook before it is handed out
pub fn validate(playbook: &Playbook) -> Result<(), EngineError> {
    let mut stage_of: HashMap<&str, usize> = HashMap::new();
    let mut seen = HashSet::new();
    for (index, stage) in playbook.stages.iter().enumerate() {
        for job in &stage.jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(ConfigurationError::DuplicateJob(job.id.clone()).into());
            }
            stage_of.insert(job.id.as_str(), index);
        }
    }

    for (index, stage) in playbook.stages.iter().enumerate() {
        for job in &stage.jobs {
            for dep in &job.depends_on {
                match stage_of.get(dep.as_str()) {
                    None => {
                        return Err(ConfigurationError::MissingDependency {
                            job: job.id.clone(),
                            dependency: dep.clone(),
                        }
                        .into())
                    }
                    Some(&dep_stage) if dep_stage > index => {
                        return Err(ConfigurationError::ForwardDependency {
                            job: job.id.clone(),
                            dependency: dep.clone(),
                        }
                        .into())
                    }
                    Some(_) => {}
                }
            }
            if let Some(matrix) = &job.matrix {
                for (dimension, values) in matrix {
                    if values.is_empty() {
                        return Err(ConfigurationError::EmptyMatrixDimension {
                            job: job.id.clone(),
                            dimension: dimension.clone(),
                        }
                        .into());
                    }
                }
            }
        }
    }

    let graph: BTreeMap<String, Vec<String>> = playbook
        .jobs()
        .map(|j| (j.id.clone(), j.depends_on.clone()))
        .collect();
    if let Some(path) = find_cycle(&graph) {
        return Err(SchedulingError::Cycle { path }.into());
    }

    Ok(())
}
