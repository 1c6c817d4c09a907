//! Run cache
//!
//! Whole-run result cache keyed by a content fingerprint of the requested job
//! instances and the effective variables. Layout under the cache directory:
//!
//! ```text
//! results/<fp>.json        serialized execution records
//! artifacts/<fp>/<key>/    copied instance output directories
//! metadata/<fp>.json       fingerprint inputs, timestamp, engine version
//! ```
//!
//! The cache never fails a run: unreadable or corrupt entries are misses and
//! write failures are only logged.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::matrix::JobInstance;
use super::result::ExecutionRecord;
use crate::playbook::Variables;

const RESULTS: &str = "results";
const ARTIFACTS: &str = "artifacts";
const METADATA: &str = "metadata";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Fingerprint mismatch: stored entry is for {0}")]
    Mismatch(String),
}

/// Identity of one instance inside the fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub job: String,
    pub combination: Variables,
    pub variables: Variables,
}

impl From<&JobInstance> for InstanceIdentity {
    fn from(instance: &JobInstance) -> Self {
        Self {
            job: instance.job.id.clone(),
            combination: instance.combination.clone(),
            variables: instance.job.variables.clone(),
        }
    }
}

/// Everything the fingerprint is computed over, in canonical order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintInputs {
    pub instances: Vec<InstanceIdentity>,
    pub variables: Variables,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute<'a>(
        instances: impl IntoIterator<Item = &'a JobInstance>,
        variables: &Variables,
    ) -> Self {
        Self::from_inputs(&Self::inputs(instances, variables))
    }

    pub fn inputs<'a>(
        instances: impl IntoIterator<Item = &'a JobInstance>,
        variables: &Variables,
    ) -> FingerprintInputs {
        let mut identities: Vec<InstanceIdentity> =
            instances.into_iter().map(InstanceIdentity::from).collect();
        // Combination and variable maps are BTreeMaps, so their JSON is already
        // key-ordered; sort instances by that JSON for a total order.
        identities.sort_by_cached_key(|i| serde_json::to_string(i).unwrap_or_default());

        FingerprintInputs {
            instances: identities,
            variables: variables.clone(),
        }
    }

    pub fn from_inputs(inputs: &FingerprintInputs) -> Self {
        let canonical = serde_json::to_vec(inputs).unwrap_or_default();
        Self(hex::encode(Sha256::digest(&canonical)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Diagnostics stored beside each entry; never trusted for correctness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub fingerprint: String,
    pub playbook: String,
    pub inputs: FingerprintInputs,
    pub stored_at: DateTime<Utc>,
    pub engine_version: String,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn results_path(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(RESULTS).join(format!("{}.json", fp))
    }

    fn metadata_path(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(METADATA).join(format!("{}.json", fp))
    }

    fn artifacts_dir(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(ARTIFACTS).join(fp.as_str())
    }

    /// Records of a stored run, marked `Cached`; `None` on miss or any error
    pub fn lookup(&self, fp: &Fingerprint) -> Option<Vec<ExecutionRecord>> {
        match self.read_results(fp) {
            Ok(Some(records)) => {
                info!(fingerprint = %fp, instances = records.len(), "Cache hit");
                Some(
                    records
                        .into_iter()
                        .map(|r| {
                            let output = r.output_ref.clone().filter(|p| p.exists());
                            r.into_cached(output)
                        })
                        .collect(),
                )
            }
            Ok(None) => {
                debug!(fingerprint = %fp, "Cache miss");
                None
            }
            Err(e) => {
                debug!(fingerprint = %fp, error = %e, "Unreadable cache entry, treating as miss");
                None
            }
        }
    }

    fn read_results(&self, fp: &Fingerprint) -> Result<Option<Vec<ExecutionRecord>>, CacheError> {
        let path = self.results_path(fp);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let records: Vec<ExecutionRecord> = serde_json::from_str(&content)?;

        // The file name is the key, but a hand-copied entry could disagree
        let metadata = self.read_metadata(fp)?;
        let recomputed = Fingerprint::compute(
            records.iter().map(|r| &r.instance),
            &metadata.inputs.variables,
        );
        if recomputed != *fp {
            return Err(CacheError::Mismatch(recomputed.to_string()));
        }
        Ok(Some(records))
    }

    fn read_metadata(&self, fp: &Fingerprint) -> Result<CacheMetadata, CacheError> {
        let content = fs::read_to_string(self.metadata_path(fp))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Store a finished run; output directories are copied into `artifacts`
    pub fn store(
        &self,
        fp: &Fingerprint,
        playbook: &str,
        inputs: &FingerprintInputs,
        records: &[ExecutionRecord],
    ) -> Result<(), CacheError> {
        fs::create_dir_all(self.root.join(RESULTS))?;
        fs::create_dir_all(self.root.join(METADATA))?;
        let artifacts = self.artifacts_dir(fp);

        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let mut record = record.clone();
            if let Some(output) = record.output_ref.as_ref().filter(|p| p.is_dir()) {
                let target = artifacts.join(record.instance.path_key());
                copy_dir(output, &target)?;
                record.output_ref = Some(target);
            }
            stored.push(record);
        }

        let metadata = CacheMetadata {
            fingerprint: fp.to_string(),
            playbook: playbook.to_string(),
            inputs: inputs.clone(),
            stored_at: Utc::now(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        // Metadata last: an entry is only listed once its results are in place
        write_replace(&self.results_path(fp), &serde_json::to_vec_pretty(&stored)?)?;
        write_replace(&self.metadata_path(fp), &serde_json::to_vec_pretty(&metadata)?)?;

        debug!(fingerprint = %fp, records = stored.len(), "Stored run in cache");
        Ok(())
    }

    /// Metadata of every readable entry, newest first
    pub fn entries(&self) -> Vec<CacheMetadata> {
        let dir = self.root.join(METADATA);
        let Ok(read_dir) = fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut entries: Vec<CacheMetadata> = read_dir
            .filter_map(|e| e.ok())
            .filter_map(|e| fs::read_to_string(e.path()).ok())
            .filter_map(|content| serde_json::from_str(&content).ok())
            .collect();
        entries.sort_by(|a, b| b.stored_at.cmp(&a.stored_at));
        entries
    }

    /// Remove every namespace; returns the number of entries removed
    pub fn clear(&self) -> Result<usize, CacheError> {
        let count = self.entries().len();
        for namespace in [RESULTS, ARTIFACTS, METADATA] {
            let dir = self.root.join(namespace);
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
        }
        info!(root = %self.root.display(), removed = count, "Cleared cache");
        Ok(count)
    }
}

/// Write beside `path`, then rename over it
fn write_replace(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let path = entry.path();
        let target = to.join(entry.file_name());
        if path.is_dir() {
            copy_dir(&path, &target)?;
        } else {
            fs::copy(&path, &target)?;
        }
    }
    Ok(())
}
