//! Matrix expansion
//!
//! Expands a job's matrix dimensions into concrete job instances. Dimensions
//! are enumerated in lexical key order (the matrix is a `BTreeMap`) and values
//! in declared order, so the same job always yields the same instances in the
//! same order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::error::ConfigurationError;
use crate::playbook::{overlay, Job, Variables};

/// One concrete, matrix-resolved execution of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    pub job: Job,

    /// Resolved matrix values, empty when the job has no matrix
    pub combination: Variables,
}

impl JobInstance {
    pub fn new(job: Job, combination: Variables) -> Self {
        Self { job, combination }
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    /// Stable display key: `id` or `id[k=v,k2=v2]`
    pub fn key(&self) -> String {
        if self.combination.is_empty() {
            return self.job.id.clone();
        }
        format!("{}[{}]", self.job.id, self.combination_label())
    }

    /// `k=v,k2=v2` in key order
    pub fn combination_label(&self) -> String {
        self.combination
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `key()` with anything outside `[A-Za-z0-9._=-]` replaced, for use as a
    /// directory name
    pub fn path_key(&self) -> String {
        self.key()
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '=' => c,
                _ => '_',
            })
            .collect()
    }

    /// Inputs passed to the script: run variables, then job variables, then
    /// matrix values, later layers winning
    pub fn inputs(&self, run_variables: &Variables) -> Variables {
        overlay(&overlay(run_variables, &self.job.variables), &self.combination)
    }
}

impl fmt::Display for JobInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Expand a job into its instances (Cartesian product over its matrix)
pub fn expand(job: &Job) -> Result<Vec<JobInstance>, ConfigurationError> {
    let matrix = match &job.matrix {
        Some(m) if !m.is_empty() => m,
        _ => return Ok(vec![JobInstance::new(job.clone(), Variables::new())]),
    };

    let mut combinations: Vec<Variables> = vec![Variables::new()];
    for (dimension, values) in matrix {
        if values.is_empty() {
            return Err(ConfigurationError::EmptyMatrixDimension {
                job: job.id.clone(),
                dimension: dimension.clone(),
            });
        }

        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for partial in &combinations {
            for value in values {
                let mut combination = partial.clone();
                combination.insert(dimension.clone(), value.clone());
                next.push(combination);
            }
        }
        combinations = next;
    }

    Ok(combinations
        .into_iter()
        .map(|combination| JobInstance::new(job.clone(), combination))
        .collect())
}
