//! Dependency and stage scheduler
//!
//! Builds the job dependency graph of a playbook and peels it into waves:
//! wave 0 holds every job with no dependency, wave N+1 every job whose
//! dependencies all sit in waves 0..=N. Each job is then expanded into its
//! matrix instances, all of which share the job's wave. A dependency on a
//! matrixed job therefore waits for every one of its instances.
//!
//! Jobs without an explicit dependency keep the historical sequential-stage
//! behaviour: they implicitly depend on every job of the nearest earlier
//! non-empty stage.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use super::error::{EngineError, SchedulingError};
use super::matrix::{expand, JobInstance};
use crate::playbook::Playbook;

/// Instances that may start concurrently
#[derive(Debug, Clone, Serialize)]
pub struct Wave {
    pub index: usize,
    pub instances: Vec<JobInstance>,
}

impl Wave {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn job_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.instances.iter().map(|i| i.job_id()).collect();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub waves: Vec<Wave>,

    /// Effective job-level dependencies, implicit stage edges included
    pub dependencies: BTreeMap<String, Vec<String>>,
}

impl Schedule {
    pub fn instance_count(&self) -> usize {
        self.waves.iter().map(Wave::len).sum()
    }

    pub fn instances(&self) -> impl Iterator<Item = &JobInstance> {
        self.waves.iter().flat_map(|w| w.instances.iter())
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

pub struct Scheduler;

impl Scheduler {
    pub fn schedule(playbook: &Playbook) -> Result<Schedule, EngineError> {
        let dependencies = Self::effective_dependencies(playbook);

        for (job, deps) in &dependencies {
            for dep in deps {
                if !dependencies.contains_key(dep) {
                    return Err(SchedulingError::UnresolvedReference {
                        job: job.clone(),
                        dependency: dep.clone(),
                    }
                    .into());
                }
            }
        }

        if let Some(path) = find_cycle(&dependencies) {
            return Err(SchedulingError::Cycle { path }.into());
        }

        let levels = compute_levels(&dependencies);

        let mut waves = Vec::with_capacity(levels.len());
        for (index, level) in levels.into_iter().enumerate() {
            let mut instances = Vec::new();
            for id in level {
                if let Some(job) = playbook.job(&id) {
                    instances.extend(expand(job)?);
                }
            }
            debug!(wave = index, instances = instances.len(), "Scheduled wave");
            waves.push(Wave { index, instances });
        }

        Ok(Schedule {
            waves,
            dependencies,
        })
    }

    fn effective_dependencies(playbook: &Playbook) -> BTreeMap<String, Vec<String>> {
        let mut dependencies = BTreeMap::new();
        let mut previous_stage: Vec<String> = Vec::new();

        for stage in &playbook.stages {
            for job in &stage.jobs {
                let deps = if job.depends_on.is_empty() {
                    previous_stage.clone()
                } else {
                    job.depends_on.clone()
                };
                dependencies.insert(job.id.clone(), deps);
            }
            if !stage.jobs.is_empty() {
                previous_stage = stage.jobs.iter().map(|j| j.id.clone()).collect();
            }
        }

        dependencies
    }
}

/// Kahn peeling over an acyclic graph; each level sorted by id
fn compute_levels(graph: &BTreeMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (name, deps) in graph {
        in_degree.entry(name.as_str()).or_insert(0);
        for dep in deps {
            *in_degree.entry(name.as_str()).or_insert(0) += 1;
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(name.as_str());
        }
    }

    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut current_level: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();
    current_level.sort();

    while !current_level.is_empty() {
        let mut next_level = Vec::new();
        for name in &current_level {
            if let Some(deps) = dependents.get(name) {
                for &dep in deps {
                    if let Some(degree) = in_degree.get_mut(dep) {
                        *degree -= 1;
                        if *degree == 0 {
                            next_level.push(dep);
                        }
                    }
                }
            }
        }
        levels.push(current_level.iter().map(|s| s.to_string()).collect());
        next_level.sort();
        current_level = next_level;
    }

    levels
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    White,
    Grey,
    Black,
}

/// Three-colour DFS; returns the first cycle found as `[a, b, ..., a]`.
///
/// Edges point from a job to its dependencies. References to unknown ids are
/// ignored here and reported by the callers.
pub fn find_cycle(graph: &BTreeMap<String, Vec<String>>) -> Option<Vec<String>> {
    fn visit<'a>(
        node: &'a str,
        graph: &'a BTreeMap<String, Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::Grey);
        path.push(node);

        if let Some(deps) = graph.get(node) {
            for dep in deps {
                let dep = dep.as_str();
                match marks.get(dep).copied().unwrap_or(Mark::White) {
                    Mark::Grey => {
                        let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dep.to_string());
                        return Some(cycle);
                    }
                    Mark::White if graph.contains_key(dep) => {
                        if let Some(cycle) = visit(dep, graph, marks, path) {
                            return Some(cycle);
                        }
                    }
                    _ => {}
                }
            }
        }

        path.pop();
        marks.insert(node, Mark::Black);
        None
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for node in graph.keys() {
        if marks.get(node.as_str()).copied().unwrap_or(Mark::White) == Mark::White {
            let mut path = Vec::new();
            if let Some(cycle) = visit(node, graph, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}
