//! Playbook engine
//!
//! Entry point tying the pieces together: schedule, fingerprint, optional
//! cache replay, wave execution, evaluation and cache store.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::cache::{CacheStore, Fingerprint, FingerprintInputs};
use super::error::{ConfigurationError, EngineError};
use super::evaluator::evaluate;
use super::process::{ProcessExecutor, ScriptExecutor};
use super::result::RunResult;
use super::runner::{CancellationToken, WaveRunner};
use super::scheduler::{Schedule, Scheduler};
use crate::playbook::{overlay, EngineConfig, Playbook, SuccessCriteria, Variables};

/// Per-run overrides on top of [`EngineConfig`]
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub use_cache: bool,
    pub fail_fast: Option<bool>,
    pub max_concurrency: Option<usize>,

    /// Seconds; overrides the configured default but not per-job values
    pub timeout: Option<u64>,

    /// Highest-precedence variables (CLI `--var`)
    pub variables: Variables,

    pub cancellation: CancellationToken,
}

/// What a run would do, computed without executing anything
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub playbook: String,
    pub schedule: Schedule,
    pub variables: Variables,
    pub fingerprint: Fingerprint,
    pub inputs: FingerprintInputs,
    pub criteria: SuccessCriteria,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Plan for {}: {} instance(s) in {} wave(s)",
            self.playbook,
            self.schedule.instance_count(),
            self.schedule.len()
        )?;
        for wave in &self.schedule.waves {
            let keys: Vec<String> = wave.instances.iter().map(|i| i.key()).collect();
            writeln!(f, "  Wave {}: [{}]", wave.index, keys.join(", "))?;
        }
        write!(f, "Fingerprint: {}", self.fingerprint)
    }
}

pub struct Engine {
    config: EngineConfig,
    executor: Arc<dyn ScriptExecutor>,
}

impl Engine {
    /// Engine running scripts from `config.scripts_dir`
    pub fn new(config: EngineConfig) -> Self {
        let executor = Arc::new(ProcessExecutor::new(&config.scripts_dir));
        Self { config, executor }
    }

    pub fn with_executor(config: EngineConfig, executor: Arc<dyn ScriptExecutor>) -> Self {
        Self { config, executor }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> CacheStore {
        CacheStore::new(&self.config.cache_dir)
    }

    /// Config variables, then playbook variables, then run overrides
    pub fn effective_variables(&self, playbook: &Playbook, options: &RunOptions) -> Variables {
        overlay(
            &overlay(&self.config.variables, &playbook.variables),
            &options.variables,
        )
    }

    /// Schedule, fingerprint and check that every job has a runnable script
    pub fn plan(&self, playbook: &Playbook, options: &RunOptions) -> Result<Plan, EngineError> {
        let schedule = Scheduler::schedule(playbook)?;
        for wave in &schedule.waves {
            for job_id in wave.job_ids() {
                self.executor.check(job_id).map_err(|e| ConfigurationError::MissingScript {
                    job: job_id.to_string(),
                    reason: e.to_string(),
                })?;
            }
        }
        let variables = self.effective_variables(playbook, options);
        let inputs = Fingerprint::inputs(schedule.instances(), &variables);
        let fingerprint = Fingerprint::from_inputs(&inputs);

        debug!(
            playbook = %playbook.name,
            waves = schedule.len(),
            instances = schedule.instance_count(),
            fingerprint = %fingerprint,
            "Planned run"
        );

        Ok(Plan {
            playbook: playbook.name.clone(),
            schedule,
            variables,
            fingerprint,
            inputs,
            criteria: playbook.success_criteria.clone(),
        })
    }

    #[instrument(skip(self, playbook, options), fields(playbook = %playbook.name))]
    pub async fn run(
        &self,
        playbook: &Playbook,
        options: &RunOptions,
    ) -> Result<RunResult, EngineError> {
        let plan = self.plan(playbook, options)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let cache = self.cache();

        if options.use_cache {
            if let Some(records) = cache.lookup(&plan.fingerprint) {
                let mut result = RunResult::assemble(
                    run_id,
                    &plan.playbook,
                    started_at,
                    records,
                    plan.variables,
                    Some(plan.fingerprint.to_string()),
                );
                result.overall_success = evaluate(&result, &plan.criteria);
                info!(run_id = %result.run_id, "Replayed run from cache");
                return Ok(result);
            }
        }

        info!(
            run_id = %run_id,
            instances = plan.schedule.instance_count(),
            waves = plan.schedule.len(),
            "Starting run"
        );

        let runner = WaveRunner::new(
            self.executor.clone(),
            self.config.output_dir.join(&run_id),
        )
        .max_concurrency(options.max_concurrency.unwrap_or(self.config.max_concurrency))
        .fail_fast(options.fail_fast.unwrap_or(self.config.fail_fast))
        .timeout(
            options
                .timeout
                .or(self.config.timeout)
                .map(Duration::from_secs),
        )
        .allowed_failures(plan.criteria.allowed_failures.clone())
        .cancellation(options.cancellation.clone());

        let records = runner.run(&plan.schedule, &plan.variables).await;

        let mut result = RunResult::assemble(
            run_id,
            &plan.playbook,
            started_at,
            records,
            plan.variables.clone(),
            Some(plan.fingerprint.to_string()),
        );

        let cancelled = options.cancellation.is_cancelled();
        result.overall_success = !cancelled && evaluate(&result, &plan.criteria);
        if cancelled {
            warn!(run_id = %result.run_id, "Run cancelled");
        }

        if options.use_cache && result.overall_success {
            if let Err(e) = cache.store(
                &plan.fingerprint,
                &plan.playbook,
                &plan.inputs,
                &result.records,
            ) {
                debug!(error = %e, "Failed to store run in cache");
            }
        }

        info!(
            run_id = %result.run_id,
            success = result.overall_success,
            completed = result.completed_count,
            failed = result.failed_count,
            skipped = result.skipped_count,
            "Run finished"
        );
        Ok(result)
    }
}
