//! Wave runner
//!
//! Executes a [`Schedule`] wave by wave. Inside a wave every instance is a
//! spawned task gated by a semaphore of `max_concurrency` permits; the next
//! wave starts only after every task of the current one has finished.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::matrix::JobInstance;
use super::process::ScriptExecutor;
use super::result::{Cause, ExecutionRecord, Status};
use super::scheduler::Schedule;
use crate::playbook::Variables;

/// Shared interrupt flag; once set no new instance starts
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct WaveRunner {
    executor: Arc<dyn ScriptExecutor>,
    output_root: PathBuf,
    max_concurrency: usize,
    fail_fast: bool,
    timeout: Option<Duration>,
    allowed_failures: Vec<String>,
    cancellation: CancellationToken,
}

impl WaveRunner {
    pub fn new(executor: Arc<dyn ScriptExecutor>, output_root: impl AsRef<Path>) -> Self {
        Self {
            executor,
            output_root: output_root.as_ref().to_path_buf(),
            max_concurrency: 4,
            fail_fast: false,
            timeout: None,
            allowed_failures: Vec::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    /// Default per-instance timeout; a job's own `timeout` takes precedence
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Jobs whose failures do not trigger fail-fast
    pub fn allowed_failures(mut self, jobs: Vec<String>) -> Self {
        self.allowed_failures = jobs;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Run every wave; returns one terminal record per instance in schedule
    /// order
    pub async fn run(&self, schedule: &Schedule, variables: &Variables) -> Vec<ExecutionRecord> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let variables = Arc::new(variables.clone());
        let mut records = Vec::with_capacity(schedule.instance_count());
        let mut halted = false;

        for wave in &schedule.waves {
            if halted {
                records.extend(wave.instances.iter().map(|i| {
                    let mut r = ExecutionRecord::pending(i.clone());
                    r.skip(Cause::FailFast);
                    r
                }));
                debug!(wave = wave.index, "Wave skipped (fail-fast)");
                continue;
            }

            info!(
                wave = wave.index,
                instances = wave.len(),
                jobs = ?wave.job_ids(),
                "Starting wave"
            );

            let handles: Vec<_> = wave
                .instances
                .iter()
                .map(|instance| {
                    let task = InstanceTask {
                        instance: instance.clone(),
                        executor: self.executor.clone(),
                        semaphore: semaphore.clone(),
                        variables: variables.clone(),
                        output_dir: self.output_root.join(instance.path_key()),
                        timeout: instance
                            .job
                            .timeout
                            .map(Duration::from_secs)
                            .or(self.timeout),
                        cancellation: self.cancellation.clone(),
                    };
                    tokio::spawn(task.run())
                })
                .collect();

            let finished = join_all(handles).await;
            let mut wave_failed = false;

            for (instance, joined) in wave.instances.iter().zip(finished) {
                let record = match joined {
                    Ok(record) => record,
                    Err(e) => {
                        let mut r = ExecutionRecord::pending(instance.clone());
                        r.fail(Cause::Internal(e.to_string()));
                        r
                    }
                };
                if record.status == Status::Failed
                    && !self.allowed_failures.iter().any(|j| j == instance.job_id())
                {
                    wave_failed = true;
                }
                records.push(record);
            }

            if wave_failed && self.fail_fast {
                warn!(wave = wave.index, "Wave failed, skipping remaining waves");
                halted = true;
            }
        }

        records
    }
}

struct InstanceTask {
    instance: JobInstance,
    executor: Arc<dyn ScriptExecutor>,
    semaphore: Arc<Semaphore>,
    variables: Arc<Variables>,
    output_dir: PathBuf,
    timeout: Option<Duration>,
    cancellation: CancellationToken,
}

impl InstanceTask {
    async fn run(self) -> ExecutionRecord {
        let mut record = ExecutionRecord::pending(self.instance.clone());

        let _permit = match self.semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                record.fail(Cause::Internal(e.to_string()));
                return record;
            }
        };

        if self.cancellation.is_cancelled() {
            record.skip(Cause::Cancelled);
            return record;
        }

        record.mark_running();
        let inputs = self.instance.inputs(&self.variables);
        let execution = self
            .executor
            .execute(&self.instance, &inputs, &self.output_dir);

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(instance = %self.instance, timeout_secs = limit.as_secs(), "Instance timed out");
                    record.output_ref = Some(self.output_dir.clone());
                    record.fail(Cause::Timeout);
                    return record;
                }
            },
            None => execution.await,
        };

        match outcome {
            Ok(code) => {
                record.finish(code, self.output_dir);
                if code == 0 {
                    info!(instance = %self.instance, "Instance succeeded");
                } else {
                    warn!(instance = %self.instance, exit_code = code, "Instance failed");
                }
            }
            Err(e) if e.is_configuration() => {
                warn!(instance = %self.instance, error = %e, "Instance misconfigured");
                record.fail(Cause::Configuration(e.to_string()));
            }
            Err(e) => {
                warn!(instance = %self.instance, error = %e, "Instance could not run");
                record.fail(Cause::Internal(e.to_string()));
            }
        }

        record
    }
}
