//! Execution result types

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::matrix::JobInstance;
use crate::playbook::Variables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cached,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Pending | Status::Running)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
            Status::Cached => "cached",
        };
        f.write_str(s)
    }
}

/// Why an instance failed or was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Cause {
    /// Nonzero exit from the script
    Exit(i32),
    Timeout,
    /// Script missing or not executable
    Configuration(String),
    /// Operator interrupt before the instance started
    Cancelled,
    /// An earlier wave failed with fail-fast enabled
    FailFast,
    Internal(String),
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Exit(code) => write!(f, "exited with code {}", code),
            Cause::Timeout => f.write_str("timed out"),
            Cause::Configuration(msg) => write!(f, "configuration error: {}", msg),
            Cause::Cancelled => f.write_str("cancelled"),
            Cause::FailFast => f.write_str("skipped after earlier failure (fail-fast)"),
            Cause::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

/// Outcome of one job instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub instance: JobInstance,
    pub status: Status,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cache_hit: bool,

    /// Directory with captured stdout/stderr and artifacts
    pub output_ref: Option<PathBuf>,

    #[serde(default)]
    pub cause: Option<Cause>,

    /// Status of the original execution when this record is a cache replay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replayed_from: Option<Status>,
}

impl ExecutionRecord {
    pub fn pending(instance: JobInstance) -> Self {
        Self {
            instance,
            status: Status::Pending,
            exit_code: None,
            started_at: None,
            ended_at: None,
            cache_hit: false,
            output_ref: None,
            cause: None,
            replayed_from: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = Status::Running;
        self.started_at = Some(Utc::now());
    }

    /// Classify a finished process by exit code
    pub fn finish(&mut self, exit_code: i32, output_ref: PathBuf) {
        self.exit_code = Some(exit_code);
        self.output_ref = Some(output_ref);
        self.ended_at = Some(Utc::now());
        if exit_code == 0 {
            self.status = Status::Succeeded;
        } else {
            self.status = Status::Failed;
            self.cause = Some(Cause::Exit(exit_code));
        }
    }

    pub fn fail(&mut self, cause: Cause) {
        self.status = Status::Failed;
        self.cause = Some(cause);
        self.ended_at = Some(Utc::now());
    }

    pub fn skip(&mut self, cause: Cause) {
        self.status = Status::Skipped;
        self.cause = Some(cause);
    }

    /// Replay of a previously stored record; exit code and cause are kept
    pub fn into_cached(mut self, output_ref: Option<PathBuf>) -> Self {
        self.replayed_from = Some(self.outcome());
        self.status = Status::Cached;
        self.cache_hit = true;
        self.output_ref = output_ref;
        self
    }

    /// Status the instance actually ended with, looking through replays
    pub fn outcome(&self) -> Status {
        self.replayed_from.unwrap_or(self.status)
    }

    pub fn is_failure(&self) -> bool {
        self.outcome() == Status::Failed
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    pub fn is_configuration_failure(&self) -> bool {
        matches!(self.cause, Some(Cause::Configuration(_)))
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub playbook_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub records: Vec<ExecutionRecord>,

    /// Succeeded instances, replayed successes included
    pub completed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub cached_count: usize,

    pub overall_success: bool,

    /// Effective run-level variables
    pub variables: Variables,
    pub fingerprint: Option<String>,
    pub cache_hit: bool,
}

impl RunResult {
    /// Assemble a result from terminal records; `overall_success` is filled
    /// in by the caller after evaluation
    pub fn assemble(
        run_id: String,
        playbook_name: &str,
        started_at: DateTime<Utc>,
        records: Vec<ExecutionRecord>,
        variables: Variables,
        fingerprint: Option<String>,
    ) -> Self {
        let count = |status: Status| records.iter().filter(|r| r.outcome() == status).count();
        let completed_count = count(Status::Succeeded);
        let failed_count = count(Status::Failed);
        let skipped_count = count(Status::Skipped);
        let cached = records.iter().filter(|r| r.status == Status::Cached).count();
        let cache_hit = !records.is_empty() && cached == records.len();

        Self {
            run_id,
            playbook_name: playbook_name.to_string(),
            started_at,
            ended_at: Utc::now(),
            completed_count,
            failed_count,
            skipped_count,
            cached_count: cached,
            overall_success: false,
            records,
            variables,
            fingerprint,
            cache_hit,
        }
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    /// Failed instances, replayed failures included
    pub fn failed(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter().filter(|r| r.is_failure())
    }

    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}
