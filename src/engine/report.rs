//! Run report
//!
//! [`Report::render`] turns a [`RunResult`] into a report value. It does no
//! I/O: `Display` gives the text printed by the CLI and `Serialize` gives the
//! structured JSON form.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::evaluator::success_percent;
use super::result::{ExecutionRecord, RunResult, Status};
use crate::playbook::{SuccessCriteria, Variables};

#[derive(Debug, Clone, Serialize)]
pub struct Totals {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cached: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceLine {
    pub combination: String,
    /// Outcome of the instance; for replays, the status it was stored with
    pub status: Status,
    pub cached: bool,
}

/// Per-job view of a matrixed job's instances
#[derive(Debug, Clone, Serialize)]
pub struct MatrixBreakdown {
    pub job: String,
    pub instances: Vec<InstanceLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureDetail {
    pub instance: String,
    pub job: String,
    pub combination: Variables,
    pub exit_code: Option<i32>,
    pub cause: String,
    pub output: Option<PathBuf>,

    /// Listed in `allowed_failures`, so excluded from the verdict
    pub allowed: bool,
}

impl FailureDetail {
    fn from_record(record: &ExecutionRecord, criteria: &SuccessCriteria) -> Self {
        Self {
            instance: record.instance.key(),
            job: record.instance.job_id().to_string(),
            combination: record.instance.combination.clone(),
            exit_code: record.exit_code,
            cause: record
                .cause
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            output: record.output_ref.clone(),
            allowed: criteria.is_allowed_failure(record.instance.job_id()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: String,
    pub playbook: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub fingerprint: Option<String>,
    pub cache_hit: bool,
    pub totals: Totals,
    pub variables: Variables,
    pub matrix: Vec<MatrixBreakdown>,
    pub failures: Vec<FailureDetail>,
    pub configuration_failures: Vec<FailureDetail>,
    pub skipped: Vec<String>,
}

impl Report {
    pub fn render(result: &RunResult, criteria: &SuccessCriteria) -> Self {
        let mut matrix: BTreeMap<String, Vec<InstanceLine>> = BTreeMap::new();
        for record in &result.records {
            if !record.instance.combination.is_empty() {
                matrix
                    .entry(record.instance.job_id().to_string())
                    .or_default()
                    .push(InstanceLine {
                        combination: record.instance.combination_label(),
                        status: record.outcome(),
                        cached: record.status == Status::Cached,
                    });
            }
        }

        let (configuration_failures, failures): (Vec<_>, Vec<_>) = result
            .failed()
            .partition(|r| r.is_configuration_failure());

        Self {
            run_id: result.run_id.clone(),
            playbook: result.playbook_name.clone(),
            success: result.overall_success,
            started_at: result.started_at,
            duration_ms: result.duration_ms(),
            fingerprint: result.fingerprint.clone(),
            cache_hit: result.cache_hit,
            totals: Totals {
                total: result.total(),
                completed: result.completed_count,
                failed: result.failed_count,
                skipped: result.skipped_count,
                cached: result.cached_count,
                success_rate: success_percent(result.completed_count, result.failed_count),
            },
            variables: result.variables.clone(),
            matrix: matrix
                .into_iter()
                .map(|(job, instances)| MatrixBreakdown { job, instances })
                .collect(),
            failures: failures
                .into_iter()
                .map(|r| FailureDetail::from_record(r, criteria))
                .collect(),
            configuration_failures: configuration_failures
                .into_iter()
                .map(|r| FailureDetail::from_record(r, criteria))
                .collect(),
            skipped: result
                .records
                .iter()
                .filter(|r| r.outcome() == Status::Skipped)
                .map(|r| r.instance.key())
                .collect(),
        }
    }

    /// One line: verdict and counts
    pub fn summary_line(&self) -> String {
        format!(
            "{} {}: {} total, {} completed, {} failed, {} skipped, {} cached ({:.1}%)",
            if self.success { "PASS" } else { "FAIL" },
            self.playbook,
            self.totals.total,
            self.totals.completed,
            self.totals.failed,
            self.totals.skipped,
            self.totals.cached,
            self.totals.success_rate,
        )
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Results ===")?;
        writeln!(f)?;
        writeln!(f, "Playbook: {}", self.playbook)?;
        writeln!(f, "Run ID:   {}", self.run_id)?;
        writeln!(f, "Overall:  {}", if self.success { "PASS" } else { "FAIL" })?;
        writeln!(f, "Duration: {:.2}s", self.duration_ms as f64 / 1000.0)?;
        if let Some(fp) = &self.fingerprint {
            let hit = if self.cache_hit { " (cache hit)" } else { "" };
            writeln!(f, "Cache:    {}{}", fp, hit)?;
        }

        writeln!(f)?;
        writeln!(
            f,
            "Total: {}  Completed: {}  Failed: {}  Skipped: {}  Cached: {}  Success rate: {:.1}%",
            self.totals.total,
            self.totals.completed,
            self.totals.failed,
            self.totals.skipped,
            self.totals.cached,
            self.totals.success_rate
        )?;

        if !self.variables.is_empty() {
            writeln!(f)?;
            writeln!(f, "Variables:")?;
            for (key, value) in &self.variables {
                writeln!(f, "  {} = {}", key, value)?;
            }
        }

        if !self.matrix.is_empty() {
            writeln!(f)?;
            writeln!(f, "Matrix:")?;
            for breakdown in &self.matrix {
                writeln!(f, "  {}", breakdown.job)?;
                for line in &breakdown.instances {
                    let cached = if line.cached { ", cached" } else { "" };
                    writeln!(
                        f,
                        "    {} {} ({}{})",
                        mark(line.status),
                        line.combination,
                        line.status,
                        cached
                    )?;
                }
            }
        }

        if !self.failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "Failures:")?;
            for failure in &self.failures {
                write_failure(f, failure)?;
            }
        }

        if !self.configuration_failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "Configuration failures:")?;
            for failure in &self.configuration_failures {
                write_failure(f, failure)?;
            }
        }

        if !self.skipped.is_empty() {
            writeln!(f)?;
            writeln!(f, "Skipped: {}", self.skipped.join(", "))?;
        }

        Ok(())
    }
}

fn mark(status: Status) -> &'static str {
    match status {
        Status::Succeeded | Status::Cached => "✓",
        Status::Failed => "✗",
        _ => "-",
    }
}

fn write_failure(f: &mut fmt::Formatter<'_>, failure: &FailureDetail) -> fmt::Result {
    let allowed = if failure.allowed { " [allowed]" } else { "" };
    writeln!(f, "  ✗ {}: {}{}", failure.instance, failure.cause, allowed)?;
    if let Some(output) = &failure.output {
        writeln!(f, "      output: {}", output.display())?;
    }
    Ok(())
}
