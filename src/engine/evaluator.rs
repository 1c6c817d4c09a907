//! Success evaluation
//!
//! Decides the verdict of a finished run from its counts. A missing or
//! unrunnable script fails the run outright, allow-listed or not. Otherwise
//! failures of allow-listed jobs are removed first and the first matching
//! rule wins:
//!
//! 1. `require_all_success`: success iff nothing failed
//! 2. fewer completed than `minimum_success_count`: failure
//! 3. more failed than completed: failure
//! 4. success iff the completed percentage reaches `minimum_success_percent`

use tracing::debug;

use super::result::RunResult;
use crate::playbook::SuccessCriteria;

/// Failed count after dropping allow-listed jobs
pub fn effective_failures(result: &RunResult, criteria: &SuccessCriteria) -> usize {
    result
        .records
        .iter()
        .filter(|r| r.is_failure())
        .filter(|r| !criteria.is_allowed_failure(r.instance.job_id()))
        .count()
}

pub fn success_percent(completed: usize, failed: usize) -> f64 {
    let attempted = completed + failed;
    if attempted == 0 {
        return 100.0;
    }
    completed as f64 * 100.0 / attempted as f64
}

pub fn evaluate(result: &RunResult, criteria: &SuccessCriteria) -> bool {
    let completed = result.completed_count;
    let failed = effective_failures(result, criteria);
    let configuration_failures = result
        .failed()
        .filter(|r| r.is_configuration_failure())
        .count();

    let verdict = if configuration_failures > 0 {
        false
    } else if criteria.require_all_success {
        failed == 0
    } else if (completed as u64) < u64::from(criteria.minimum_success_count) {
        false
    } else if failed > completed {
        false
    } else {
        success_percent(completed, failed) >= criteria.minimum_success_percent
    };

    debug!(completed, failed, configuration_failures, verdict, "Evaluated run");
    verdict
}
