//! Engine error types

use std::fmt;

/// Malformed or ambiguous input. Always fatal, raised before execution.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Cannot read {file}: {error}")]
    Read {
        file: String,
        error: std::io::Error,
    },

    #[error("Parse error in {file}: {error}")]
    Parse {
        file: String,
        error: serde_yaml::Error,
    },

    #[error("Unrecognized playbook format in {0}: expected a script list, `stages` or a `jobs` map")]
    UnrecognizedFormat(String),

    #[error("Duplicate job id: {0}")]
    DuplicateJob(String),

    #[error("Job '{job}' depends on non-existent job '{dependency}'")]
    MissingDependency { job: String, dependency: String },

    #[error("Job '{job}' depends on '{dependency}', which is declared in a later stage")]
    ForwardDependency { job: String, dependency: String },

    #[error("Job '{job}' has an empty matrix dimension '{dimension}'")]
    EmptyMatrixDimension { job: String, dimension: String },

    #[error("Job '{job}' has an invalid matrix dimension '{dimension}': {reason}")]
    InvalidMatrix {
        job: String,
        dimension: String,
        reason: String,
    },

    #[error("Job '{job}' cannot be run: {reason}")]
    MissingScript { job: String, reason: String },

    #[error("Playbook not found: {0}")]
    PlaybookNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Dependency graph problems. Fatal, raised before execution.
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("Circular dependency detected: {}", CyclePath(.path))]
    Cycle { path: Vec<String> },

    #[error("Job '{job}' references unknown job '{dependency}'")]
    UnresolvedReference { job: String, dependency: String },
}

struct CyclePath<'a>(&'a [String]);

impl fmt::Display for CyclePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" -> "))
    }
}

/// Anything that aborts a run before or outside per-instance execution
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_shows_path() {
        let err = SchedulingError::Cycle {
            path: vec!["A".into(), "B".into(), "C".into(), "A".into()],
        };
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: A -> B -> C -> A"
        );
    }
}
