//! Script collaborator
//!
//! Each job id maps to an external script. The runner only sees the
//! [`ScriptExecutor`] trait; [`ProcessExecutor`] is the host implementation
//! that resolves a script file and runs it as a child process.
//!
//! Resolution for job `ID`, first match wins:
//! - a file in the scripts directory named `ID`, or `ID` followed by `-`, `_`
//!   or `.` and anything else (sorted by file name)
//! - an executable named `ID` on `PATH`
//!
//! Inputs are passed as environment variables and stdout/stderr land in
//! `stdout.log` / `stderr.log` inside the instance output directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use super::matrix::JobInstance;
use crate::playbook::Variables;

pub const STDOUT_LOG: &str = "stdout.log";
pub const STDERR_LOG: &str = "stderr.log";

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("No script found for job '{job}' in {dir} or on PATH")]
    NotFound { job: String, dir: String },

    #[error("Script is not executable: {0}")]
    NotExecutable(String),

    #[error("Failed to start {path}: {error}")]
    Spawn {
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecuteError {
    /// Missing or unusable script, as opposed to a host failure
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotExecutable(_))
    }
}

#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Run one instance to completion and return its exit code.
    ///
    /// Dropping the returned future must stop the underlying work; the runner
    /// relies on that for timeouts.
    async fn execute(
        &self,
        instance: &JobInstance,
        inputs: &Variables,
        output_dir: &Path,
    ) -> Result<i32, ExecuteError>;

    /// Confirm the script for `job_id` exists and can be started, without
    /// running it. Called for every scheduled job before a run.
    fn check(&self, _job_id: &str) -> Result<(), ExecuteError> {
        Ok(())
    }
}

/// How a resolved script is launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Bash(PathBuf),
    Python(PathBuf),
    Direct(PathBuf),
}

impl Invocation {
    fn for_path(path: PathBuf) -> Result<Self, ExecuteError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("sh") | Some("bash") => Ok(Invocation::Bash(path)),
            Some("py") => Ok(Invocation::Python(path)),
            _ if is_executable(&path) => Ok(Invocation::Direct(path)),
            _ => Err(ExecuteError::NotExecutable(path.display().to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Invocation::Bash(p) | Invocation::Python(p) | Invocation::Direct(p) => p,
        }
    }

    fn command(&self) -> Command {
        match self {
            Invocation::Bash(p) => {
                let mut cmd = Command::new("bash");
                cmd.arg(p);
                cmd
            }
            Invocation::Python(p) => {
                let mut cmd = Command::new("python3");
                cmd.arg(p);
                cmd
            }
            Invocation::Direct(p) => Command::new(p),
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Environment variable name for an input key: `buildMode` -> `BUILD_MODE`
pub fn env_name(key: &str) -> String {
    let mut name = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            name.push('_');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_uppercase());
        } else {
            name.push('_');
        }
    }
    name
}

pub struct ProcessExecutor {
    scripts_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn new(scripts_dir: impl AsRef<Path>) -> Self {
        Self {
            scripts_dir: scripts_dir.as_ref().to_path_buf(),
        }
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Locate the script for a job id
    pub fn resolve(&self, job_id: &str) -> Result<Invocation, ExecuteError> {
        let pattern = Regex::new(&format!(r"^{}(?:[-_.].*)?$", regex::escape(job_id)))
            .map_err(|e| ExecuteError::NotExecutable(e.to_string()))?;

        if let Ok(entries) = fs::read_dir(&self.scripts_dir) {
            let mut candidates: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| pattern.is_match(n))
                        .unwrap_or(false)
                })
                .collect();
            candidates.sort();

            if let Some(path) = candidates.into_iter().next() {
                return Invocation::for_path(path);
            }
        }

        match which::which(job_id) {
            Ok(path) => Ok(Invocation::Direct(path)),
            Err(_) => Err(ExecuteError::NotFound {
                job: job_id.to_string(),
                dir: self.scripts_dir.display().to_string(),
            }),
        }
    }
}

#[async_trait]
impl ScriptExecutor for ProcessExecutor {
    async fn execute(
        &self,
        instance: &JobInstance,
        inputs: &Variables,
        output_dir: &Path,
    ) -> Result<i32, ExecuteError> {
        let invocation = self.resolve(instance.job_id())?;
        tokio::fs::create_dir_all(output_dir).await?;

        let stdout = tokio::fs::File::create(output_dir.join(STDOUT_LOG))
            .await?
            .into_std()
            .await;
        let stderr = tokio::fs::File::create(output_dir.join(STDERR_LOG))
            .await?
            .into_std()
            .await;

        let mut cmd = invocation.command();
        for (key, value) in inputs {
            cmd.env(env_name(key), value.to_string());
        }
        cmd.env("PLAYBOOK_JOB_ID", instance.job_id())
            .env("PLAYBOOK_INSTANCE", instance.key())
            .env("PLAYBOOK_OUTPUT_DIR", output_dir)
            .env(
                "PLAYBOOK_INPUTS",
                serde_json::to_string(inputs).unwrap_or_default(),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        info!(instance = %instance, script = %invocation.path().display(), "Starting script");

        let mut child = cmd.spawn().map_err(|e| ExecuteError::Spawn {
            path: invocation.path().display().to_string(),
            error: e,
        })?;
        let status = child.wait().await?;

        // Killed by a signal reports no code
        let code = status.code().unwrap_or(-1);
        debug!(instance = %instance, exit_code = code, "Script exited");
        Ok(code)
    }

    fn check(&self, job_id: &str) -> Result<(), ExecuteError> {
        self.resolve(job_id).map(|_| ())
    }
}
