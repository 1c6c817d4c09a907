//! Playbook execution engine
//!
//! This module contains:
//! - `matrix` - Matrix expansion into job instances
//! - `scheduler` - Dependency graph, cycle detection and wave planning
//! - `cache` - Fingerprinted whole-run result cache
//! - `process` - Script resolution and child process execution
//! - `runner` - Bounded-concurrency wave runner
//! - `evaluator` - Success criteria evaluation
//! - `report` - Run report rendering
//! - `executor` - The `Engine` entry point
//! - `error` / `result` - Error and result types

pub mod cache;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod matrix;
pub mod process;
pub mod report;
pub mod result;
pub mod runner;
pub mod scheduler;

pub use cache::{CacheError, CacheMetadata, CacheStore, Fingerprint, FingerprintInputs};
pub use error::{ConfigurationError, EngineError, SchedulingError};
pub use evaluator::evaluate;
pub use executor::{Engine, Plan, RunOptions};
pub use matrix::{expand, JobInstance};
pub use process::{ExecuteError, ProcessExecutor, ScriptExecutor};
pub use report::Report;
pub use result::{Cause, ExecutionRecord, RunResult, Status};
pub use runner::{CancellationToken, WaveRunner};
pub use scheduler::{Schedule, Scheduler, Wave};
