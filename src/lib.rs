//! # Playbook Engine
//!
//! An automation orchestration engine: declarative playbooks name jobs, each job
//! maps to an external script, and the engine runs them in dependency order
//! with bounded parallelism.
//!
//! ## Features
//!
//! - **Three playbook formats** - flat job lists, sequential stages, and job graphs
//! - **Matrix expansion** - one job fans out into every combination of its dimensions
//! - **Dependency waves** - explicit `depends_on` plus implicit stage ordering
//! - **Result cache** - identical runs replay from a fingerprinted cache
//! - **Success criteria** - all-or-nothing, minimum counts, percentages, allow-lists
//! - **CI workflow import** - convert a CI job graph into a playbook
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use playbook_engine::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let playbook = PlaybookLoader::new().load_str(
//!         r#"
//! name: smoke
//! jobs:
//!   setup: {}
//!   api:
//!     needs: setup
//!     strategy:
//!       matrix:
//!         region: [eu, us]
//! "#,
//!         "smoke.yaml",
//!     )?;
//!
//!     let engine = Engine::new(EngineConfig::default());
//!     let result = engine.run(&playbook, &RunOptions::default()).await?;
//!
//!     println!("{}", Report::render(&result, &playbook.success_criteria));
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod playbook;

pub use engine::{
    evaluate, CacheStore, CancellationToken, Cause, ConfigurationError, Engine, EngineError,
    ExecuteError, ExecutionRecord, Fingerprint, JobInstance, Plan, ProcessExecutor, Report,
    RunOptions, RunResult, Schedule, Scheduler, SchedulingError, ScriptExecutor, Status,
    WaveRunner,
};
pub use playbook::{
    EngineConfig, Job, Playbook, PlaybookLoader, SchemaVersion, Stage, SuccessCriteria, Value,
    Variables, WorkflowAdapter,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::{
        CacheStore, CancellationToken, Engine, EngineError, Plan, Report, RunOptions, RunResult,
        Status,
    };
    pub use crate::playbook::{
        EngineConfig, Playbook, PlaybookLoader, SuccessCriteria, Value, Variables,
        WorkflowAdapter,
    };
}
