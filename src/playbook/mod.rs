//! Playbook types and loading
//!
//! This module contains everything needed to turn a playbook or CI workflow
//! document into the canonical model:
//! - `model` - Playbook, Stage, Job and variable values
//! - `config` - Engine configuration and success criteria
//! - `loader` - Versioned playbook loading and validation
//! - `adapter` - CI workflow conversion

pub mod adapter;
pub mod config;
pub mod loader;
pub mod model;

pub use adapter::{MappingNote, WorkflowAdapter, WorkflowConversion};
pub use config::{EngineConfig, SuccessCriteria, SuccessCriteriaOverride};
pub use loader::{detect_schema, validate, PlaybookLoader};
pub use model::{overlay, Job, Matrix, Playbook, SchemaVersion, Stage, Value, Variables};
