//! forecast-pipeline - orchestrates the daily forecasting workflow
//!
//! Stages run in declared order inside provisioned environments, exchange
//! artifacts through a remote store, record outputs in version control, prune
//! old models and gate a short-lived deployment behind a health check.

pub mod cli;
pub mod core;
pub mod deploy;
pub mod environment;
pub mod execution;
pub mod persistence;
pub mod retention;
pub mod shell;
pub mod store;
pub mod sync;
pub mod vcs;

// Re-export commonly used types
pub use core::{
    ArtifactRef, ErrorClass, Pipeline, PipelineError, PipelineRun, RunContext, RunStatus,
    Severity, SeverityTable, Stage, StageResult, StageStatus,
};
pub use execution::{ExecutionEngine, ExecutionEvent, StageExecutor};
