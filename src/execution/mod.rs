//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod runner;
pub mod scheduler;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{StageExecutor, StageReport};
pub use runner::{environment_vars, ShellStepRunner, StepError, StepInvocation, StepRunner};
pub use scheduler::ExecutionScheduler;
