//! Stage-level error taxonomy

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Class of a stage failure, used to look up its severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Environment provisioning failed
    SetupFailure,
    /// Artifact pull or push failed
    SyncFailure,
    /// A stage payload command failed or timed out
    StepFailure,
    /// Version-control push was rejected and retries were exhausted
    CommitConflict,
    /// The working tree had nothing new to commit
    NothingToCommit,
    /// Listing or deleting models in the remote store failed
    RetentionFailure,
    /// The deployed service never reported healthy
    StartupTimeout,
    /// The post-deployment request against the service failed
    ValidationFailure,
}

impl ErrorClass {
    pub const ALL: [ErrorClass; 8] = [
        ErrorClass::SetupFailure,
        ErrorClass::SyncFailure,
        ErrorClass::StepFailure,
        ErrorClass::CommitConflict,
        ErrorClass::NothingToCommit,
        ErrorClass::RetentionFailure,
        ErrorClass::StartupTimeout,
        ErrorClass::ValidationFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::SetupFailure => "setup_failure",
            ErrorClass::SyncFailure => "sync_failure",
            ErrorClass::StepFailure => "step_failure",
            ErrorClass::CommitConflict => "commit_conflict",
            ErrorClass::NothingToCommit => "nothing_to_commit",
            ErrorClass::RetentionFailure => "retention_failure",
            ErrorClass::StartupTimeout => "startup_timeout",
            ErrorClass::ValidationFailure => "validation_failure",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised while executing a stage
///
/// Every variant maps to exactly one [`ErrorClass`]. Diagnostics captured
/// from external processes are kept verbatim for post-mortem use.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("environment '{profile}' could not be provisioned: {message}")]
    SetupFailure { profile: String, message: String },

    #[error("artifact '{artifact}' sync failed: {message}")]
    SyncFailure { artifact: String, message: String },

    #[error("step '{step}' failed: {message}")]
    StepFailure {
        step: String,
        message: String,
        output: Option<String>,
    },

    #[error("commit for '{artifact}' was not pushed: {reason}")]
    CommitConflict { artifact: String, reason: String },

    #[error("nothing to commit for '{artifact}'")]
    NothingToCommit { artifact: String },

    #[error("retention for '{family}' failed: {message}")]
    RetentionFailure { family: String, message: String },

    #[error("service did not become healthy: {message}")]
    StartupTimeout { message: String, diagnostics: String },

    #[error("deployment validation failed: {message}")]
    ValidationFailure {
        message: String,
        diagnostics: Option<String>,
    },
}

impl PipelineError {
    /// The class used to look up this error's severity
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::SetupFailure { .. } => ErrorClass::SetupFailure,
            PipelineError::SyncFailure { .. } => ErrorClass::SyncFailure,
            PipelineError::StepFailure { .. } => ErrorClass::StepFailure,
            PipelineError::CommitConflict { .. } => ErrorClass::CommitConflict,
            PipelineError::NothingToCommit { .. } => ErrorClass::NothingToCommit,
            PipelineError::RetentionFailure { .. } => ErrorClass::RetentionFailure,
            PipelineError::StartupTimeout { .. } => ErrorClass::StartupTimeout,
            PipelineError::ValidationFailure { .. } => ErrorClass::ValidationFailure,
        }
    }

    /// Captured process output attached to the error, if any
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            PipelineError::StepFailure { output, .. } => output.as_deref(),
            PipelineError::StartupTimeout { diagnostics, .. } => Some(diagnostics.as_str()),
            PipelineError::ValidationFailure { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }

    /// Whether absorbing this error should mark the run as degraded
    ///
    /// A clean no-op is not a degradation; a skipped audit-trail push is.
    pub fn degrades_run(&self) -> bool {
        !matches!(self, PipelineError::NothingToCommit { .. })
    }
}
