//! Version control of stage outputs

pub mod gate;
pub mod git;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub use gate::{CommitGate, CommitOutcome};
pub use git::GitCli;

/// Version-control errors
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("nothing to commit")]
    NothingToCommit,

    #[error("push rejected: {0}")]
    Rejected(String),

    #[error("{command} failed: {message}")]
    Command { command: String, message: String },
}

/// Operations the commit gate needs from a version-control system
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn stage(&self, paths: &[PathBuf]) -> Result<(), VcsError>;

    /// Commit staged changes; `NothingToCommit` when the index is clean
    async fn commit(&self, message: &str) -> Result<(), VcsError>;

    /// Rebase local commits onto the remote branch
    async fn pull_rebase(&self) -> Result<(), VcsError>;

    /// Push local commits; `Rejected` when the remote has moved on
    async fn push(&self) -> Result<(), VcsError>;
}
