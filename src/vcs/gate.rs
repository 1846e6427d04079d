//! Commit gate: record an artifact's metadata and push it

use crate::core::ArtifactRef;
use crate::vcs::{VcsError, VersionControl};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`CommitGate::commit_and_push`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A commit was created and pushed
    Committed { push_attempts: u32 },
    /// The metadata was unchanged, nothing was committed
    Noop,
    /// The change could not be recorded remotely
    Failed { reason: String },
}

/// Stages, commits and pushes version-control metadata for artifacts
#[derive(Clone)]
pub struct CommitGate {
    vcs: Arc<dyn VersionControl>,
    max_push_retries: u32,
}

impl CommitGate {
    pub fn new(vcs: Arc<dyn VersionControl>, max_push_retries: u32) -> Self {
        Self {
            vcs,
            max_push_retries,
        }
    }

    pub async fn commit_and_push(&self, artifact: &ArtifactRef, message: &str) -> CommitOutcome {
        let metadata = artifact.metadata_path();
        debug!("Staging {} for {}", metadata.display(), artifact.name);

        if let Err(e) = self.vcs.stage(&[metadata]).await {
            return CommitOutcome::Failed {
                reason: format!("stage failed: {}", e),
            };
        }

        match self.vcs.commit(message).await {
            Ok(()) => {}
            Err(VcsError::NothingToCommit) => {
                info!("{} unchanged, nothing to commit", artifact.name);
                return CommitOutcome::Noop;
            }
            Err(e) => {
                return CommitOutcome::Failed {
                    reason: format!("commit failed: {}", e),
                }
            }
        }

        let mut attempts = 1;
        loop {
            match self.vcs.push().await {
                Ok(()) => {
                    info!("Committed and pushed {} ({} push attempts)", artifact.name, attempts);
                    return CommitOutcome::Committed {
                        push_attempts: attempts,
                    };
                }
                Err(VcsError::Rejected(detail)) => {
                    if attempts > self.max_push_retries {
                        return CommitOutcome::Failed {
                            reason: format!(
                                "push rejected after {} attempts: {}",
                                attempts, detail
                            ),
                        };
                    }
                    warn!(
                        "Push of {} rejected, rebasing onto remote (attempt {})",
                        artifact.name, attempts
                    );
                    if let Err(e) = self.vcs.pull_rebase().await {
                        return CommitOutcome::Failed {
                            reason: format!("rebase failed: {}", e),
                        };
                    }
                    attempts += 1;
                }
                Err(e) => {
                    return CommitOutcome::Failed {
                        reason: format!("push failed: {}", e),
                    }
                }
            }
        }
    }
}
