//! DVC command-line adapter

use crate::core::{ArtifactRef, SecretEnv};
use crate::shell::{CommandOutput, ShellCommand};
use crate::sync::{ArtifactStore, SyncError};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// dvc wording for data absent from both the cache and the remote
static MISSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(does not exist neither locally nor on remote|missing cache files)")
        .expect("missing-data pattern is valid")
});

/// Transport and credential failures; these never mean the data is absent
static TRANSPORT_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(failed to transfer|could not connect|connection (refused|reset|aborted)|timed out|unable to locate credentials|access denied|forbidden|ssl)",
    )
    .expect("transport-failure pattern is valid")
});

/// Artifact store driving the `dvc` binary in a working tree
///
/// Pulls run `dvc pull <metadata>`; pushes run `dvc add <local>` followed by
/// `dvc push <metadata>`, so the `.dvc` file is up to date for the commit gate.
#[derive(Debug, Clone)]
pub struct DvcArtifactStore {
    workdir: PathBuf,
    remote: Option<String>,
    secrets: SecretEnv,
    timeout_secs: u64,
}

impl DvcArtifactStore {
    pub fn new(workdir: impl AsRef<Path>) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            remote: None,
            secrets: SecretEnv::default(),
            timeout_secs: 1800,
        }
    }

    /// Use a named DVC remote instead of the default one
    pub fn with_remote(mut self, remote: Option<String>) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_secrets(mut self, secrets: SecretEnv) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    async fn dvc(&self, artifact: &ArtifactRef, args: &[String]) -> Result<CommandOutput, SyncError> {
        let mut command = ShellCommand::program("dvc")
            .args(args.iter().cloned())
            .current_dir(&self.workdir)
            .secrets(&self.secrets)
            .timeout_secs(self.timeout_secs);
        if let Some(remote) = &self.remote {
            if matches!(args.first().map(String::as_str), Some("pull" | "push")) {
                command = command.arg("-r").arg(remote.clone());
            }
        }

        debug!("dvc {}", args.join(" "));
        command.output().await.map_err(|e| SyncError::Transient {
            artifact: artifact.name.clone(),
            message: e.to_string(),
        })
    }
}

/// Whether dvc output says the artifact is absent from the remote
///
/// `failed to pull data from the cloud` follows any failed download, so only
/// explicit absence counts, and never alongside a transport failure.
fn is_missing(output: &CommandOutput) -> bool {
    let text = format!("{}\n{}", output.stderr, output.stdout);
    MISSING.is_match(&text) && !TRANSPORT_FAILURE.is_match(&text)
}

#[async_trait]
impl ArtifactStore for DvcArtifactStore {
    async fn pull(&self, artifact: &ArtifactRef) -> Result<(), SyncError> {
        let metadata = artifact.metadata_path();
        if !self.workdir.join(&metadata).exists() {
            // Never tracked, so there is nothing to fetch
            return Err(SyncError::NotFound(metadata.display().to_string()));
        }

        let args = vec!["pull".to_string(), metadata.display().to_string()];
        let output = self.dvc(artifact, &args).await?;
        if output.success() {
            return Ok(());
        }

        if is_missing(&output) {
            Err(SyncError::NotFound(artifact.remote_key.clone()))
        } else {
            Err(SyncError::Transient {
                artifact: artifact.name.clone(),
                message: output.tail(20),
            })
        }
    }

    async fn push(&self, artifact: &ArtifactRef) -> Result<(), SyncError> {
        if !self.workdir.join(&artifact.local_path).exists() {
            return Err(SyncError::Local {
                path: artifact.local_path.display().to_string(),
                message: "output was not produced".to_string(),
            });
        }

        let add = vec!["add".to_string(), artifact.local_path.display().to_string()];
        let output = self.dvc(artifact, &add).await?;
        if !output.success() {
            return Err(SyncError::Transient {
                artifact: artifact.name.clone(),
                message: output.tail(20),
            });
        }

        let push = vec!["push".to_string(), artifact.metadata_path().display().to_string()];
        let output = self.dvc(artifact, &push).await?;
        if !output.success() {
            return Err(SyncError::Transient {
                artifact: artifact.name.clone(),
                message: output.tail(20),
            });
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "dvc"
    }
}
