//! Git command-line adapter

use crate::core::SecretEnv;
use crate::shell::{CommandOutput, ShellCommand};
use crate::vcs::{VcsError, VersionControl};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static REJECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\[rejected\]|non-fast-forward|fetch first|updates were rejected)")
        .expect("rejected-push pattern is valid")
});

/// Version control through the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
    remote: String,
    branch: Option<String>,
    secrets: SecretEnv,
}

impl GitCli {
    pub fn new(workdir: impl AsRef<Path>) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            remote: "origin".to_string(),
            branch: None,
            secrets: SecretEnv::default(),
        }
    }

    pub fn with_remote(mut self, remote: Option<String>) -> Self {
        if let Some(remote) = remote {
            self.remote = remote;
        }
        self
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn with_secrets(mut self, secrets: SecretEnv) -> Self {
        self.secrets = secrets;
        self
    }

    async fn git(&self, args: &[&str]) -> Result<CommandOutput, VcsError> {
        debug!("git {}", args.join(" "));
        ShellCommand::program("git")
            .args(args.iter().copied())
            .current_dir(&self.workdir)
            .secrets(&self.secrets)
            .timeout_secs(300)
            .output()
            .await
            .map_err(|e| VcsError::Command {
                command: format!("git {}", args.first().copied().unwrap_or_default()),
                message: e.to_string(),
            })
    }

    fn failed(args: &[&str], output: &CommandOutput) -> VcsError {
        VcsError::Command {
            command: format!("git {}", args.join(" ")),
            message: output.tail(20),
        }
    }

    fn remote_args<'a>(&'a self, verb: &'a str) -> Vec<&'a str> {
        let mut args = vec![verb, self.remote.as_str()];
        if let Some(branch) = &self.branch {
            args.push(branch.as_str());
        }
        args
    }
}

fn is_rejected(output: &CommandOutput) -> bool {
    REJECTED.is_match(&output.stderr) || REJECTED.is_match(&output.stdout)
}

#[async_trait]
impl VersionControl for GitCli {
    async fn stage(&self, paths: &[PathBuf]) -> Result<(), VcsError> {
        let rendered: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        let mut args = vec!["add", "--"];
        args.extend(rendered.iter().map(String::as_str));

        let output = self.git(&args).await?;
        if !output.success() {
            return Err(Self::failed(&args, &output));
        }
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<(), VcsError> {
        // Exit code 0 means the index matches HEAD
        let diff = self.git(&["diff", "--cached", "--quiet"]).await?;
        if diff.success() {
            return Err(VcsError::NothingToCommit);
        }

        let args = ["commit", "-m", message];
        let output = self.git(&args).await?;
        if !output.success() {
            return Err(Self::failed(&args, &output));
        }
        Ok(())
    }

    async fn pull_rebase(&self) -> Result<(), VcsError> {
        let mut args = vec!["pull", "--rebase"];
        args.extend(self.remote_args("pull").into_iter().skip(1));

        let output = self.git(&args).await?;
        if !output.success() {
            // Leave the tree usable for the next invocation
            let _ = self.git(&["rebase", "--abort"]).await;
            return Err(Self::failed(&args, &output));
        }
        Ok(())
    }

    async fn push(&self) -> Result<(), VcsError> {
        let args = self.remote_args("push");
        let output = self.git(&args).await?;
        if output.success() {
            return Ok(());
        }
        if is_rejected(&output) {
            Err(VcsError::Rejected(output.tail(5)))
        } else {
            Err(Self::failed(&args, &output))
        }
    }
}
