//! Step runner - executes stage payload commands inside an environment

use crate::core::{PipelineError, SecretEnv};
use crate::environment::EnvironmentProfile;
use crate::shell::{ShellCommand, ShellError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lines of command output kept for failure reports
const OUTPUT_TAIL_LINES: usize = 40;

/// Step execution errors
#[derive(Debug, Error)]
pub enum StepError {
    #[error("exited with code {code}")]
    Exit { code: i32, output: String },

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("could not start: {0}")]
    Spawn(String),
}

impl StepError {
    pub fn into_pipeline_error(self, step: &str) -> PipelineError {
        let message = self.to_string();
        let output = match self {
            StepError::Exit { output, .. } => Some(output),
            _ => None,
        };
        PipelineError::StepFailure {
            step: step.to_string(),
            message,
            output,
        }
    }
}

/// A rendered command ready to run
#[derive(Debug, Clone)]
pub struct StepInvocation<'a> {
    pub name: &'a str,
    pub command: String,
    pub timeout_secs: u64,
    pub environment: &'a EnvironmentProfile,
    pub secrets: &'a SecretEnv,
}

/// Trait for running stage commands
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run the command, returning the tail of its output on success
    async fn run(&self, invocation: &StepInvocation<'_>) -> Result<String, StepError>;
}

/// Environment variables that activate a profile for a subprocess
pub fn environment_vars(profile: &EnvironmentProfile) -> Vec<(String, String)> {
    let bin = profile.bin_dir().display().to_string();
    let path = match std::env::var("PATH") {
        Ok(existing) if !existing.is_empty() => format!("{}:{}", bin, existing),
        _ => bin,
    };
    vec![
        ("PATH".to_string(), path),
        ("VIRTUAL_ENV".to_string(), profile.root.display().to_string()),
    ]
}

/// Runs steps through `sh -c` in a working directory
#[derive(Debug, Clone)]
pub struct ShellStepRunner {
    workdir: PathBuf,
}

impl ShellStepRunner {
    pub fn new(workdir: impl AsRef<Path>) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl StepRunner for ShellStepRunner {
    async fn run(&self, invocation: &StepInvocation<'_>) -> Result<String, StepError> {
        info!("Running step {} in {}", invocation.name, invocation.environment.name);
        debug!("Command: {}", invocation.command);

        let mut command = ShellCommand::shell(&invocation.command)
            .current_dir(&self.workdir)
            .secrets(invocation.secrets)
            .timeout_secs(invocation.timeout_secs);
        for (key, value) in environment_vars(invocation.environment) {
            command = command.env(&key, value);
        }

        let output = command.output().await.map_err(|e| match e {
            ShellError::Timeout(secs) => StepError::Timeout(secs),
            ShellError::Spawn { message, .. } => StepError::Spawn(message),
        })?;

        if output.success() {
            Ok(output.tail(OUTPUT_TAIL_LINES))
        } else {
            warn!("Step {} exited with code {}", invocation.name, output.code);
            Err(StepError::Exit {
                code: output.code,
                output: output.tail(OUTPUT_TAIL_LINES),
            })
        }
    }
}
