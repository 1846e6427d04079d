//! Stage domain model

use crate::core::{
    artifact::{ArtifactRef, StageInput},
    config::StageConfig,
    context::render_template,
};
use crate::deploy::DeploymentSpec;
use crate::retention::RetentionPolicy;
use std::collections::HashMap;
use std::path::PathBuf;

/// A single command in a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Step name, used in logs and errors
    pub name: String,

    /// Shell command with `{{ var }}` placeholders
    pub command_template: String,

    /// Timeout in seconds
    pub timeout_secs: u64,
}

impl Step {
    pub fn new(name: &str, command: &str, timeout_secs: u64) -> Self {
        Self {
            name: name.to_string(),
            command_template: command.to_string(),
            timeout_secs,
        }
    }

    /// Render the command with variable substitution
    pub fn render_command(&self, variables: &HashMap<String, String>) -> String {
        render_template(&self.command_template, variables)
    }
}

/// Values applied where a stage does not set its own
#[derive(Debug, Clone)]
pub struct StageDefaults {
    pub step_timeout_secs: u64,
    pub log_dir: PathBuf,
}

impl Default for StageDefaults {
    fn default() -> Self {
        Self {
            step_timeout_secs: 1800,
            log_dir: PathBuf::from(".pipeline-logs"),
        }
    }
}

/// One ordered unit of pipeline work
#[derive(Debug, Clone)]
pub struct Stage {
    /// Unique stage identifier
    pub id: String,

    pub description: Option<String>,

    /// Environment profile the stage runs in
    pub environment: String,

    /// Commands run in order
    pub steps: Vec<Step>,

    /// Artifacts pulled before the steps run
    pub inputs: Vec<StageInput>,

    /// Artifacts pushed and committed after the steps succeed
    pub outputs: Vec<ArtifactRef>,

    pub commit_message: String,

    /// Model pruning applied after the outputs are recorded
    pub retention: Option<RetentionPolicy>,

    /// Deployment gated behind a health check, run last
    pub deployment: Option<DeploymentSpec>,
}

impl Stage {
    /// Create a stage from its config and the artifact catalog
    ///
    /// The config must already be validated, so every referenced artifact
    /// exists in `catalog`.
    pub fn from_config(
        config: &StageConfig,
        catalog: &HashMap<String, ArtifactRef>,
        defaults: &StageDefaults,
    ) -> Self {
        let steps = config
            .steps
            .iter()
            .map(|s| Step::new(&s.name, &s.run, s.timeout_secs.unwrap_or(defaults.step_timeout_secs)))
            .collect();

        let inputs = config
            .inputs
            .iter()
            .filter_map(|input| {
                catalog.get(&input.artifact).map(|artifact| StageInput {
                    artifact: artifact.clone(),
                    optional: input.optional,
                })
            })
            .collect();

        let outputs = config
            .outputs
            .iter()
            .filter_map(|name| catalog.get(name).cloned())
            .collect();

        let commit_message = config
            .commit_message
            .clone()
            .unwrap_or_else(|| format!("Update outputs of stage {}", config.id));

        Stage {
            id: config.id.clone(),
            description: config.description.clone(),
            environment: config.environment.clone(),
            steps,
            inputs,
            outputs,
            commit_message,
            retention: config.retention.as_ref().map(|r| RetentionPolicy {
                family_prefix: r.family_prefix.clone(),
                keep: r.keep,
            }),
            deployment: config
                .deployment
                .as_ref()
                .map(|d| DeploymentSpec::from_config(&config.id, d, &defaults.log_dir)),
        }
    }

    /// Names of the declared output artifacts
    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|a| a.name.as_str()).collect()
    }
}
