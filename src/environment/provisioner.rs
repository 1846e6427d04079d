//! Shell-command provisioner

use crate::core::{context::render_template, SecretEnv};
use crate::environment::{EnvironmentError, EnvironmentProfile, Provisioner};
use crate::shell::ShellCommand;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Marker file written inside a provisioned environment
pub const MARKER_FILE: &str = ".provisioned";

/// Provisions a profile by running its setup commands
///
/// Setup commands see the pipeline variables plus `env_dir`, `env_name`
/// and `dependencies` (space-separated). A successful run writes the
/// dependency manifest to a marker file; a later process on the same host
/// treats a matching marker as already provisioned.
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    variables: HashMap<String, String>,
    secrets: SecretEnv,
    timeout_secs: u64,
}

impl CommandProvisioner {
    pub fn new(variables: HashMap<String, String>, secrets: SecretEnv, timeout_secs: u64) -> Self {
        Self {
            variables,
            secrets,
            timeout_secs,
        }
    }

    fn variables_for(&self, profile: &EnvironmentProfile) -> HashMap<String, String> {
        let mut vars = self.variables.clone();
        vars.insert("env_dir".to_string(), profile.root.display().to_string());
        vars.insert("env_name".to_string(), profile.name.clone());
        vars.insert("dependencies".to_string(), profile.dependencies.join(" "));
        vars
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn is_provisioned(&self, profile: &EnvironmentProfile) -> bool {
        let marker = profile.root.join(MARKER_FILE);
        match tokio::fs::read_to_string(&marker).await {
            Ok(content) => content == profile.manifest(),
            Err(_) => false,
        }
    }

    async fn provision(&self, profile: &EnvironmentProfile) -> Result<(), EnvironmentError> {
        let fail = |message: String| EnvironmentError::Provisioning {
            profile: profile.name.clone(),
            message,
        };

        tokio::fs::create_dir_all(&profile.root)
            .await
            .map_err(|e| fail(format!("cannot create {}: {}", profile.root.display(), e)))?;

        let vars = self.variables_for(profile);
        for template in &profile.setup {
            let command = render_template(template, &vars);
            debug!("Environment {} setup: {}", profile.name, command);

            let output = ShellCommand::shell(&command)
                .secrets(&self.secrets)
                .timeout_secs(self.timeout_secs)
                .output()
                .await
                .map_err(|e| fail(e.to_string()))?;

            if !output.success() {
                warn!(
                    "Setup command for {} exited with code {}",
                    profile.name, output.code
                );
                return Err(fail(format!(
                    "'{}' exited with code {}:\n{}",
                    command,
                    output.code,
                    output.tail(20)
                )));
            }
        }

        tokio::fs::write(profile.root.join(MARKER_FILE), profile.manifest())
            .await
            .map_err(|e| fail(format!("cannot write marker: {}", e)))?;

        Ok(())
    }
}
