//! Pipeline domain model

use crate::core::{
    artifact::ArtifactRef,
    config::{ModelStoreConfig, PipelineConfig, StoreConfig, VcsConfig},
    context::{RunContext, SecretEnv},
    severity::SeverityTable,
    stage::{Stage, StageDefaults},
};
use crate::environment::EnvironmentProfile;
use std::collections::HashMap;
use std::path::PathBuf;

/// A pipeline definition
///
/// Built once from configuration and never mutated while it runs.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Global variables available to all steps
    pub variables: HashMap<String, String>,

    /// Names of environment variables forwarded to subprocesses
    pub secrets: Vec<String>,

    /// Declared environment profiles
    pub environments: Vec<EnvironmentProfile>,

    /// Artifact catalog
    pub artifacts: HashMap<String, ArtifactRef>,

    pub store: StoreConfig,

    pub model_store: Option<ModelStoreConfig>,

    pub vcs: VcsConfig,

    pub severity: SeverityTable,

    /// Directory under which environments live
    pub env_root: PathBuf,

    /// Stages in declared order
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let artifacts: HashMap<String, ArtifactRef> = config
            .artifacts
            .iter()
            .map(|(name, a)| {
                let artifact = ArtifactRef {
                    name: name.clone(),
                    remote_key: a.remote_key.clone(),
                    local_path: a.local_path.clone(),
                    metadata_path: a.metadata_path.clone(),
                };
                (name.clone(), artifact)
            })
            .collect();

        let defaults = StageDefaults {
            step_timeout_secs: config.defaults.step_timeout_secs,
            log_dir: config.defaults.log_dir.clone(),
        };

        let stages = config
            .stages
            .iter()
            .map(|s| Stage::from_config(s, &artifacts, &defaults))
            .collect();

        // Sort for deterministic order
        let mut names: Vec<_> = config.environments.keys().cloned().collect();
        names.sort();
        let environments = names
            .iter()
            .map(|name| {
                let env = &config.environments[name];
                EnvironmentProfile::new(
                    name,
                    env.dependencies.clone(),
                    env.setup.clone(),
                    config.defaults.env_root.join(name),
                )
            })
            .collect();

        Pipeline {
            name: config.name.clone(),
            variables: config.variables.clone(),
            secrets: config.secrets.clone(),
            environments,
            artifacts,
            store: config.store.clone(),
            model_store: config.model_store.clone(),
            vcs: config.vcs.clone(),
            severity: SeverityTable::with_overrides(&config.severity),
            env_root: config.defaults.env_root.clone(),
            stages,
        }
    }

    /// Create a pipeline directly from stages, with default settings
    pub fn from_stages(name: &str, stages: Vec<Stage>) -> Self {
        Pipeline {
            name: name.to_string(),
            variables: HashMap::new(),
            secrets: Vec::new(),
            environments: Vec::new(),
            artifacts: HashMap::new(),
            store: StoreConfig::default(),
            model_store: None,
            vcs: VcsConfig::default(),
            severity: SeverityTable::default(),
            env_root: PathBuf::from(".envs"),
            stages,
        }
    }

    /// Stages in execution order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Get a stage by ID
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Create the context for a new invocation
    pub fn create_context(&self) -> RunContext {
        RunContext::new(self.variables.clone(), SecretEnv::from_env(&self.secrets))
    }
}
