//! Pipeline configuration from YAML

use crate::core::{error::ErrorClass, severity::Severity, Pipeline};
use crate::deploy::HttpMethod;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Variables substituted into step commands
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Names of environment variables forwarded to subprocesses
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Named execution environments
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentConfig>,

    /// Artifact catalog, keyed by logical name
    #[serde(default)]
    pub artifacts: HashMap<String, ArtifactConfig>,

    /// Remote store used for artifact sync
    #[serde(default)]
    pub store: StoreConfig,

    /// Store holding model versions, required by stages with `retention`
    #[serde(default)]
    pub model_store: Option<ModelStoreConfig>,

    /// Version-control settings for the commit gate
    #[serde(default)]
    pub vcs: VcsConfig,

    /// Severity overrides per error class
    #[serde(default)]
    pub severity: HashMap<ErrorClass, Severity>,

    /// Defaults applied to every stage
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Pipeline stages, run in declared order
    pub stages: Vec<StageConfig>,
}

/// Execution environment definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Dependency manifest installed into the environment
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Commands that create the environment; `{{ env_dir }}`,
    /// `{{ env_name }}` and `{{ dependencies }}` are available
    #[serde(default)]
    pub setup: Vec<String>,
}

/// Artifact catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub remote_key: String,
    pub local_path: PathBuf,
    #[serde(default)]
    pub metadata_path: Option<PathBuf>,
}

/// Remote store backing artifact sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// DVC command-line client against its configured remote
    Dvc {
        #[serde(default)]
        remote: Option<String>,
    },
    /// A directory acting as the remote
    Fs { root: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Dvc { remote: None }
    }
}

/// Store holding versioned models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStoreConfig {
    /// Root directory; a leading `~/` expands to the home directory
    pub root: PathBuf,
}

impl ModelStoreConfig {
    pub fn resolved_root(&self) -> PathBuf {
        expand_home(&self.root)
    }
}

/// Version-control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsConfig {
    /// Record stage outputs in version control
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub remote: Option<String>,

    #[serde(default)]
    pub branch: Option<String>,

    /// Push attempts after the first rejected push
    #[serde(default = "default_push_retries")]
    pub max_push_retries: u32,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remote: None,
            branch: None,
            max_push_retries: default_push_retries(),
        }
    }
}

/// Pipeline-wide defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Timeout for steps that do not set their own
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Directory under which environments are created
    #[serde(default = "default_env_root")]
    pub env_root: PathBuf,

    /// Directory where service logs are written
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            env_root: default_env_root(),
            log_dir: default_log_dir(),
        }
    }
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage identifier
    pub id: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Environment profile the stage runs in
    pub environment: String,

    /// Artifacts pulled before the steps run
    #[serde(default)]
    pub inputs: Vec<InputConfig>,

    /// Commands run in order
    #[serde(default)]
    pub steps: Vec<StepConfig>,

    /// Artifacts pushed after the steps succeed
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Commit message for recorded outputs
    #[serde(default)]
    pub commit_message: Option<String>,

    #[serde(default)]
    pub retention: Option<RetentionConfig>,

    #[serde(default)]
    pub deployment: Option<DeploymentConfig>,
}

/// Input artifact declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub artifact: String,

    /// Missing in the remote is only a warning
    #[serde(default)]
    pub optional: bool,
}

/// A single command in a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub run: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Model retention block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub family_prefix: String,
    #[serde(default = "default_keep")]
    pub keep: usize,
}

/// Deployment block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Command that starts the service in the foreground
    pub command: String,

    #[serde(default = "default_host")]
    pub host: String,

    pub port: u16,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default)]
    pub health_method: HttpMethod,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Transport timeout for each health or validation request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Written as a single-key map: `request: {..}` or `command: {..}`
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub validation: Option<ValidationConfig>,
}

/// Check run against the healthy service before it is torn down
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationConfig {
    /// HTTP request; a success status passes
    Request {
        path: String,
        #[serde(default = "default_validation_method")]
        method: HttpMethod,
        #[serde(default)]
        body: Option<serde_json::Value>,
    },
    /// Shell command run in the stage environment; exit code 0 passes
    Command { run: String },
}

fn default_true() -> bool {
    true
}

fn default_push_retries() -> u32 {
    2
}

fn default_step_timeout() -> u64 {
    1800
}

fn default_env_root() -> PathBuf {
    PathBuf::from(".envs")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".pipeline-logs")
}

fn default_keep() -> usize {
    3
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_health_path() -> String {
    "/healthz".to_string()
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    12
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_validation_method() -> HttpMethod {
    HttpMethod::Post
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen_ids = HashSet::new();
        for stage in &self.stages {
            if !seen_ids.insert(&stage.id) {
                anyhow::bail!("Duplicate stage ID: {}", stage.id);
            }
        }

        for stage in &self.stages {
            if !self.environments.contains_key(&stage.environment) {
                anyhow::bail!(
                    "Stage '{}' requires unknown environment '{}'",
                    stage.id,
                    stage.environment
                );
            }

            for input in &stage.inputs {
                if !self.artifacts.contains_key(&input.artifact) {
                    anyhow::bail!(
                        "Stage '{}' input references unknown artifact '{}'",
                        stage.id,
                        input.artifact
                    );
                }
            }

            for output in &stage.outputs {
                if !self.artifacts.contains_key(output) {
                    anyhow::bail!(
                        "Stage '{}' output references unknown artifact '{}'",
                        stage.id,
                        output
                    );
                }
            }

            for step in &stage.steps {
                if step.run.trim().is_empty() {
                    anyhow::bail!("Stage '{}' step '{}' has an empty command", stage.id, step.name);
                }
            }

            if let Some(retention) = &stage.retention {
                if retention.keep == 0 {
                    anyhow::bail!("Stage '{}' retention must keep at least one model", stage.id);
                }
                if retention.family_prefix.is_empty() {
                    anyhow::bail!("Stage '{}' retention has an empty family prefix", stage.id);
                }
                if self.model_store.is_none() {
                    anyhow::bail!(
                        "Stage '{}' declares retention but no model_store is configured",
                        stage.id
                    );
                }
            }

            if let Some(deployment) = &stage.deployment {
                if deployment.max_attempts == 0 {
                    anyhow::bail!("Stage '{}' deployment needs at least one health attempt", stage.id);
                }
                if !deployment.health_path.starts_with('/') {
                    anyhow::bail!(
                        "Stage '{}' health path must start with '/': {}",
                        stage.id,
                        deployment.health_path
                    );
                }
            }
        }

        Ok(())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}
