//! Deployment health gate
//!
//! Starts a model-serving process, polls its health endpoint until it
//! reports ready, runs a validation against it and always tears it down.
//!
//! ```text
//! STARTING -> HEALTHY   -> STOPPED
//!          \-> UNHEALTHY -> STOPPED
//! ```

pub mod gate;
pub mod health;
pub mod process;

use crate::core::config::{DeploymentConfig, ValidationConfig};
use crate::core::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use gate::{Deployment, DeploymentHealthGate, DeploymentReport};
pub use health::{HttpServiceClient, ProbeRequest, ProbeResponse, ServiceClient, ServiceEndpoint};
pub use process::{ServiceLauncher, ServiceProcess, ShellServiceLauncher};

/// HTTP method for health and validation requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// How to start the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    /// Foreground command line, run through `sh -c`
    pub command: String,
    pub host: String,
    pub port: u16,
    /// File receiving the service's stdout and stderr
    pub log_file: PathBuf,
    /// Extra environment for the service process
    pub env: Vec<(String, String)>,
}

impl ServiceSpec {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Readiness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckSpec {
    pub path: String,
    pub method: HttpMethod,
    /// Transport timeout of a single probe
    pub timeout: Duration,
}

/// Check run against the healthy service
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationSpec {
    Request {
        path: String,
        method: HttpMethod,
        body: Option<serde_json::Value>,
    },
    Command {
        run: String,
    },
}

/// Everything the gate needs for one deployment
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentSpec {
    pub service: ServiceSpec,
    pub health: HealthCheckSpec,
    pub max_attempts: u32,
    /// Sleep between failed probes
    pub interval: Duration,
    pub validation: Option<ValidationSpec>,
}

impl DeploymentSpec {
    pub fn from_config(stage_id: &str, config: &DeploymentConfig, log_dir: &Path) -> Self {
        let validation = config.validation.as_ref().map(|v| match v {
            ValidationConfig::Request { path, method, body } => ValidationSpec::Request {
                path: path.clone(),
                method: *method,
                body: body.clone(),
            },
            ValidationConfig::Command { run } => ValidationSpec::Command { run: run.clone() },
        });

        Self {
            service: ServiceSpec {
                name: stage_id.to_string(),
                command: config.command.clone(),
                host: config.host.clone(),
                port: config.port,
                log_file: log_dir.join(format!("{}-service.log", stage_id)),
                env: Vec::new(),
            },
            health: HealthCheckSpec {
                path: config.health_path.clone(),
                method: config.health_method,
                timeout: Duration::from_millis(config.request_timeout_ms),
            },
            max_attempts: config.max_attempts,
            interval: Duration::from_millis(config.interval_ms),
            validation,
        }
    }
}

/// Lifecycle states of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    Starting,
    Healthy,
    Unhealthy,
    Stopped,
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentState::Starting => "STARTING",
            DeploymentState::Healthy => "HEALTHY",
            DeploymentState::Unhealthy => "UNHEALTHY",
            DeploymentState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Post-mortem data captured from a failed deployment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub service_log: String,
    pub process_listing: String,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- service log ---")?;
        writeln!(f, "{}", self.service_log.trim_end())?;
        writeln!(f, "--- process listing ---")?;
        write!(f, "{}", self.process_listing.trim_end())
    }
}

/// Deployment errors
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to launch service: {0}")]
    Launch(String),

    #[error("not healthy after {attempts} health checks")]
    StartupTimeout {
        attempts: u32,
        diagnostics: Diagnostics,
    },

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        diagnostics: Diagnostics,
    },

    #[error("failed to stop service: {0}")]
    Stop(String),
}

impl From<DeployError> for PipelineError {
    fn from(err: DeployError) -> Self {
        let message = err.to_string();
        match err {
            DeployError::StartupTimeout { diagnostics, .. } => PipelineError::StartupTimeout {
                message,
                diagnostics: diagnostics.to_string(),
            },
            DeployError::Validation {
                message,
                diagnostics,
            } => PipelineError::ValidationFailure {
                message,
                diagnostics: Some(diagnostics.to_string()),
            },
            DeployError::Launch(_) | DeployError::Stop(_) => PipelineError::StartupTimeout {
                message,
                diagnostics: String::new(),
            },
        }
    }
}
