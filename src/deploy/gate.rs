//! Health-gated deployment lifecycle

use crate::deploy::{
    DeployError, DeploymentSpec, DeploymentState, Diagnostics, ProbeRequest, ServiceClient,
    ServiceEndpoint, ServiceLauncher, ServiceProcess,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A started service and its lifecycle history
///
/// Call [`Deployment::stop`] when done. If a deployment is dropped without
/// being stopped (an early return, a panic, a cancelled task) the process
/// is killed on the spot.
pub struct Deployment {
    process: Box<dyn ServiceProcess>,
    endpoint: ServiceEndpoint,
    transitions: Vec<DeploymentState>,
    attempts: u32,
    stopped: bool,
}

impl Deployment {
    fn new(process: Box<dyn ServiceProcess>, endpoint: ServiceEndpoint) -> Self {
        Self {
            process,
            endpoint,
            transitions: vec![DeploymentState::Starting],
            attempts: 0,
            stopped: false,
        }
    }

    fn transition(&mut self, state: DeploymentState) {
        debug!("Deployment {} -> {}", self.endpoint.base_url, state);
        self.transitions.push(state);
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> DeploymentState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(DeploymentState::Starting)
    }

    /// Every state entered so far, in order
    pub fn transitions(&self) -> &[DeploymentState] {
        &self.transitions
    }

    /// Health probes sent before the gate decided
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn diagnostics(&mut self) -> Diagnostics {
        self.process.diagnostics().await
    }

    /// Stop the service; later calls do nothing
    pub async fn stop(&mut self) -> Result<(), DeployError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let result = self.process.stop().await;
        self.transition(DeploymentState::Stopped);
        if let Err(e) = &result {
            warn!("Stopping {} failed: {}, killing", self.endpoint.base_url, e);
            self.process.kill_now();
        }
        result
    }
}

impl Drop for Deployment {
    fn drop(&mut self) {
        if !self.stopped {
            warn!(
                "Deployment {} dropped while running, killing service",
                self.endpoint.base_url
            );
            self.process.kill_now();
        }
    }
}

/// Outcome of a scoped deployment
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentReport<T> {
    /// Value produced by the validation
    pub value: T,
    pub transitions: Vec<DeploymentState>,
    pub attempts: u32,
}

/// Starts services and waits for them to report healthy
#[derive(Clone)]
pub struct DeploymentHealthGate {
    launcher: Arc<dyn ServiceLauncher>,
    client: Arc<dyn ServiceClient>,
}

impl DeploymentHealthGate {
    pub fn new(launcher: Arc<dyn ServiceLauncher>, client: Arc<dyn ServiceClient>) -> Self {
        Self { launcher, client }
    }

    pub fn client(&self) -> &Arc<dyn ServiceClient> {
        &self.client
    }

    /// Start the service and poll until healthy
    ///
    /// Sends at most `max_attempts` probes, sleeping `interval` after each
    /// failed one except the last. On exhaustion the service log and a
    /// process listing are captured, the service is stopped, and
    /// `StartupTimeout` is returned.
    pub async fn deploy(&self, spec: &DeploymentSpec) -> Result<Deployment, DeployError> {
        let process = self.launcher.launch(&spec.service).await?;
        let mut deployment = Deployment::new(process, ServiceEndpoint::new(spec.service.base_url()));

        let probe = ProbeRequest {
            url: deployment.endpoint.url(&spec.health.path),
            method: spec.health.method,
            body: None,
            timeout: spec.health.timeout,
        };

        for attempt in 1..=spec.max_attempts {
            deployment.attempts = attempt;
            match self.client.send(&probe).await {
                Ok(response) if response.is_success() => {
                    info!(
                        "Service {} healthy after {} attempt(s)",
                        spec.service.name, attempt
                    );
                    deployment.transition(DeploymentState::Healthy);
                    return Ok(deployment);
                }
                Ok(response) => debug!(
                    "Health check {}/{} returned {}",
                    attempt, spec.max_attempts, response.status
                ),
                Err(e) => debug!("Health check {}/{} failed: {}", attempt, spec.max_attempts, e),
            }

            if attempt < spec.max_attempts {
                tokio::time::sleep(spec.interval).await;
            }
        }

        error!(
            "Service {} not healthy after {} attempts",
            spec.service.name, spec.max_attempts
        );
        deployment.transition(DeploymentState::Unhealthy);
        let diagnostics = deployment.diagnostics().await;
        if let Err(e) = deployment.stop().await {
            warn!("Cleanup after failed startup: {}", e);
        }

        Err(DeployError::StartupTimeout {
            attempts: spec.max_attempts,
            diagnostics,
        })
    }

    /// Deploy, run `validate` against the healthy service, then stop it
    ///
    /// The service is stopped exactly once whether validation succeeds or
    /// fails. A failing validation returns `Validation` with diagnostics
    /// captured before the stop.
    pub async fn with_deployment<F, Fut, T>(
        &self,
        spec: &DeploymentSpec,
        validate: F,
    ) -> Result<DeploymentReport<T>, DeployError>
    where
        F: FnOnce(ServiceEndpoint) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let mut deployment = self.deploy(spec).await?;

        let outcome = match validate(deployment.endpoint().clone()).await {
            Ok(value) => Ok(value),
            Err(message) => {
                warn!("Validation against {} failed: {}", spec.service.name, message);
                let diagnostics = deployment.diagnostics().await;
                Err(DeployError::Validation {
                    message,
                    diagnostics,
                })
            }
        };

        if let Err(e) = deployment.stop().await {
            warn!("Service {} did not stop cleanly: {}", spec.service.name, e);
        }

        let value = outcome?;
        Ok(DeploymentReport {
            value,
            transitions: deployment.transitions().to_vec(),
            attempts: deployment.attempts(),
        })
    }
}
