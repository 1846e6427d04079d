//! Stage executor - runs one stage from environment setup to deployment

use crate::core::{
    config::StoreConfig, Pipeline, PipelineError, RunContext, SecretEnv, SeverityTable, Stage,
};
use crate::deploy::{
    DeploymentHealthGate, HttpServiceClient, ProbeRequest, ServiceEndpoint, ShellServiceLauncher,
    ValidationSpec,
};
use crate::environment::{
    CommandProvisioner, EnvironmentManager, EnvironmentProfile, EnvironmentRegistry,
};
use crate::execution::runner::{environment_vars, ShellStepRunner, StepInvocation, StepRunner};
use crate::retention::RetentionManager;
use crate::store::FsObjectStore;
use crate::sync::{ArtifactSyncClient, DvcArtifactStore, ObjectStoreArtifacts, PullOutcome};
use crate::vcs::{CommitGate, CommitOutcome, GitCli};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for each environment setup command
const PROVISION_TIMEOUT_SECS: u64 = 3600;

/// What a successful stage did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Warnings and absorbed failures, in order
    pub notes: Vec<String>,

    /// A recoverable failure was absorbed
    pub degraded: bool,

    /// Model keys deleted by retention
    pub pruned: Vec<String>,
}

impl StageReport {
    fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// Runs the phases of a stage in order
///
/// environment -> pull inputs -> steps -> push outputs -> commit -> retention
/// -> deployment. The first fatal error ends the stage. Recoverable commit
/// errors are absorbed here so retention and deployment still run.
pub struct StageExecutor {
    environments: EnvironmentManager,
    runner: Arc<dyn StepRunner>,
    sync: ArtifactSyncClient,
    commit_gate: Option<CommitGate>,
    retention: Option<RetentionManager>,
    deployer: Option<DeploymentHealthGate>,
}

impl StageExecutor {
    pub fn new(
        environments: EnvironmentManager,
        runner: Arc<dyn StepRunner>,
        sync: ArtifactSyncClient,
    ) -> Self {
        Self {
            environments,
            runner,
            sync,
            commit_gate: None,
            retention: None,
            deployer: None,
        }
    }

    pub fn with_commit_gate(mut self, gate: CommitGate) -> Self {
        self.commit_gate = Some(gate);
        self
    }

    pub fn with_retention(mut self, retention: RetentionManager) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn with_deployer(mut self, deployer: DeploymentHealthGate) -> Self {
        self.deployer = Some(deployer);
        self
    }

    /// Wire the production backends for a pipeline rooted at `workdir`
    pub fn from_pipeline(pipeline: &Pipeline, workdir: &Path) -> Self {
        let secrets = SecretEnv::from_env(&pipeline.secrets);

        let registry = Arc::new(EnvironmentRegistry::with_profiles(
            pipeline.environments.iter().map(|profile| {
                let mut profile = profile.clone();
                profile.root = workdir.join(&profile.root);
                profile
            }),
        ));
        let provisioner = CommandProvisioner::new(
            pipeline.variables.clone(),
            secrets.clone(),
            PROVISION_TIMEOUT_SECS,
        );
        let environments = EnvironmentManager::new(registry, Arc::new(provisioner));

        let sync = match &pipeline.store {
            StoreConfig::Dvc { remote } => ArtifactSyncClient::new(Arc::new(
                DvcArtifactStore::new(workdir)
                    .with_remote(remote.clone())
                    .with_secrets(secrets.clone()),
            )),
            StoreConfig::Fs { root } => ArtifactSyncClient::new(Arc::new(ObjectStoreArtifacts::new(
                Arc::new(FsObjectStore::new(workdir.join(root))),
            ))),
        };

        let mut executor = Self::new(environments, Arc::new(ShellStepRunner::new(workdir)), sync)
            .with_deployer(DeploymentHealthGate::new(
                Arc::new(ShellServiceLauncher::new(secrets.clone())),
                Arc::new(HttpServiceClient::new()),
            ));

        if pipeline.vcs.enabled {
            let git = GitCli::new(workdir)
                .with_remote(pipeline.vcs.remote.clone())
                .with_branch(pipeline.vcs.branch.clone())
                .with_secrets(secrets);
            executor = executor.with_commit_gate(CommitGate::new(
                Arc::new(git),
                pipeline.vcs.max_push_retries,
            ));
        }

        if let Some(model_store) = &pipeline.model_store {
            let store = FsObjectStore::new(model_store.resolved_root());
            executor = executor.with_retention(RetentionManager::new(Arc::new(store)));
        }

        executor
    }

    /// Execute a stage
    pub async fn execute(
        &self,
        stage: &Stage,
        ctx: &RunContext,
        severity: &SeverityTable,
    ) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::default();

        let profile = self
            .environments
            .ensure(&stage.environment)
            .await
            .map_err(|e| PipelineError::SetupFailure {
                profile: e.profile().to_string(),
                message: e.to_string(),
            })?;

        for input in &stage.inputs {
            if self.sync.pull(input).await? == PullOutcome::Missing {
                report.note(format!(
                    "optional input '{}' not found in remote",
                    input.artifact.name
                ));
            }
        }

        for step in &stage.steps {
            let invocation = StepInvocation {
                name: &step.name,
                command: step.render_command(&ctx.variables),
                timeout_secs: step.timeout_secs,
                environment: &profile,
                secrets: &ctx.secrets,
            };
            let output = self
                .runner
                .run(&invocation)
                .await
                .map_err(|e| e.into_pipeline_error(&step.name))?;
            debug!("Step {} output:\n{}", step.name, output);
        }

        for output in &stage.outputs {
            self.sync.push(output).await?;
        }

        if let Some(gate) = &self.commit_gate {
            let message = ctx.render(&stage.commit_message);
            for output in &stage.outputs {
                match gate.commit_and_push(output, &message).await {
                    CommitOutcome::Committed { .. } => {}
                    CommitOutcome::Noop => absorb(
                        PipelineError::NothingToCommit {
                            artifact: output.name.clone(),
                        },
                        severity,
                        &mut report,
                    )?,
                    CommitOutcome::Failed { reason } => absorb(
                        PipelineError::CommitConflict {
                            artifact: output.name.clone(),
                            reason,
                        },
                        severity,
                        &mut report,
                    )?,
                }
            }
        }

        if let Some(policy) = &stage.retention {
            let manager = self.retention.as_ref().ok_or_else(|| PipelineError::RetentionFailure {
                family: policy.family_prefix.clone(),
                message: "no model store configured".to_string(),
            })?;
            let deleted = manager.prune(&policy.family_prefix, policy.keep).await?;
            if !deleted.is_empty() {
                report.note(format!(
                    "pruned {} model(s) under {}",
                    deleted.len(),
                    policy.family_prefix
                ));
            }
            report.pruned = deleted;
        }

        if let Some(spec) = &stage.deployment {
            let deployer = self.deployer.as_ref().ok_or_else(|| PipelineError::StartupTimeout {
                message: "no deployment gate configured".to_string(),
                diagnostics: String::new(),
            })?;

            let mut spec = spec.clone();
            spec.service.env = environment_vars(&profile);
            let timeout = spec.health.timeout;
            let validation = spec.validation.clone();

            let deployed = deployer
                .with_deployment(&spec, |endpoint| {
                    self.validate(endpoint, validation, timeout, &profile, ctx)
                })
                .await
                .map_err(PipelineError::from)?;

            let states: Vec<String> = deployed.transitions.iter().map(|s| s.to_string()).collect();
            info!("Deployment of {} validated: {}", stage.id, deployed.value);
            report.note(format!(
                "deployment {} after {} health check(s)",
                states.join(" -> "),
                deployed.attempts
            ));
        }

        Ok(report)
    }

    /// Run the deployment's validation against a healthy service
    async fn validate(
        &self,
        endpoint: ServiceEndpoint,
        validation: Option<ValidationSpec>,
        timeout: Duration,
        profile: &EnvironmentProfile,
        ctx: &RunContext,
    ) -> Result<String, String> {
        match validation {
            None => Ok("healthy".to_string()),
            Some(ValidationSpec::Request { path, method, body }) => {
                let deployer = self
                    .deployer
                    .as_ref()
                    .ok_or_else(|| "no deployment gate configured".to_string())?;
                let request = ProbeRequest {
                    url: endpoint.url(&path),
                    method,
                    body,
                    timeout,
                };
                let response = deployer.client().send(&request).await?;
                if response.is_success() {
                    Ok(format!("{} {} -> {}", method.as_str(), path, response.status))
                } else {
                    let body: String = response.body.chars().take(500).collect();
                    Err(format!(
                        "{} {} returned {}: {}",
                        method.as_str(),
                        path,
                        response.status,
                        body
                    ))
                }
            }
            Some(ValidationSpec::Command { run }) => {
                let mut variables = ctx.variables.clone();
                variables.insert("service_url".to_string(), endpoint.base_url.clone());
                let invocation = StepInvocation {
                    name: "validation",
                    command: crate::core::context::render_template(&run, &variables),
                    timeout_secs: timeout.as_secs().max(60),
                    environment: profile,
                    secrets: &ctx.secrets,
                };
                self.runner.run(&invocation).await.map_err(|e| match e {
                    crate::execution::StepError::Exit { code, output } => {
                        format!("validation command exited with code {}:\n{}", code, output)
                    }
                    other => format!("validation command {}", other),
                })
            }
        }
    }
}

/// Absorb a recoverable error into the report, or return it if fatal
fn absorb(
    err: PipelineError,
    severity: &SeverityTable,
    report: &mut StageReport,
) -> Result<(), PipelineError> {
    if severity.is_fatal(err.class()) {
        return Err(err);
    }
    if err.degrades_run() {
        warn!("{}", err);
        report.degraded = true;
    } else {
        info!("{}", err);
    }
    report.note(err.to_string());
    Ok(())
}
