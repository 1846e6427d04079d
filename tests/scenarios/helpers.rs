//! Fakes and assertions shared by the scenario tests

use async_trait::async_trait;
use forecast_pipeline::core::config::PipelineConfig;
use forecast_pipeline::core::{Pipeline, PipelineRun, RunStatus, StageResult, StageStatus};
use forecast_pipeline::deploy::{
    DeployError, DeploymentHealthGate, Diagnostics, ProbeRequest, ProbeResponse, ServiceClient,
    ServiceLauncher, ServiceProcess, ServiceSpec,
};
use forecast_pipeline::environment::{
    EnvironmentError, EnvironmentManager, EnvironmentProfile, EnvironmentRegistry, Provisioner,
};
use forecast_pipeline::execution::{
    ExecutionEngine, ExecutionEvent, StageExecutor, StepError, StepInvocation, StepRunner,
};
use forecast_pipeline::retention::RetentionManager;
use forecast_pipeline::store::InMemoryObjectStore;
use forecast_pipeline::sync::{ArtifactSyncClient, ObjectStoreArtifacts};
use forecast_pipeline::vcs::{CommitGate, VcsError, VersionControl};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provisioner that counts how often each profile is built
#[derive(Default)]
pub struct CountingProvisioner {
    provisioned: Mutex<HashSet<String>>,
    counts: Mutex<HashMap<String, u32>>,
    delay: Option<Duration>,
    fail: bool,
}

impl CountingProvisioner {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Provisioning takes `delay`, long enough for callers to overlap
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn count(&self, profile: &str) -> u32 {
        self.counts.lock().unwrap().get(profile).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Provisioner for CountingProvisioner {
    async fn is_provisioned(&self, profile: &EnvironmentProfile) -> bool {
        self.provisioned.lock().unwrap().contains(&profile.name)
    }

    async fn provision(&self, profile: &EnvironmentProfile) -> Result<(), EnvironmentError> {
        *self.counts.lock().unwrap().entry(profile.name.clone()).or_insert(0) += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(EnvironmentError::Provisioning {
                profile: profile.name.clone(),
                message: "pip install exited with code 1".to_string(),
            });
        }
        self.provisioned.lock().unwrap().insert(profile.name.clone());
        Ok(())
    }
}

/// Step runner understanding two commands
///
/// `produce <path>` writes the path into itself; anything else fails with
/// a Python-style traceback.
#[derive(Default)]
pub struct FakeRunner {
    executed: Mutex<Vec<String>>,
}

impl FakeRunner {
    /// Names of the steps run so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepRunner for FakeRunner {
    async fn run(&self, invocation: &StepInvocation<'_>) -> Result<String, StepError> {
        self.executed.lock().unwrap().push(invocation.name.to_string());
        match invocation.command.strip_prefix("produce ") {
            Some(path) => {
                std::fs::write(path, path).unwrap();
                Ok(format!("wrote {}", path))
            }
            None => Err(StepError::Exit {
                code: 1,
                output: "Traceback (most recent call last):\nValueError: Insufficient data"
                    .to_string(),
            }),
        }
    }
}

/// Version control backed by file contents
///
/// A commit is a no-op when every staged file matches what was last
/// committed. Pushes are rejected `rejections` times before succeeding.
#[derive(Default)]
pub struct ScriptedVcs {
    staged: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    committed: Mutex<HashMap<PathBuf, Vec<u8>>>,
    pub commits: AtomicU32,
    pub pushes: AtomicU32,
    pub rebases: AtomicU32,
    pub rejections: AtomicU32,
    rebase_fails: bool,
}

impl ScriptedVcs {
    pub fn rejecting(times: u32) -> Self {
        let vcs = Self::default();
        vcs.rejections.store(times, Ordering::SeqCst);
        vcs
    }

    /// Rejects the first push and fails the rebase that follows
    pub fn conflicting() -> Self {
        Self {
            rebase_fails: true,
            ..Self::rejecting(1)
        }
    }

    /// Pretend `path` with its current content is already committed
    pub fn seed(&self, path: &Path) {
        let content = std::fs::read(path).unwrap_or_default();
        self.committed.lock().unwrap().insert(path.to_path_buf(), content);
    }
}

#[async_trait]
impl VersionControl for ScriptedVcs {
    async fn stage(&self, paths: &[PathBuf]) -> Result<(), VcsError> {
        let mut staged = self.staged.lock().unwrap();
        for path in paths {
            staged.push((path.clone(), std::fs::read(path).unwrap_or_default()));
        }
        Ok(())
    }

    async fn commit(&self, _message: &str) -> Result<(), VcsError> {
        let staged: Vec<_> = self.staged.lock().unwrap().drain(..).collect();
        let mut committed = self.committed.lock().unwrap();
        let changed: Vec<_> = staged
            .into_iter()
            .filter(|(path, content)| committed.get(path) != Some(content))
            .collect();
        if changed.is_empty() {
            return Err(VcsError::NothingToCommit);
        }
        committed.extend(changed);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pull_rebase(&self) -> Result<(), VcsError> {
        self.rebases.fetch_add(1, Ordering::SeqCst);
        if self.rebase_fails {
            return Err(VcsError::Command {
                command: "git pull --rebase".to_string(),
                message: "CONFLICT (content): Merge conflict in raw.csv.dvc".to_string(),
            });
        }
        Ok(())
    }

    async fn push(&self) -> Result<(), VcsError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let remaining = self.rejections.load(Ordering::SeqCst);
        if remaining > 0 {
            self.rejections.store(remaining - 1, Ordering::SeqCst);
            return Err(VcsError::Rejected("Updates were rejected (fetch first)".to_string()));
        }
        Ok(())
    }
}

/// Counters shared between a fake launcher and its processes
#[derive(Default)]
pub struct ProcessCounters {
    pub launches: AtomicU32,
    pub stops: AtomicU32,
    pub kills: AtomicU32,
}

pub struct FakeLauncher {
    pub counters: Arc<ProcessCounters>,
}

struct FakeProcess {
    counters: Arc<ProcessCounters>,
}

#[async_trait]
impl ServiceProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    async fn stop(&mut self) -> Result<(), DeployError> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn diagnostics(&mut self) -> Diagnostics {
        Diagnostics {
            service_log: "Traceback: model sarimax_model:latest not found".to_string(),
            process_listing: "4242 bentoml serve".to_string(),
        }
    }

    fn kill_now(&mut self) {
        self.counters.kills.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceLauncher for FakeLauncher {
    async fn launch(&self, _spec: &ServiceSpec) -> Result<Box<dyn ServiceProcess>, DeployError> {
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            counters: self.counters.clone(),
        }))
    }
}

/// Answers health probes with 503 until `healthy_at`, then 200
///
/// Requests to any other path get `validation_status`.
pub struct ScriptedProbe {
    pub health_path: String,
    pub healthy_at: Option<u32>,
    pub validation_status: u16,
    pub probes: AtomicU32,
    pub requests: Mutex<Vec<ProbeRequest>>,
}

impl ScriptedProbe {
    pub fn new(healthy_at: Option<u32>) -> Self {
        Self {
            health_path: "/healthz".to_string(),
            healthy_at,
            validation_status: 200,
            probes: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ServiceClient for ScriptedProbe {
    async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, String> {
        self.requests.lock().unwrap().push(request.clone());
        if !request.url.ends_with(&self.health_path) {
            return Ok(ProbeResponse {
                status: self.validation_status,
                body: r#"{"forecast": [42.0]}"#.to_string(),
            });
        }

        let attempt = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        match self.healthy_at {
            Some(k) if attempt >= k => Ok(ProbeResponse {
                status: 200,
                body: "ok".to_string(),
            }),
            Some(_) => Ok(ProbeResponse {
                status: 503,
                body: "loading".to_string(),
            }),
            None => Err("connection refused".to_string()),
        }
    }
}

/// Every fake a pipeline run needs, rooted in a temporary directory
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub remote: Arc<InMemoryObjectStore>,
    pub models: Arc<InMemoryObjectStore>,
    pub runner: Arc<FakeRunner>,
    pub provisioner: Arc<CountingProvisioner>,
    pub vcs: Arc<ScriptedVcs>,
    pub counters: Arc<ProcessCounters>,
    pub probe: Arc<ScriptedProbe>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_probe(ScriptedProbe::new(Some(1)))
    }

    pub fn with_probe(probe: ScriptedProbe) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            remote: Arc::new(InMemoryObjectStore::new()),
            models: Arc::new(InMemoryObjectStore::new()),
            runner: Arc::new(FakeRunner::default()),
            provisioner: Arc::new(CountingProvisioner::default()),
            vcs: Arc::new(ScriptedVcs::default()),
            counters: Arc::new(ProcessCounters::default()),
            probe: Arc::new(probe),
        }
    }

    /// Working directory, for substitution into pipeline YAML
    pub fn root(&self) -> String {
        self.dir.path().display().to_string()
    }

    pub fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    pub fn engine(&self, pipeline: &Pipeline) -> ExecutionEngine {
        let registry = EnvironmentRegistry::with_profiles(pipeline.environments.clone());
        let executor = StageExecutor::new(
            EnvironmentManager::new(Arc::new(registry), self.provisioner.clone()),
            self.runner.clone(),
            ArtifactSyncClient::new(Arc::new(ObjectStoreArtifacts::new(self.remote.clone()))),
        )
        .with_commit_gate(CommitGate::new(self.vcs.clone(), pipeline.vcs.max_push_retries))
        .with_retention(RetentionManager::new(self.models.clone()))
        .with_deployer(DeploymentHealthGate::new(
            Arc::new(FakeLauncher {
                counters: self.counters.clone(),
            }),
            self.probe.clone(),
        ));
        ExecutionEngine::new(executor)
    }

    /// Run a pipeline, returning the run and every emitted event
    pub async fn run(&self, pipeline: &Pipeline) -> (PipelineRun, Vec<ExecutionEvent>) {
        let engine = self.engine(pipeline);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.add_event_handler(move |event| sink.lock().unwrap().push(event));
        let run = engine.execute(pipeline).await;
        let events = events.lock().unwrap().clone();
        (run, events)
    }
}

/// Parse a pipeline from YAML string
pub fn pipeline_from_yaml(yaml: &str) -> Pipeline {
    let config = PipelineConfig::from_yaml(yaml)
        .unwrap_or_else(|e| panic!("Failed to parse pipeline YAML: {}", e));
    config.to_pipeline()
}

pub fn stage<'a>(run: &'a PipelineRun, stage_id: &str) -> &'a StageResult {
    run.stage(stage_id)
        .unwrap_or_else(|| panic!("Stage '{}' not found in run: {:?}", stage_id, run.stages()))
}

/// Assert the run finished with the given status
pub fn assert_run_status(run: &PipelineRun, expected: RunStatus) {
    assert_eq!(
        run.status(),
        expected,
        "Run should be {:?}, stages were: {:#?}",
        expected,
        run.stages()
    );
}

/// Assert a stage ended with the given status
pub fn assert_stage_status(run: &PipelineRun, stage_id: &str, expected: StageStatus) {
    let result = stage(run, stage_id);
    assert_eq!(
        result.status, expected,
        "Stage '{}' should be {:?}, was: {:?}",
        stage_id, expected, result
    );
}

/// Assert the stages attempted (not skipped) in order
pub fn assert_execution_order(run: &PipelineRun, expected: &[&str]) {
    let actual: Vec<&str> = run
        .stages()
        .iter()
        .filter(|s| s.status != StageStatus::Skipped)
        .map(|s| s.stage_id.as_str())
        .collect();
    assert_eq!(actual, expected, "Unexpected execution order");
}
