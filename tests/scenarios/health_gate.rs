//! Test: health-gated deployments always tear the service down

use crate::helpers::*;
use forecast_pipeline::core::{ErrorClass, RunStatus, StageStatus};
use forecast_pipeline::deploy::{
    DeployError, DeploymentHealthGate, DeploymentSpec, DeploymentState, HealthCheckSpec,
    HttpMethod, ServiceSpec,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn spec(max_attempts: u32, interval: Duration) -> DeploymentSpec {
    DeploymentSpec {
        service: ServiceSpec {
            name: "serve".to_string(),
            command: "bentoml serve service:svc --port 3000".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            log_file: std::env::temp_dir().join("serve-service.log"),
            env: Vec::new(),
        },
        health: HealthCheckSpec {
            path: "/healthz".to_string(),
            method: HttpMethod::Get,
            timeout: Duration::from_millis(100),
        },
        max_attempts,
        interval,
        validation: None,
    }
}

fn gate(harness: &Harness) -> DeploymentHealthGate {
    DeploymentHealthGate::new(
        Arc::new(FakeLauncher {
            counters: harness.counters.clone(),
        }),
        harness.probe.clone(),
    )
}

#[tokio::test]
async fn test_healthy_on_third_attempt() {
    let harness = Harness::with_probe(ScriptedProbe::new(Some(3)));
    let interval = Duration::from_millis(20);

    let started = Instant::now();
    let mut deployment = gate(&harness).deploy(&spec(5, interval)).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(deployment.state(), DeploymentState::Healthy);
    assert_eq!(deployment.attempts(), 3);
    assert!(elapsed >= interval * 2, "polled too fast: {:?}", elapsed);

    deployment.stop().await.unwrap();
    deployment.stop().await.unwrap();
    assert_eq!(
        deployment.transitions(),
        &[DeploymentState::Starting, DeploymentState::Healthy, DeploymentState::Stopped]
    );
    assert_eq!(harness.counters.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_never_healthy_times_out_after_max_attempts() {
    let harness = Harness::with_probe(ScriptedProbe::new(None));

    let err = gate(&harness)
        .deploy(&spec(4, Duration::from_millis(5)))
        .await
        .err()
        .unwrap();

    match err {
        DeployError::StartupTimeout {
            attempts,
            diagnostics,
        } => {
            assert_eq!(attempts, 4);
            assert!(diagnostics.service_log.contains("Traceback"));
            assert!(diagnostics.process_listing.contains("bentoml serve"));
        }
        other => panic!("expected startup timeout, got {:?}", other),
    }
    assert_eq!(harness.probe.probes.load(Ordering::SeqCst), 4);
    assert_eq!(harness.counters.stops.load(Ordering::SeqCst), 1);
    assert_eq!(harness.counters.kills.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dropped_deployment_is_killed() {
    let harness = Harness::new();

    let deployment = gate(&harness)
        .deploy(&spec(1, Duration::from_millis(5)))
        .await
        .unwrap();
    drop(deployment);

    assert_eq!(harness.counters.stops.load(Ordering::SeqCst), 0);
    assert_eq!(harness.counters.kills.load(Ordering::SeqCst), 1);
}

const PIPELINE: &str = r#"
name: "aqi-forecast"
environments:
  heavy: {}
stages:
  - id: "serve"
    environment: "heavy"
    steps: [{ name: "train", run: "produce {dir}/model.pkl" }]
    deployment:
      command: "bentoml serve service:svc --port 3000"
      port: 3000
      interval_ms: 5
      max_attempts: 3
      validation:
        request:
          path: "/forecast"
          body: { steps: 72 }
  - id: "notify"
    environment: "heavy"
    steps: [{ name: "notify", run: "produce {dir}/notified" }]
"#;

#[tokio::test]
async fn test_startup_timeout_fails_the_run_with_diagnostics() {
    let harness = Harness::with_probe(ScriptedProbe::new(None));
    let pipeline = pipeline_from_yaml(&PIPELINE.replace("{dir}", &harness.root()));

    let (run, _) = harness.run(&pipeline).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_stage_status(&run, "serve", StageStatus::Failed);
    assert!(run.stage("notify").is_none());

    let error = stage(&run, "serve").error.clone().unwrap();
    assert_eq!(error.class, ErrorClass::StartupTimeout);
    assert!(error.message.contains("not healthy after 3 health checks"));
    let diagnostics = error.diagnostics.unwrap();
    assert!(diagnostics.contains("--- service log ---"));
    assert!(diagnostics.contains("model sarimax_model:latest not found"));
    assert_eq!(harness.counters.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_validation_still_stops_service() {
    let mut probe = ScriptedProbe::new(Some(1));
    probe.validation_status = 500;
    let harness = Harness::with_probe(probe);
    let pipeline = pipeline_from_yaml(&PIPELINE.replace("{dir}", &harness.root()));

    let (run, _) = harness.run(&pipeline).await;

    assert_run_status(&run, RunStatus::Failed);
    let error = stage(&run, "serve").error.clone().unwrap();
    assert_eq!(error.class, ErrorClass::ValidationFailure);
    assert!(error.message.contains("POST /forecast returned 500"));
    assert!(error.diagnostics.is_some());
    assert_eq!(harness.counters.launches.load(Ordering::SeqCst), 1);
    assert_eq!(harness.counters.stops.load(Ordering::SeqCst), 1);
    assert_eq!(harness.counters.kills.load(Ordering::SeqCst), 0);
}
