//! Test: Failure Handling - fatal errors stop the run, recoverable ones don't

use crate::helpers::*;
use forecast_pipeline::core::{ErrorClass, RunStatus, StageStatus};
use forecast_pipeline::execution::ExecutionEvent;
use std::sync::atomic::Ordering;

const PIPELINE: &str = r#"
name: "aqi-forecast"
environments:
  light: {}
artifacts:
  raw_data:
    remote_key: "data/raw.csv"
    local_path: "{dir}/raw.csv"
  weather:
    remote_key: "data/weather.csv"
    local_path: "{dir}/weather.csv"
  features:
    remote_key: "data/features.csv"
    local_path: "{dir}/features.csv"
severity:
  step_failure: {step_failure}
stages:
  - id: "fetch"
    environment: "light"
    steps: [{ name: "fetch", run: "produce {dir}/raw.csv" }]
    outputs: ["raw_data"]
  - id: "engineer"
    environment: "light"
    inputs: [{ artifact: "raw_data" }, { artifact: "weather" }]
    steps: [{ name: "preprocess", run: "{engineer}" }]
    outputs: ["features"]
  - id: "report"
    environment: "light"
    steps: [{ name: "report", run: "produce {dir}/report.txt" }]
"#;

fn pipeline(harness: &Harness, engineer: &str, step_failure: &str) -> forecast_pipeline::Pipeline {
    let yaml = PIPELINE
        .replace("{engineer}", engineer)
        .replace("{step_failure}", step_failure)
        .replace("{dir}", &harness.root());
    pipeline_from_yaml(&yaml)
}

/// Mandatory input missing from the remote aborts the run
#[tokio::test]
async fn test_missing_mandatory_input_fails_run() {
    let harness = Harness::new();
    let pipeline = pipeline(&harness, "produce {dir}/features.csv", "fatal");

    let (run, events) = harness.run(&pipeline).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_eq!(run.exit_code(), 1);
    assert_stage_status(&run, "fetch", StageStatus::Ok);
    assert_stage_status(&run, "engineer", StageStatus::Failed);
    assert!(run.stage("report").is_none(), "report must never be attempted");

    let error = stage(&run, "engineer").error.clone().unwrap();
    assert_eq!(error.class, ErrorClass::SyncFailure);
    assert!(error.message.contains("weather"));

    // The failing stage never ran its payload
    assert_eq!(harness.runner.executed(), vec!["fetch"]);
    assert!(!harness.remote.contains("data/features.csv").await);

    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::StageFailed {
            stage_id,
            class: ErrorClass::SyncFailure,
            ..
        } if stage_id == "engineer"
    )));
}

#[tokio::test]
async fn test_step_failure_keeps_traceback() {
    let harness = Harness::new();
    harness
        .remote
        .put_at("data/weather.csv", b"temp\n".to_vec(), chrono::Utc::now())
        .await;
    let pipeline = pipeline(&harness, "explode", "fatal");

    let (run, _) = harness.run(&pipeline).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_execution_order(&run, &["fetch", "engineer"]);
    let error = stage(&run, "engineer").error.clone().unwrap();
    assert_eq!(error.class, ErrorClass::StepFailure);
    assert!(error.message.contains("step 'preprocess' failed"));
    assert!(error.diagnostics.unwrap().contains("ValueError: Insufficient data"));
    // Only successful stages commit their outputs
    assert_eq!(harness.vcs.commits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recoverable_step_failure_yields_partial() {
    let harness = Harness::new();
    harness
        .remote
        .put_at("data/weather.csv", b"temp\n".to_vec(), chrono::Utc::now())
        .await;
    let pipeline = pipeline(&harness, "explode", "recoverable");

    let (run, _) = harness.run(&pipeline).await;

    assert_run_status(&run, RunStatus::Partial);
    assert_eq!(run.exit_code(), 0);
    assert_stage_status(&run, "engineer", StageStatus::Ok);
    assert!(stage(&run, "engineer").degraded);
    assert_stage_status(&run, "report", StageStatus::Ok);
    assert_eq!(harness.runner.executed(), vec!["fetch", "preprocess", "report"]);
}

#[tokio::test]
async fn test_setup_failure_is_fatal() {
    let mut harness = Harness::new();
    harness.provisioner = std::sync::Arc::new(CountingProvisioner::failing());
    let pipeline = pipeline(&harness, "produce {dir}/features.csv", "fatal");

    let (run, _) = harness.run(&pipeline).await;

    assert_run_status(&run, RunStatus::Failed);
    let error = stage(&run, "fetch").error.clone().unwrap();
    assert_eq!(error.class, ErrorClass::SetupFailure);
    assert!(error.message.contains("'light'"));
    assert!(harness.runner.executed().is_empty());
}
