//! Test: a full daily run from data fetch to a validated deployment

use crate::helpers::*;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use forecast_pipeline::core::{RunStatus, StageStatus};
use forecast_pipeline::deploy::HttpMethod;
use forecast_pipeline::execution::ExecutionEvent;
use forecast_pipeline::store::ObjectStore;
use std::sync::atomic::Ordering;

const PIPELINE: &str = r#"
name: "aqi-forecast"
environments:
  light:
    dependencies: ["pandas", "requests"]
  heavy:
    dependencies: ["statsmodels", "bentoml"]
artifacts:
  raw_data:
    remote_key: "data/raw.csv"
    local_path: "{dir}/raw.csv"
  features:
    remote_key: "data/features.csv"
    local_path: "{dir}/features.csv"
model_store:
  root: "{dir}/models"
stages:
  - id: "fetch"
    environment: "light"
    inputs: [{ artifact: "raw_data", optional: true }]
    steps: [{ name: "fetch", run: "produce {dir}/raw.csv" }]
    outputs: ["raw_data"]
    commit_message: "Update raw data"
  - id: "engineer"
    environment: "light"
    inputs: [{ artifact: "raw_data" }]
    steps: [{ name: "preprocess", run: "produce {dir}/features.csv" }]
    outputs: ["features"]
    commit_message: "Update features"
  - id: "serve"
    environment: "heavy"
    steps: [{ name: "train", run: "produce {dir}/model.pkl" }]
    retention: { family_prefix: "sarimax_model/", keep: 3 }
    deployment:
      command: "bentoml serve service:svc --port 3000"
      port: 3000
      health_path: "/healthz"
      interval_ms: 10
      max_attempts: 5
      validation:
        request:
          path: "/forecast"
          body: { steps: 72 }
"#;

async fn seed_models(harness: &Harness, count: i64) {
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    for day in 0..count {
        harness
            .models
            .put_at(
                &format!("sarimax_model/v{}", day),
                b"pickle".to_vec(),
                base + ChronoDuration::days(day),
            )
            .await;
    }
}

#[tokio::test]
async fn test_full_run_succeeds() {
    let harness = Harness::with_probe(ScriptedProbe::new(Some(2)));
    seed_models(&harness, 5).await;
    let pipeline = pipeline_from_yaml(&PIPELINE.replace("{dir}", &harness.root()));

    let (run, events) = harness.run(&pipeline).await;

    assert_run_status(&run, RunStatus::Success);
    assert_eq!(run.exit_code(), 0);
    assert_execution_order(&run, &["fetch", "engineer", "serve"]);
    for id in ["fetch", "engineer", "serve"] {
        assert_stage_status(&run, id, StageStatus::Ok);
        assert!(!stage(&run, id).degraded);
    }

    // Outputs reached the remote and were committed once each
    assert_eq!(harness.remote.keys().await, vec!["data/features.csv", "data/raw.csv"]);
    assert_eq!(harness.vcs.commits.load(Ordering::SeqCst), 2);

    // Retention kept the three newest models
    assert_eq!(
        harness.models.keys().await,
        vec!["sarimax_model/v2", "sarimax_model/v3", "sarimax_model/v4"]
    );
    assert!(harness.models.get("sarimax_model/v0").await.is_err());

    // Deployment went STARTING -> HEALTHY -> STOPPED and was stopped once
    let serve_notes = &stage(&run, "serve").notes;
    assert!(serve_notes.iter().any(|n| n.contains("pruned 2 model(s)")));
    assert!(serve_notes
        .iter()
        .any(|n| n.contains("STARTING -> HEALTHY -> STOPPED after 2 health check(s)")));
    assert_eq!(harness.counters.launches.load(Ordering::SeqCst), 1);
    assert_eq!(harness.counters.stops.load(Ordering::SeqCst), 1);
    assert_eq!(harness.counters.kills.load(Ordering::SeqCst), 0);

    let requests = harness.probe.requests.lock().unwrap();
    let validation = requests.last().unwrap();
    assert_eq!(validation.url, "http://127.0.0.1:3000/forecast");
    assert_eq!(validation.method, HttpMethod::Post);
    assert_eq!(validation.body, Some(serde_json::json!({ "steps": 72 })));

    // The two light stages shared one provisioning
    assert_eq!(harness.provisioner.count("light"), 1);
    assert_eq!(harness.provisioner.count("heavy"), 1);

    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunFinished {
            status: RunStatus::Success,
            ..
        })
    ));
}

#[tokio::test]
async fn test_first_ever_run_without_remote_data() {
    let harness = Harness::new();
    let pipeline = pipeline_from_yaml(&PIPELINE.replace("{dir}", &harness.root()));

    let (run, _) = harness.run(&pipeline).await;

    assert_run_status(&run, RunStatus::Success);
    assert!(stage(&run, "fetch")
        .notes
        .iter()
        .any(|n| n.contains("optional input 'raw_data' not found")));
    assert!(harness.models.keys().await.is_empty());
}

#[tokio::test]
async fn test_rerun_with_unchanged_outputs_is_clean() {
    let harness = Harness::new();
    let pipeline = pipeline_from_yaml(&PIPELINE.replace("{dir}", &harness.root()));

    let (first, _) = harness.run(&pipeline).await;
    let (second, _) = harness.run(&pipeline).await;

    assert_run_status(&first, RunStatus::Success);
    // Nothing to commit is not a degradation
    assert_run_status(&second, RunStatus::Success);
    assert!(stage(&second, "fetch")
        .notes
        .iter()
        .any(|n| n.contains("nothing to commit for 'raw_data'")));
    assert_eq!(harness.vcs.commits.load(Ordering::SeqCst), 2);
}
