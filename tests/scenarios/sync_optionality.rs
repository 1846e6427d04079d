//! Test: optional inputs may be missing, mandatory ones may not

use crate::helpers::*;
use forecast_pipeline::core::{ArtifactRef, ErrorClass, RunStatus, StageInput, StageStatus};
use forecast_pipeline::store::{FsObjectStore, ObjectStore};
use forecast_pipeline::sync::{ArtifactSyncClient, ObjectStoreArtifacts, PullOutcome};
use std::sync::Arc;

const PIPELINE: &str = r#"
name: "aqi-forecast"
environments:
  light: {}
artifacts:
  history:
    remote_key: "data/history.csv"
    local_path: "{dir}/history.csv"
stages:
  - id: "fetch"
    environment: "light"
    inputs: [{ artifact: "history", optional: {optional} }]
    steps: [{ name: "fetch", run: "produce {dir}/history.csv" }]
    outputs: ["history"]
"#;

fn pipeline(harness: &Harness, optional: bool) -> forecast_pipeline::Pipeline {
    pipeline_from_yaml(
        &PIPELINE
            .replace("{optional}", &optional.to_string())
            .replace("{dir}", &harness.root()),
    )
}

#[tokio::test]
async fn test_optional_missing_input_continues() {
    let harness = Harness::new();
    let (run, _) = harness.run(&pipeline(&harness, true)).await;

    assert_run_status(&run, RunStatus::Success);
    assert_stage_status(&run, "fetch", StageStatus::Ok);
    assert_eq!(harness.runner.executed(), vec!["fetch"]);
    assert!(harness.remote.contains("data/history.csv").await);
}

#[tokio::test]
async fn test_mandatory_missing_input_aborts() {
    let harness = Harness::new();
    let (run, _) = harness.run(&pipeline(&harness, false)).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_eq!(
        stage(&run, "fetch").error.as_ref().unwrap().class,
        ErrorClass::SyncFailure
    );
    assert!(harness.runner.executed().is_empty());
}

#[tokio::test]
async fn test_present_input_is_fetched() {
    let harness = Harness::new();
    harness
        .remote
        .put_at("data/history.csv", b"date,aqi\n2024-03-01,41\n".to_vec(), chrono::Utc::now())
        .await;

    let client = ArtifactSyncClient::new(Arc::new(ObjectStoreArtifacts::new(harness.remote.clone())));
    let input = StageInput {
        artifact: ArtifactRef::new("history", "data/history.csv", harness.path("nested/history.csv")),
        optional: false,
    };

    assert_eq!(client.pull(&input).await.unwrap(), PullOutcome::Fetched);
    assert_eq!(
        std::fs::read_to_string(harness.path("nested/history.csv")).unwrap(),
        "date,aqi\n2024-03-01,41\n"
    );
}

/// Pushing through a directory-backed remote lands the file under its key
#[tokio::test]
async fn test_directory_remote_round_trip() {
    let harness = Harness::new();
    let remote = Arc::new(FsObjectStore::new(harness.path("remote")));
    let client = ArtifactSyncClient::new(Arc::new(ObjectStoreArtifacts::new(remote.clone())));

    std::fs::write(harness.path("features.csv"), "pm25,lag1\n").unwrap();
    let artifact = ArtifactRef::new("features", "data/features.csv", harness.path("features.csv"));
    client.push(&artifact).await.unwrap();

    assert_eq!(remote.get("data/features.csv").await.unwrap(), b"pm25,lag1\n");

    let missing = StageInput {
        artifact: ArtifactRef::new("weather", "data/weather.csv", harness.path("weather.csv")),
        optional: true,
    };
    assert_eq!(client.pull(&missing).await.unwrap(), PullOutcome::Missing);
    assert!(!harness.path("weather.csv").exists());
}
