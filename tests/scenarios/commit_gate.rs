//! Test: committing stage outputs with rejected pushes and no-op commits

use crate::helpers::*;
use forecast_pipeline::core::{ArtifactRef, RunStatus, StageStatus};
use forecast_pipeline::vcs::{CommitGate, CommitOutcome};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const PIPELINE: &str = r#"
name: "aqi-forecast"
environments:
  light: {}
artifacts:
  raw_data:
    remote_key: "data/raw.csv"
    local_path: "{dir}/raw.csv"
    metadata_path: "{dir}/raw.csv"
vcs:
  max_push_retries: 2
severity:
  commit_conflict: {commit_conflict}
stages:
  - id: "fetch"
    environment: "light"
    steps: [{ name: "fetch", run: "produce {dir}/raw.csv" }]
    outputs: ["raw_data"]
    commit_message: "Update raw data"
  - id: "report"
    environment: "light"
    steps: [{ name: "report", run: "produce {dir}/report.txt" }]
"#;

fn pipeline(harness: &Harness, commit_conflict: &str) -> forecast_pipeline::Pipeline {
    pipeline_from_yaml(
        &PIPELINE
            .replace("{commit_conflict}", commit_conflict)
            .replace("{dir}", &harness.root()),
    )
}

fn artifact(harness: &Harness) -> ArtifactRef {
    let mut artifact = ArtifactRef::new("raw_data", "data/raw.csv", harness.path("raw.csv"));
    artifact.metadata_path = Some(harness.path("raw.csv"));
    artifact
}

#[tokio::test]
async fn test_identical_content_is_noop_both_times() {
    let harness = Harness::new();
    std::fs::write(harness.path("raw.csv"), "md5: 3f2a\n").unwrap();
    harness.vcs.seed(&harness.path("raw.csv"));
    let gate = CommitGate::new(harness.vcs.clone(), 2);

    let first = gate.commit_and_push(&artifact(&harness), "Update raw data").await;
    let second = gate.commit_and_push(&artifact(&harness), "Update raw data").await;

    assert_eq!(first, CommitOutcome::Noop);
    assert_eq!(second, CommitOutcome::Noop);
    assert_eq!(harness.vcs.commits.load(Ordering::SeqCst), 0);
    assert_eq!(harness.vcs.pushes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_changed_content_commits_once() {
    let harness = Harness::new();
    std::fs::write(harness.path("raw.csv"), "md5: 9c1e\n").unwrap();
    let gate = CommitGate::new(harness.vcs.clone(), 2);

    let first = gate.commit_and_push(&artifact(&harness), "Update raw data").await;
    let second = gate.commit_and_push(&artifact(&harness), "Update raw data").await;

    assert_eq!(first, CommitOutcome::Committed { push_attempts: 1 });
    assert_eq!(second, CommitOutcome::Noop);
    assert_eq!(harness.vcs.commits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_push_rebases_and_retries() {
    let mut harness = Harness::new();
    harness.vcs = Arc::new(ScriptedVcs::rejecting(2));

    let (run, _) = harness.run(&pipeline(&harness, "recoverable")).await;

    assert_run_status(&run, RunStatus::Success);
    assert_eq!(harness.vcs.pushes.load(Ordering::SeqCst), 3);
    assert_eq!(harness.vcs.rebases.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_exhausted_push_retries_degrade_the_run() {
    let mut harness = Harness::new();
    harness.vcs = Arc::new(ScriptedVcs::rejecting(10));

    let (run, _) = harness.run(&pipeline(&harness, "recoverable")).await;

    // 1 + max_push_retries attempts, then the stage continues
    assert_eq!(harness.vcs.pushes.load(Ordering::SeqCst), 3);
    assert_run_status(&run, RunStatus::Partial);
    assert_stage_status(&run, "fetch", StageStatus::Ok);
    let fetch = stage(&run, "fetch");
    assert!(fetch.degraded);
    assert!(fetch.notes.iter().any(|n| n.contains("push rejected after 3 attempts")));
    assert_stage_status(&run, "report", StageStatus::Ok);
    // The artifact itself still reached the remote
    assert!(harness.remote.contains("data/raw.csv").await);
}

#[tokio::test]
async fn test_commit_conflict_can_be_fatal() {
    let mut harness = Harness::new();
    harness.vcs = Arc::new(ScriptedVcs::rejecting(10));

    let (run, _) = harness.run(&pipeline(&harness, "fatal")).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_stage_status(&run, "fetch", StageStatus::Failed);
    assert!(run.stage("report").is_none());
}

#[tokio::test]
async fn test_rebase_conflict_stops_retrying() {
    let harness = Harness::new();
    let vcs = Arc::new(ScriptedVcs::conflicting());
    std::fs::write(harness.path("raw.csv"), "md5: 77aa\n").unwrap();
    let gate = CommitGate::new(vcs.clone(), 2);

    let outcome = gate.commit_and_push(&artifact(&harness), "Update raw data").await;

    match outcome {
        CommitOutcome::Failed { reason } => assert!(reason.contains("rebase failed")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(vcs.pushes.load(Ordering::SeqCst), 1);
}
