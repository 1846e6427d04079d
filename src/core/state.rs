//! Run state models

use crate::core::error::{ErrorClass, PipelineError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Every stage finished OK or SKIPPED with nothing degraded
    Success,
    /// A fatal stage failure aborted the run
    Failed,
    /// Every stage finished but a recoverable failure was absorbed
    Partial,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
            RunStatus::Partial => "PARTIAL",
        }
    }

    /// Parse a stored status, defaulting to `Failed` for unknown values
    pub fn parse_lossy(value: &str) -> Self {
        match value {
            "SUCCESS" => RunStatus::Success,
            "PARTIAL" => RunStatus::Partial,
            _ => RunStatus::Failed,
        }
    }
}

/// Outcome of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Ok,
    Skipped,
    Failed,
}

/// Failure detail attached to a stage result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub class: ErrorClass,
    pub message: String,
    /// Verbatim service logs, process listings or command output
    pub diagnostics: Option<String>,
}

impl From<&PipelineError> for StageError {
    fn from(err: &PipelineError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
            diagnostics: err.diagnostics().map(str::to_string),
        }
    }
}

/// Result of one attempted stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: String,
    pub status: StageStatus,
    pub error: Option<StageError>,
    pub notes: Vec<String>,
    /// A recoverable failure was absorbed while running this stage
    pub degraded: bool,
    pub duration_ms: u64,
}

impl StageResult {
    pub fn ok(stage_id: &str, notes: Vec<String>, degraded: bool, duration: Duration) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            status: StageStatus::Ok,
            error: None,
            notes,
            degraded,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn skipped(stage_id: &str, reason: String) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            status: StageStatus::Skipped,
            error: None,
            notes: vec![reason],
            degraded: false,
            duration_ms: 0,
        }
    }

    pub fn failed(stage_id: &str, error: &PipelineError, duration: Duration) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            status: StageStatus::Failed,
            error: Some(StageError::from(error)),
            notes: Vec::new(),
            degraded: false,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// A finalized pipeline run
///
/// Only [`RunRecorder::finish`] constructs one; afterwards it is read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    run_id: Uuid,
    pipeline_name: String,
    status: RunStatus,
    stages: Vec<StageResult>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn stages(&self) -> &[StageResult] {
        &self.stages
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Result for a given stage id
    pub fn stage(&self, stage_id: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }

    /// The stage that aborted the run, if any
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success | RunStatus::Partial => 0,
            RunStatus::Failed => 1,
        }
    }
}

/// Accumulates stage results for an in-flight run
#[derive(Debug)]
pub struct RunRecorder {
    run_id: Uuid,
    pipeline_name: String,
    started_at: DateTime<Utc>,
    stages: Vec<StageResult>,
}

impl RunRecorder {
    pub fn new(pipeline_name: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_name: pipeline_name.to_string(),
            started_at: Utc::now(),
            stages: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record(&mut self, result: StageResult) {
        self.stages.push(result);
    }

    pub fn results(&self) -> &[StageResult] {
        &self.stages
    }

    /// Finalize the run and derive its status
    pub fn finish(self) -> PipelineRun {
        let status = if self.stages.iter().any(|s| s.status == StageStatus::Failed) {
            RunStatus::Failed
        } else if self.stages.iter().any(|s| s.degraded) {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };

        PipelineRun {
            run_id: self.run_id,
            pipeline_name: self.pipeline_name,
            status,
            stages: self.stages,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
