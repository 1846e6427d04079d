//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

use crate::core::{PipelineRun, RunStatus, StageStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique run ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Final run status
    pub status: RunStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub completed_at: Option<DateTime<Utc>>,

    /// Stages that finished OK or were skipped
    pub completed_stages: usize,

    /// Stages planned for the run
    pub total_stages: usize,

    /// Stage that aborted the run, if any
    pub failed_stage: Option<String>,
}

impl ExecutionSummary {
    /// Summarize a finished run
    pub fn from_run(run: &PipelineRun, total_stages: usize) -> Self {
        let completed_stages = run
            .stages()
            .iter()
            .filter(|s| s.status != StageStatus::Failed)
            .count();
        Self {
            execution_id: run.run_id(),
            pipeline_name: run.pipeline_name().to_string(),
            status: run.status(),
            started_at: run.started_at(),
            completed_at: Some(run.finished_at()),
            completed_stages,
            total_stages,
            failed_stage: run.failed_stage().map(|s| s.stage_id.clone()),
        }
    }

    /// Fraction of planned stages that completed
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 1.0;
        }
        self.completed_stages as f64 / self.total_stages as f64
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List runs of a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// List all pipeline names with recorded runs
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        execs.insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let mut result: Vec<ExecutionSummary> = execs
            .values()
            .filter(|e| e.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let execs = self.executions.read().await;
        let mut names: Vec<String> = execs.values().map(|e| e.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Open the default history backend
///
/// SQLite under the local data directory when the `sqlite` feature is on,
/// otherwise an in-memory store that lives as long as the process.
pub async fn default_backend() -> Result<Box<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        Ok(Box::new(SqliteExecutionStore::with_default_path().await?))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Box::new(InMemoryPersistence::new()))
    }
}
