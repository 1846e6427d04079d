//! SQLite-based run history store

use crate::core::RunStatus;
use crate::persistence::{ExecutionSummary, PersistenceBackend};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const SUMMARY_COLUMNS: &str =
    "id, pipeline_name, status, started_at, completed_at, completed_stages, total_stages, failed_stage";

/// SQLite execution store
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("forecast-pipeline");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        let db_path = db_dir.join("runs.db");
        let db_path = db_path
            .to_str()
            .with_context(|| format!("Non UTF-8 database path: {}", db_path.display()))?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                completed_stages INTEGER NOT NULL DEFAULT 0,
                total_stages INTEGER NOT NULL DEFAULT 0,
                failed_stage TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON runs(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize schema")?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn summary_from_row(row: &SqliteRow) -> Result<ExecutionSummary> {
        Ok(ExecutionSummary {
            execution_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            status: RunStatus::parse_lossy(&row.get::<String, _>("status")),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            completed_stages: row.get::<i64, _>("completed_stages") as usize,
            total_stages: row.get::<i64, _>("total_stages") as usize,
            failed_stage: row.get("failed_stage"),
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteExecutionStore {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_name, status, started_at, completed_at, completed_stages, total_stages, failed_stage)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(execution.execution_id.to_string())
        .bind(&execution.pipeline_name)
        .bind(execution.status.as_str())
        .bind(Self::to_naive(execution.started_at))
        .bind(execution.completed_at.map(Self::to_naive))
        .bind(execution.completed_stages as i64)
        .bind(execution.total_stages as i64)
        .bind(execution.failed_stage.as_deref())
        .execute(&self.pool)
        .await
        .context("Failed to save execution")?;

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE id = ?1", SUMMARY_COLUMNS))
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load execution")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE pipeline_name = ?1 ORDER BY started_at DESC",
            SUMMARY_COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT pipeline_name FROM runs ORDER BY pipeline_name ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }
}
