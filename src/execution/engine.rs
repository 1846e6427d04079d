//! Main execution engine - orchestrates the entire pipeline run

use crate::core::{
    ErrorClass, Pipeline, PipelineRun, RunContext, RunRecorder, RunStatus, StageResult,
};
use crate::execution::{ExecutionScheduler, StageExecutor};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_stages: usize,
    },
    StageStarted {
        stage_id: String,
        index: usize,
    },
    StageSkipped {
        stage_id: String,
        reason: String,
    },
    StageCompleted {
        stage_id: String,
        degraded: bool,
        notes: Vec<String>,
    },
    StageFailed {
        stage_id: String,
        class: ErrorClass,
        error: String,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Main pipeline execution engine
pub struct ExecutionEngine {
    executor: StageExecutor,
    scheduler: ExecutionScheduler,
    event_handlers: Mutex<Vec<EventHandler>>,
}

impl ExecutionEngine {
    pub fn new(executor: StageExecutor) -> Self {
        Self {
            executor,
            scheduler: ExecutionScheduler::default(),
            event_handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_scheduler(mut self, scheduler: ExecutionScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.event_handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        let handlers: Vec<EventHandler> = self
            .event_handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for handler in handlers {
            handler(event.clone());
        }
    }

    /// Execute the pipeline with a fresh context
    pub async fn execute(&self, pipeline: &Pipeline) -> PipelineRun {
        let mut ctx = pipeline.create_context();
        self.execute_with_context(pipeline, &mut ctx).await
    }

    /// Execute the pipeline with a caller-prepared context
    ///
    /// Stages run in order. A fatal error stops the run; a recoverable one
    /// marks the stage OK with a note and the run continues.
    pub async fn execute_with_context(&self, pipeline: &Pipeline, ctx: &mut RunContext) -> PipelineRun {
        let mut recorder = RunRecorder::new(&pipeline.name);
        let run_id = recorder.run_id();
        let stages = self.scheduler.plan(pipeline);

        info!("Starting pipeline run: {} ({})", pipeline.name, run_id);
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            pipeline_name: pipeline.name.clone(),
            total_stages: stages.len(),
        });

        for (index, stage) in stages.into_iter().enumerate() {
            if let Some(reason) = self.scheduler.skip_reason(stage, ctx) {
                info!("Skipping stage {}: {}", stage.id, reason);
                self.emit_event(ExecutionEvent::StageSkipped {
                    stage_id: stage.id.clone(),
                    reason: reason.clone(),
                });
                recorder.record(StageResult::skipped(&stage.id, reason));
                continue;
            }

            info!("Running stage {}", stage.id);
            self.emit_event(ExecutionEvent::StageStarted {
                stage_id: stage.id.clone(),
                index,
            });

            let started = Instant::now();
            match self.executor.execute(stage, ctx, &pipeline.severity).await {
                Ok(report) => {
                    for output in &stage.outputs {
                        ctx.mark_produced(&output.name);
                    }
                    info!("Stage {} finished in {:?}", stage.id, started.elapsed());
                    self.emit_event(ExecutionEvent::StageCompleted {
                        stage_id: stage.id.clone(),
                        degraded: report.degraded,
                        notes: report.notes.clone(),
                    });
                    recorder.record(StageResult::ok(
                        &stage.id,
                        report.notes,
                        report.degraded,
                        started.elapsed(),
                    ));
                }
                Err(err) if !pipeline.severity.is_fatal(err.class()) => {
                    warn!("Stage {} hit recoverable {}: {}", stage.id, err.class(), err);
                    let notes = vec![err.to_string()];
                    let degraded = err.degrades_run();
                    self.emit_event(ExecutionEvent::StageCompleted {
                        stage_id: stage.id.clone(),
                        degraded,
                        notes: notes.clone(),
                    });
                    recorder.record(StageResult::ok(&stage.id, notes, degraded, started.elapsed()));
                }
                Err(err) => {
                    error!("Stage {} failed: {}", stage.id, err);
                    self.emit_event(ExecutionEvent::StageFailed {
                        stage_id: stage.id.clone(),
                        class: err.class(),
                        error: err.to_string(),
                    });
                    recorder.record(StageResult::failed(&stage.id, &err, started.elapsed()));
                    break;
                }
            }
        }

        let run = recorder.finish();
        info!(
            "Pipeline run finished: {} - {}",
            pipeline.name,
            run.status().as_str()
        );
        self.emit_event(ExecutionEvent::RunFinished {
            run_id,
            status: run.status(),
        });
        run
    }
}
