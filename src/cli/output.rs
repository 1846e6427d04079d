//! CLI output formatting

use crate::core::{PipelineRun, RunStatus, StageStatus};
use crate::execution::ExecutionEvent;
use crate::persistence::ExecutionSummary;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Success => style("SUCCESS").green().to_string(),
        RunStatus::Partial => style("PARTIAL").yellow().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format a stage status for display
pub fn format_stage_status(status: StageStatus, degraded: bool) -> String {
    match status {
        StageStatus::Ok if degraded => style("OK (degraded)").yellow().to_string(),
        StageStatus::Ok => style("OK").green().to_string(),
        StageStatus::Skipped => style("SKIPPED").dim().to_string(),
        StageStatus::Failed => style("FAILED").red().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

/// Format run summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Success => CHECK,
        RunStatus::Partial => WARN,
        RunStatus::Failed => CROSS,
    };

    let mut line = format!(
        "{} {} - {} - {} - {} ({}/{})",
        status_icon,
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.pipeline_name).bold(),
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        format_status(summary.status),
        summary.completed_stages,
        summary.total_stages,
    );
    if let Some(stage) = &summary.failed_stage {
        line.push_str(&format!(" failed at {}", style(stage).red()));
    }
    line
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            total_stages,
        } => format!(
            "{} Starting pipeline {} ({}) with {} stage(s)",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(run_id)).dim(),
            total_stages
        ),
        ExecutionEvent::StageStarted { stage_id, .. } => {
            format!("{} {}", SPINNER, style(stage_id).cyan())
        }
        ExecutionEvent::StageSkipped { stage_id, reason } => {
            format!("{} {} ({})", SKIP, style(stage_id).dim(), style(reason).dim())
        }
        ExecutionEvent::StageCompleted {
            stage_id,
            degraded,
            notes,
        } => {
            let icon = if *degraded { WARN } else { CHECK };
            let mut line = format!("{} {}", icon, style(stage_id).green());
            for note in notes {
                line.push_str(&format!("\n    {}", style(note).dim()));
            }
            line
        }
        ExecutionEvent::StageFailed {
            stage_id,
            class,
            error,
        } => format!(
            "{} {} [{}]: {}",
            CROSS,
            style(stage_id).red(),
            class,
            style(error).dim()
        ),
        ExecutionEvent::RunFinished { run_id, status } => format!(
            "{} Run ({}) finished: {}",
            INFO,
            style(short_id(run_id)).dim(),
            format_status(*status)
        ),
    }
}

/// Format the final per-stage report of a run
pub fn format_run_report(run: &PipelineRun) -> String {
    let mut lines = Vec::new();
    for stage in run.stages() {
        lines.push(format!(
            "  {:<24} {:<16} {}",
            stage.stage_id,
            format_stage_status(stage.status, stage.degraded),
            style(format_duration(stage.duration())).dim()
        ));
        if let Some(error) = &stage.error {
            lines.push(format!("    {} {}", style(error.class).red(), error.message));
            if let Some(diagnostics) = &error.diagnostics {
                lines.push(format_output(diagnostics, 40));
            }
        }
    }
    lines.join("\n")
}

/// Format captured output with truncation, keeping the last lines
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let kept = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            kept
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}.{}s", secs, duration.subsec_millis() / 100)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
