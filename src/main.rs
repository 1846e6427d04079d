use anyhow::{Context, Result};
use forecast_pipeline::cli::commands::{
    HistoryCommand, ListCommand, PruneCommand, RunCommand, ValidateCommand,
};
use forecast_pipeline::cli::output::*;
use forecast_pipeline::cli::{Cli, Command};
use forecast_pipeline::core::config::{expand_home, PipelineConfig};
use forecast_pipeline::core::RunStatus;
use forecast_pipeline::execution::{
    ExecutionEngine, ExecutionEvent, ExecutionScheduler, StageExecutor,
};
use forecast_pipeline::persistence::{self, ExecutionSummary};
use forecast_pipeline::retention::RetentionManager;
use forecast_pipeline::store::FsObjectStore;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Prune(cmd) => prune_models(cmd).await?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<i32> {
    let config = PipelineConfig::from_file(&cmd.file)
        .with_context(|| format!("Failed to load pipeline config {}", cmd.file.display()))?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let mut pipeline = config.to_pipeline();

    for (key, value) in &cmd.variables {
        pipeline.variables.insert(key.clone(), value.clone());
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    for stage_id in &cmd.stages {
        if pipeline.stage(stage_id).is_none() {
            anyhow::bail!("Unknown stage '{}'", stage_id);
        }
    }
    let scheduler = if cmd.stages.is_empty() {
        ExecutionScheduler::new()
    } else {
        ExecutionScheduler::only(cmd.stages.clone())
    };
    let total_stages = scheduler.plan(&pipeline).len();

    let workdir = match &cmd.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    std::env::set_current_dir(&workdir)
        .with_context(|| format!("Failed to enter workdir {}", workdir.display()))?;

    let engine = ExecutionEngine::new(StageExecutor::from_pipeline(&pipeline, &workdir))
        .with_scheduler(scheduler);

    let progress = create_progress_bar(total_stages);
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        if let ExecutionEvent::StageStarted { stage_id, .. } = &event {
            bar.set_message(stage_id.clone());
        }
        if matches!(
            event,
            ExecutionEvent::StageSkipped { .. }
                | ExecutionEvent::StageCompleted { .. }
                | ExecutionEvent::StageFailed { .. }
        ) {
            bar.inc(1);
        }
        bar.println(format_execution_event(&event));
    });

    println!();
    let run = engine.execute(&pipeline).await;
    progress.finish_and_clear();

    println!("\n{}", format_run_report(&run));

    if !cmd.no_history {
        let summary = ExecutionSummary::from_run(&run, total_stages);
        match save_history(&summary).await {
            Ok(()) => println!(
                "\n{} Run saved to history (ID: {})",
                INFO,
                style(summary.execution_id).dim()
            ),
            Err(e) => warn!("Could not save run history: {:#}", e),
        }
    }

    match run.status() {
        RunStatus::Success => println!(
            "\n{} {} completed {}",
            CHECK,
            style(&pipeline.name).bold(),
            style("successfully").green()
        ),
        RunStatus::Partial => println!(
            "\n{} {} completed with recoverable failures",
            WARN,
            style(&pipeline.name).bold()
        ),
        RunStatus::Failed => {
            println!("\n{} {} {}", CROSS, style(&pipeline.name).bold(), style("failed").red());
            if let Some(stage) = run.failed_stage() {
                if let Some(err) = &stage.error {
                    error!("Stage {} failed: {}", stage.stage_id, err.message);
                }
            }
        }
    }

    Ok(run.exit_code())
}

async fn save_history(summary: &ExecutionSummary) -> Result<()> {
    let store = persistence::default_backend().await?;
    store.save_execution(summary).await
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Environments: {}", style(config.environments.len()).cyan());
            println!("  Artifacts: {}", style(config.artifacts.len()).cyan());

            let pipeline = config.to_pipeline();
            for (class, severity) in pipeline.severity.entries() {
                println!("  {:<20} {:?}", class, severity);
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(0)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(1)
        }
    }
}

async fn prune_models(cmd: &PruneCommand) -> Result<i32> {
    let root = expand_home(&cmd.root);
    let keep = cmd.keep as usize;
    let manager = RetentionManager::new(Arc::new(FsObjectStore::new(&root)));

    let keys = if cmd.dry_run {
        manager.plan(&cmd.prefix, keep).await?
    } else {
        manager.prune(&cmd.prefix, keep).await?
    };

    let verb = if cmd.dry_run { "Would delete" } else { "Deleted" };
    if keys.is_empty() {
        println!(
            "{} Nothing to prune under {} (keeping {})",
            INFO,
            style(&cmd.prefix).bold(),
            keep
        );
    } else {
        println!("{} {} {} model(s):", INFO, verb, keys.len());
        for key in &keys {
            println!("  {}", style(key).dim());
        }
    }
    Ok(0)
}

async fn list_pipelines(cmd: &ListCommand) -> Result<i32> {
    let store = persistence::default_backend().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(0);
    }

    let mut json_data = Vec::new();
    if !cmd.json {
        println!("{} Pipelines in history:", INFO);
    }

    for pipeline_name in &pipelines {
        let executions = store.list_executions(pipeline_name).await?;
        let count = |status: RunStatus| executions.iter().filter(|e| e.status == status).count();

        if cmd.json {
            json_data.push(serde_json::json!({
                "name": pipeline_name,
                "execution_count": executions.len(),
            }));
        } else if cmd.with_counts {
            println!(
                "  {} ({} runs: {} succeeded, {} partial, {} failed)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(count(RunStatus::Success)).green(),
                style(count(RunStatus::Partial)).yellow(),
                style(count(RunStatus::Failed)).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    if cmd.json {
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(0)
}

async fn show_history(cmd: &HistoryCommand) -> Result<i32> {
    let store = persistence::default_backend().await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary),
            None => println!("{} Execution not found", WARN),
        }
        return Ok(0);
    }

    let mut executions = match &cmd.pipeline {
        Some(pipeline_name) => store.list_executions(pipeline_name).await?,
        None => {
            let mut all_execs = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all_execs.extend(store.list_executions(&pipeline).await?);
            }
            all_execs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_execs
        }
    };
    executions.truncate(cmd.limit);

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(0);
    }

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, executions.len());
        for summary in &executions {
            println!("  {}", format_execution_summary(summary));
        }
    }

    Ok(0)
}

fn print_execution_details(summary: &ExecutionSummary) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({}/{})",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.completed_stages,
        summary.total_stages
    );
    if let Some(stage) = &summary.failed_stage {
        println!("  Failed stage: {}", style(stage).red());
    }
}
