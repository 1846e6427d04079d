//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Variable overrides (key=value)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub variables: Vec<(String, String)>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Directory the stages run in (defaults to the current directory)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Run only these stages, in declared order
    #[arg(long = "stage")]
    pub stages: Vec<String>,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Apply a retention policy to a filesystem model store
#[derive(Debug, Args, Clone)]
pub struct PruneCommand {
    /// Model store root directory
    #[arg(long)]
    pub root: PathBuf,

    /// Model family prefix, e.g. `sarimax_model/`
    #[arg(long)]
    pub prefix: String,

    /// Number of newest models to keep
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..))]
    pub keep: u64,

    /// Print what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
