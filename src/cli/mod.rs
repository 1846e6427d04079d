//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ListCommand, PruneCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Forecasting pipeline orchestrator
#[derive(Debug, Parser, Clone)]
#[command(name = "forecast-pipeline")]
#[command(version)]
#[command(about = "Runs the daily forecasting pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Delete old models beyond the retention limit
    Prune(PruneCommand),

    /// List pipelines with recorded runs
    List(ListCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
