//! CLI command definitions for the `stepflow` binary.
//!
//! Uses clap derive macros for argument parsing. Every command takes a
//! workflow file (YAML or JSON) and runs entirely in-process.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use stepflow_observe::LogFormat;

/// Validate, plan, and run workflow graphs.
#[derive(Parser)]
#[command(name = "stepflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for step transitions, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine configuration file.
    #[arg(long, global = true, env = "STEPFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow file for structural errors.
    Validate {
        /// Path to the workflow file.
        file: PathBuf,
    },

    /// Show the execution levels of a workflow.
    Plan {
        /// Path to the workflow file.
        file: PathBuf,
    },

    /// Execute a workflow and report every step's outcome.
    Run {
        /// Path to the workflow file.
        file: PathBuf,

        /// Input parameters as a JSON object.
        #[arg(long)]
        input: Option<String>,

        /// Read input parameters from a JSON file.
        #[arg(long, conflicts_with = "input")]
        input_file: Option<PathBuf>,

        /// Override the configured worker pool size.
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Append output step deliveries to this JSON-lines file.
        #[arg(long)]
        output_file: Option<PathBuf>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
