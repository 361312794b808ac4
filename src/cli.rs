// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::Parent;

/// Command-line interface for `retrio`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "retrio",
    version,
    about = "Orchestrate iterative trio re-training on a batch cluster.",
    long_about = None
)]
pub struct Cli {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RETRIO_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Plan and submit the phase DAG for each trio in the metadata file.
    Run(RunArgs),

    /// Reload the job ledger and report per-iteration pipeline state.
    Status(StatusArgs),

    /// Pick the best checkpoint from an eval-metrics file.
    ///
    /// This runs on a compute node as the `select_ckpt` phase of a training
    /// iteration; the orchestrator submits it, it does not call it inline.
    SelectCkpt(SelectCkptArgs),
}

/// Arguments shared by `run` and `status`.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Path to the trio metadata CSV.
    #[arg(long, value_name = "PATH")]
    pub metadata: String,

    /// Path to the per-phase resource configuration (JSON).
    #[arg(long, value_name = "PATH")]
    pub resources: String,

    /// Root directory for all run outputs (job scripts, ledgers, results).
    #[arg(long, value_name = "DIR")]
    pub output: String,

    /// Which parent genome the first iteration trains on.
    #[arg(long, value_enum)]
    pub parent: Parent,

    /// Number of held-out test genomes to use from the metadata columns.
    ///
    /// Defaults to every complete test-genome column triple found.
    #[arg(long, value_name = "N")]
    pub num_tests: Option<u32>,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// First iteration to process (1-based).
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub start_itr: u32,

    /// Last iteration to process (1-based, inclusive).
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub stop_itr: u32,

    /// Restart specification (JSON string), e.g.
    /// '{"make_examples:Father": [1, 2], "train_eval": [123456789]}'.
    #[arg(long, value_name = "JSON")]
    pub restart_jobs: Option<String>,

    /// Regenerate job scripts for restarted phases, replacing prior result
    /// files. Without this, restarts resubmit the previously generated
    /// scripts untouched.
    #[arg(long)]
    pub overwrite: bool,

    /// Build and print every planned job request without submitting anything
    /// or mutating the ledger.
    #[arg(long)]
    pub dry_run: bool,

    /// External training binary invoked by the generated job scripts.
    #[arg(long, value_name = "BIN", default_value = "deeptrainer")]
    pub trainer: String,

    /// Warm-start checkpoint for the first iteration.
    #[arg(long, value_name = "PATH")]
    pub warm_start: Option<String>,

    /// Number of parallel region shards for example generation.
    ///
    /// Defaults to the region file's interval count when the trio declares
    /// one, otherwise to the number of available CPUs.
    #[arg(long, value_name = "N")]
    pub num_regions: Option<u32>,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Query the scheduler for fresh job states before reporting.
    #[arg(long)]
    pub poll: bool,

    /// Region fan-out used when the run was submitted (must match for the
    /// reported plan to line up with the ledger).
    #[arg(long, value_name = "N")]
    pub num_regions: Option<u32>,
}

#[derive(Debug, Clone, Args)]
pub struct SelectCkptArgs {
    /// Eval-metrics CSV produced by the training phase.
    #[arg(long, value_name = "PATH")]
    pub metrics: String,

    /// File to write the selected checkpoint path to.
    #[arg(long, value_name = "PATH")]
    pub out: String,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `Cli::parse()`.
pub fn parse() -> Cli {
    Cli::parse()
}
