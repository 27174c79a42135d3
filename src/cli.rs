//! CLI argument parsing for benchtree

use crate::workloads::Workload;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// JSON document keyed by thread (default)
    Json,
    /// Indented human-readable tree
    Pretty,
}

#[derive(Parser, Debug)]
#[command(name = "benchtree")]
#[command(version)]
#[command(about = "Hierarchical per-thread timing of instrumented workloads", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output (to stderr)
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an instrumented workload and print its timing report
    Run(RunArgs),
    /// Print a previously saved JSON report
    Inspect(InspectArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Workload to run
    #[arg(value_enum)]
    pub workload: Workload,

    /// Number of elements processed per run
    #[arg(short = 'n', long = "size", value_name = "N", default_value = "4096")]
    pub size: usize,

    /// Runs of each variant
    #[arg(short = 'i', long = "iterations", value_name = "COUNT", default_value = "10")]
    pub iterations: usize,

    /// Worker threads, each running the workload once
    #[arg(short = 't', long = "threads", value_name = "COUNT", default_value = "1")]
    pub threads: usize,

    /// Output format (json or pretty)
    #[arg(long = "format", value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Write the report to FILE instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Append a per-name timing summary (to stderr)
    #[arg(short = 'c', long = "summary")]
    pub summary: bool,
}

#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// Report file produced by `benchtree run --format json`
    #[arg(value_name = "FILE")]
    pub report: PathBuf,

    /// Print the per-name summary instead of the tree
    #[arg(short = 'c', long = "summary")]
    pub summary: bool,
}
