use anyhow::{Context, Result};
use benchtree::cli::{Cli, Command, InspectArgs, OutputFormat, RunArgs};
use benchtree::environment::Environment;
use benchtree::report::Report;
use benchtree::workloads::{self, WorkloadParams};
use clap::Parser;
use std::io::Write;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Write `text` to `path`, or to stdout when no path is given
fn emit(text: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("failed to write report to {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}

/// Run the workload on worker threads, then flush the global environment
fn run_workload(args: RunArgs) -> Result<()> {
    if args.threads == 0 {
        anyhow::bail!("Invalid value for --threads: 0 (must be >= 1)");
    }

    let env = Environment::global();
    if !env.is_enabled() {
        tracing::warn!("recording is disabled, the report will be empty");
    }

    let params = WorkloadParams {
        size: args.size,
        iterations: args.iterations,
    };
    let workload = args.workload;

    let handles = (0..args.threads)
        .map(|i| {
            std::thread::Builder::new()
                .name(format!("worker-{}", i))
                .spawn(move || workloads::run(workload, params, Environment::global()))
                .context("failed to spawn worker thread")
        })
        .collect::<Result<Vec<_>>>()?;

    // Workers' trees are captured into the shared buffer as they exit
    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker thread panicked"))?;
    }

    let document = env.flush_to_string()?;
    let report = match (args.format, args.summary) {
        (OutputFormat::Json, false) => None,
        _ => Some(Report::parse(&document)?),
    };

    match (args.format, &report) {
        (OutputFormat::Pretty, Some(report)) => emit(&report.render_tree(), args.output.as_deref())?,
        _ => emit(&document, args.output.as_deref())?,
    }

    if let (true, Some(report)) = (args.summary, &report) {
        eprint!("{}", report.render_summary());
    }
    Ok(())
}

/// Print a saved report as a tree or a summary table
fn inspect_report(args: InspectArgs) -> Result<()> {
    let document = std::fs::read_to_string(&args.report)
        .with_context(|| format!("failed to read {}", args.report.display()))?;
    let report = Report::parse(&document)
        .with_context(|| format!("{} is not a timing report", args.report.display()))?;

    if args.summary {
        emit(&report.render_summary(), None)
    } else {
        emit(&report.render_tree(), None)
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match args.command {
        Command::Run(run) => run_workload(run),
        Command::Inspect(inspect) => inspect_report(inspect),
    }
}
