//! Deadlock Lab CLI - cause a deadlock, prevent it, recover from it

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use deadlock_lab_core::config::Config;
use deadlock_lab_core::domain::metrics::ScenarioSummary;
use deadlock_lab_core::domain::scenario::{
    ProgressReporter, Scenario, ScenarioKind, ScenarioRun, ScenarioSelector, ScenarioSettings,
};
use deadlock_lab_core::domain::worker::WorkerState;
use deadlock_lab_core::export::{ExportFormat, ExportOutcome, export_summaries};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "deadlock-lab")]
#[command(author, version, about = "Deadlock demonstration: cause it, prevent it, recover from it", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Quiet mode (no narration)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Scenario to run: todos, deadlock, ordenado, retry or banker
    #[arg(default_value = "todos")]
    scenario: ScenarioSelector,

    /// Number of workers per scenario
    #[arg(long)]
    workers: Option<usize>,

    /// Seconds each resource is held
    #[arg(long, value_name = "SECS")]
    hold: Option<f64>,

    /// Seconds before the detector declares deadlock
    #[arg(long, value_name = "SECS")]
    deadlock_timeout: Option<f64>,

    /// Seconds the retry policy waits for its second resource
    #[arg(long, value_name = "SECS")]
    retry_timeout: Option<f64>,

    /// Print progress as workers finish
    #[arg(long)]
    progress: bool,

    /// Write per-worker metrics to this file
    #[arg(long, value_name = "PATH")]
    metrics_out: Option<PathBuf>,

    /// Format of the metrics file (json or csv)
    #[arg(long, default_value = "json")]
    metrics_format: ExportFormat,

    /// Disable metric collection
    #[arg(long)]
    no_telemetry: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

/// Prints `[progress] k/n workers finished`
struct PrintProgress;

impl ProgressReporter for PrintProgress {
    fn started(&self, total: usize) {
        println!("[progress] 0/{} workers finished", total);
    }

    fn finished(&self, completed: usize, total: usize) {
        println!("[progress] {}/{} workers finished", completed, total);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; narration goes to stdout, logs to stderr
    let default_level = if cli.quiet { "deadlock_lab=warn" } else { "deadlock_lab=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Config { action }) => cmd_config(action, cli.quiet),
        None => cmd_run(cli.run, cli.quiet).await,
    }
}

async fn cmd_run(args: RunArgs, quiet: bool) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    let sim = &mut config.simulation;
    if let Some(workers) = args.workers {
        sim.workers = workers;
    }
    if let Some(hold) = args.hold {
        sim.hold_time_secs = hold;
    }
    if let Some(timeout) = args.deadlock_timeout {
        sim.deadlock_timeout_secs = timeout;
    }
    if let Some(timeout) = args.retry_timeout {
        sim.retry_timeout_secs = timeout;
    }
    if args.progress {
        sim.show_progress = true;
    }
    if args.no_telemetry {
        sim.telemetry = false;
    }
    config.validate().context("Invalid simulation settings")?;

    let settings = config.scenario_settings();
    let show_progress = config.simulation.show_progress && !quiet;
    let kinds = args.scenario.kinds();
    info!(scenarios = kinds.len(), workers = settings.workers, "Starting run");

    let mut summaries: Vec<ScenarioSummary> = Vec::new();
    for kind in kinds {
        if !quiet {
            print_header(kind, &settings);
        }

        let mut scenario = Scenario::new(kind, settings);
        if show_progress {
            scenario = scenario.with_progress(Arc::new(PrintProgress));
        }
        let run = scenario
            .run()
            .await
            .with_context(|| format!("Scenario '{}' aborted", kind))?;

        if !quiet {
            print_run(&run);
        }
        summaries.extend(run.summary);
    }

    if let Some(path) = args.metrics_out {
        match export_summaries(&summaries, &path, args.metrics_format)
            .with_context(|| format!("Failed to export metrics to {}", path.display()))?
        {
            ExportOutcome::Written { path, rows } => {
                if !quiet {
                    println!("Metrics written to {} ({} records)", path.display(), rows);
                }
            }
            ExportOutcome::Skipped => {
                if !quiet {
                    println!("No metrics collected; nothing written to {}", path.display());
                }
            }
        }
    }

    Ok(())
}

fn print_header(kind: ScenarioKind, settings: &ScenarioSettings) {
    println!();
    println!("=== {} ===", kind.title());
    let deadline = if kind.has_deadline() {
        format!("{:.2}s", settings.deadlock_timeout.as_secs_f64())
    } else {
        "none".to_string()
    };
    println!(
        "Workers: {} | hold {:.2}s | retry timeout {:.2}s | detector deadline {}",
        settings.workers,
        settings.timing.hold_time.as_secs_f64(),
        settings.timing.retry_timeout.as_secs_f64(),
        deadline,
    );
}

fn print_run(run: &ScenarioRun) {
    println!("Outcome: {}", run.outcome);

    for worker in &run.workers {
        let label = match worker.state {
            WorkerState::Done => "done",
            WorkerState::Killed => "killed",
            _ => "failed",
        };
        println!(
            "  {}: {} after {:.2}s (waited {:.2}s, {} retries)",
            worker.name,
            label,
            worker.duration.as_secs_f64(),
            worker.wait_time.as_secs_f64(),
            worker.retries,
        );
    }

    if let Some(report) = &run.deadlock {
        println!(
            "Deadlock detected after {:.2}s; stuck: {}",
            report.deadline_secs,
            report.stuck_names().join(", ")
        );
        for edge in &report.edges {
            println!("  waits-for: {}", edge);
        }
        if report.has_cycle() {
            let mut cycle = report.cycle.clone();
            cycle.extend(report.cycle.first().cloned());
            println!("  cycle: {}", cycle.join(" -> "));
        }
    }

    if !run.resources.is_empty() {
        let states: Vec<String> = run
            .resources
            .iter()
            .map(|r| match &r.owner {
                Some(owner) => format!("{} held by {}", r.id, owner),
                None => format!("{} free", r.id),
            })
            .collect();
        println!("Resources: {}", states.join(", "));
    }

    if let Some(summary) = &run.summary {
        let fmt = |value: Option<f64>| value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}s", v));
        println!(
            "Metrics: mean duration {} | mean wait {} | mean retries {}",
            fmt(summary.mean_duration_secs),
            fmt(summary.mean_wait_secs),
            summary
                .mean_retries
                .map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v)),
        );
        if !summary.unreported.is_empty() {
            println!("Workers without a final record: {}", summary.unreported.join(", "));
        }
    }

    println!("{}", run.kind.remark(run.outcome));
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
