use anyhow::Context;
use ap_engine::{global_registry, OsSeedSource, RunnerConfig, SystemClock};
use ap_optimizer::TuningRuleset;
use ap_types::WorkloadConfig;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Score a training algorithm on a benchmark workload.
#[derive(Parser, Debug)]
#[command(name = "submission-runner", version, about, long_about = None)]
struct Cli {
    /// Registry key of the workload, e.g. blobs_native
    #[arg(long)]
    workload: Option<String>,

    /// Submission to score, e.g. submissions/adamw
    #[arg(long)]
    submission_path: Option<String>,

    /// Who tunes hyperparameters: external or self
    #[arg(long)]
    tuning_ruleset: Option<TuningRuleset>,

    /// Search-space JSON file for external tuning
    #[arg(long)]
    tuning_search_space: Option<PathBuf>,

    /// Number of external tuning trials
    #[arg(long)]
    num_tuning_trials: Option<usize>,

    /// Dataset root handed to the workload
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Runner configuration JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the full score report as JSON
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// List registered workloads and submissions, then exit
    #[arg(long)]
    list: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8, json: bool) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    };
    tracing_subscriber::registry().with(layer).init();
}

fn resolve_config(cli: &Cli) -> anyhow::Result<RunnerConfig> {
    let mut config = match &cli.config {
        Some(path) => RunnerConfig::from_file(path)
            .with_context(|| format!("reading runner config {}", path.display()))?,
        None => RunnerConfig::default(),
    };
    config = config.with_env()?;

    if let Some(workload) = &cli.workload {
        config = config.with_workload(workload.clone());
    }
    if let Some(path) = &cli.submission_path {
        config = config.with_submission_path(path.clone());
    }
    if let Some(ruleset) = cli.tuning_ruleset {
        config = config.with_tuning_ruleset(ruleset);
    }
    if let Some(space) = &cli.tuning_search_space {
        config = config.with_search_space(space.clone());
    }
    if let Some(n) = cli.num_tuning_trials {
        config = config.with_num_tuning_trials(n);
    }
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir.clone());
    }
    if let Some(report) = &cli.report_json {
        config = config.with_report_json(report.clone());
    }
    Ok(config)
}

fn print_catalog() -> anyhow::Result<()> {
    let registry = global_registry().read();
    println!("Workloads:");
    for name in registry.workload_names() {
        println!("  {name}");
        for submission in registry.submission_paths(name)? {
            println!("    {submission}");
        }
    }
    println!("Reference workload presets:");
    for name in WorkloadConfig::preset_names() {
        if let Some(preset) = WorkloadConfig::preset(name) {
            println!(
                "  {name}: {} {:?} {} within {}s",
                preset.target_metric,
                preset.goal_direction,
                preset.target_value,
                preset.max_allowed_runtime_sec
            );
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    if cli.list {
        return print_catalog();
    }

    let config = resolve_config(&cli)?;
    config.validate()?;
    info!(
        "Scoring {} on {} with {} tuning",
        config.submission_path, config.workload, config.tuning_ruleset
    );

    let report = global_registry().read().score(
        &config.workload,
        &config.submission_path,
        &config.tuning_request(),
        &SystemClock::new(),
        &mut OsSeedSource,
    )?;

    println!("Score: {}", report.score);
    if let Some(path) = &config.report_json {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
        info!("Wrote score report to {}", path.display());
    }
    Ok(())
}
