use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod analyze;
mod benchmark;
mod challenge;
mod config;
mod models;

#[derive(Parser)]
#[command(name = "deepshield", version, about = "Challenge-response liveness checks for recorded clips")]
struct Cli {
    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Detector asset directory (overrides DEEPSHIELD_MODEL_DIR).
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Engine thresholds file (overrides DEEPSHIELD_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify one clip and print the verdict as JSON.
    Analyze(analyze::Args),
    /// Run every clip of a labelled real/fake corpus and report accuracy.
    Benchmark(benchmark::Args),
    /// Issue a random challenge pattern with its display schedule.
    Challenge(challenge::Args),
    /// Inspect or install the detector asset.
    #[command(subcommand)]
    Models(models::Command),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match cli.log_file.clone() {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .finish();
            tracing::subscriber::with_default(subscriber, || run(cli))
        }
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::with_default(subscriber, || run(cli))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = config::Config::from_env().with_overrides(cli.model_dir, cli.config);

    match cli.command {
        Command::Analyze(args) => analyze::run(&config, args),
        Command::Benchmark(args) => benchmark::run(&config, args),
        Command::Challenge(args) => challenge::run(args),
        Command::Models(cmd) => models::run(&config, cmd),
    }
}
