//! Roast CLI: command line brew for training, scoring and timing models.
//!
//! usage: roast <command> [flags]

mod commands;

use clap::{CommandFactory, Parser};
use roast_core::config::{CliOverrides, load_config};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Roast: train or finetune a model, score it, benchmark it.
#[derive(Parser, Debug)]
#[command(
    name = "roast",
    version,
    about,
    long_about = None,
    after_help = "commands:\n  \
        train           train or finetune a model\n  \
        test            score a model\n  \
        device_query    show GPU diagnostic information\n  \
        time            benchmark model execution time\n  \
        autotune        autotune a model\n  \
        actions         list available commands"
)]
struct Cli {
    /// Command to run
    command: Option<String>,

    /// Run in GPU mode on given device IDs separated by ','. Use '--gpu all'
    /// to run on all available GPUs.
    #[arg(long)]
    gpu: Option<String>,

    /// The solver definition file.
    #[arg(long)]
    solver: Option<PathBuf>,

    /// The model definition file.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Network phase (TRAIN or TEST). Only used for 'time'.
    #[arg(long)]
    phase: Option<String>,

    /// Network level.
    #[arg(long)]
    level: Option<i32>,

    /// Network stages, separated by ','.
    #[arg(long)]
    stage: Option<String>,

    /// Optional; the snapshot solver state to resume training.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Optional; the pretrained weights to initialize finetuning, separated
    /// by ','. Cannot be set simultaneously with snapshot.
    #[arg(long)]
    weights: Option<String>,

    /// The number of iterations to run.
    #[arg(long)]
    iterations: Option<usize>,

    /// Optional; action to take when a SIGINT signal is received:
    /// snapshot, stop or none.
    #[arg(long)]
    sigint_effect: Option<String>,

    /// Optional; action to take when a SIGHUP signal is received:
    /// snapshot, stop or none.
    #[arg(long)]
    sighup_effect: Option<String>,

    /// Optional; layer-wise timing in 'time'.
    #[arg(long)]
    lt: bool,

    /// Optional; enables detection evaluation in 'test'.
    #[arg(long)]
    detection: bool,

    /// Optional; average precision version: 11point, MaxIntegral or Integral.
    #[arg(long)]
    ap: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the command's report as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            gpu: self.gpu.clone(),
            solver: self.solver.clone(),
            model: self.model.clone(),
            phase: self.phase.clone(),
            level: self.level,
            stage: self.stage.clone(),
            snapshot: self.snapshot.clone(),
            weights: self.weights.clone(),
            iterations: self.iterations,
            sigint_effect: self.sigint_effect.clone(),
            sighup_effect: self.sighup_effect.clone(),
            lt: self.lt.then_some(true),
            detection: self.detection.then_some(true),
            ap: self.ap.clone(),
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    let log_dir = directories::ProjectDirs::from("dev", "roast", "roast")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "roast.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let Some(command) = cli.command.as_deref() else {
        Cli::command().print_help()?;
        return Ok(ExitCode::SUCCESS);
    };

    let config = load_config(cli.config.as_deref(), &cli.overrides())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // Signals are received here; the command itself runs on this thread.
    let signal_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("roast-signals")
        .enable_all()
        .build()?;

    let context = commands::Context::new(config, signal_runtime.handle().clone(), cli.output);
    let registry = commands::register(&context)?;
    let status = registry.dispatch(command);

    Ok(if status == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
