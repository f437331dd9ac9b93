//! CLI entry point for the jamwatch congestion collector.
//!
//! Provides subcommands for running a single ingestion cycle, rebuilding
//! the static collections, and running both on their schedules.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use jamwatch::config::Config;
use jamwatch::context::Context;
use jamwatch::jobs::{self, CycleOutcome};
use tracing::warn;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "jamwatch")]
#[command(about = "Collects transit telemetry and derives per-region congestion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single feed ingestion cycle
    Ingest,
    /// Rebuild the static aggregate and stop collections once
    RebuildStatic,
    /// Run the scheduled ingest and rebuild loops
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/jamwatch.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("jamwatch.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    let ctx = Context::initialize(config).await?;

    match cli.command {
        Commands::Ingest => finish("ingest", jobs::ingest::run(&ctx).await),
        Commands::RebuildStatic => finish("rebuild", jobs::rebuild::run(&ctx).await),
        Commands::Watch => {
            watch(ctx).await;
            Ok(())
        }
    }
}

/// Map a one-shot cycle outcome to the process exit status.
fn finish(job: &str, outcome: CycleOutcome) -> Result<()> {
    match outcome {
        CycleOutcome::Completed { .. } => Ok(()),
        CycleOutcome::Skipped => {
            warn!(job, "another run holds the lease, nothing was done");
            Ok(())
        }
        CycleOutcome::Abandoned { attempts } => {
            anyhow::bail!("{job} cycle abandoned after {attempts} attempts")
        }
    }
}

/// Run the two job loops until the process is stopped.
async fn watch(ctx: Context) {
    let ctx = Arc::new(ctx);

    // Fresh static collections before the first ingest tick.
    jobs::rebuild::run(&ctx).await;

    let ingest_ctx = ctx.clone();
    let ingest_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(ingest_ctx.config.ingest_interval);
        loop {
            interval.tick().await;
            jobs::ingest::run(&ingest_ctx).await;
        }
    });

    let rebuild_ctx = ctx.clone();
    let rebuild_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(rebuild_ctx.config.rebuild_interval);
        // Skip the first tick which fires immediately (already rebuilt above)
        interval.tick().await;
        loop {
            interval.tick().await;
            jobs::rebuild::run(&rebuild_ctx).await;
        }
    });

    let _ = tokio::join!(ingest_loop, rebuild_loop);
}
