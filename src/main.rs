use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use session_ingest::database::IngestDatabase;
use session_ingest::pipeline::{reconcile_once, Orchestrator};
use session_ingest::{IngestConfig, NotifyChangeDetector, SessionFileClassifier};

#[derive(Parser)]
#[command(name = "session-ingest", version, about = "Micro-batched ingestion of agent session files")]
struct Cli {
    /// Path to an ingest.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the session files (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the storage root and ingest continuously until Ctrl-C (default)
    Run {
        /// Accumulator window in milliseconds
        #[arg(long)]
        window_ms: Option<u64>,

        /// Flush as soon as this many distinct paths are pending
        #[arg(long)]
        max_batch_size: Option<usize>,

        /// Seconds between reconciliation scans
        #[arg(long)]
        scan_interval_secs: Option<u64>,
    },
    /// Run one reconciliation pass, ingest everything found, and exit
    Scan,
    /// Print tracking table counts and the most recent errors
    Status {
        /// Number of recent errors to show
        #[arg(long, default_value_t = 10)]
        errors: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = IngestConfig::load_or_default(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.storage_root = root;
    }
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    let _guards = init_logging(&config)?;

    match cli.command.unwrap_or(Command::Run {
        window_ms: None,
        max_batch_size: None,
        scan_interval_secs: None,
    }) {
        Command::Run {
            window_ms,
            max_batch_size,
            scan_interval_secs,
        } => {
            if let Some(window_ms) = window_ms {
                config.accumulator.window_ms = window_ms;
            }
            if let Some(max_batch_size) = max_batch_size {
                config.accumulator.max_batch_size = max_batch_size;
            }
            if let Some(scan_interval_secs) = scan_interval_secs {
                config.reconciler.scan_interval_secs = scan_interval_secs;
            }
            run(config).await
        }
        Command::Scan => scan(config).await,
        Command::Status { errors } => status(&config, errors),
    }
}

/// Console output plus a daily-rolling log file
fn init_logging(
    config: &IngestConfig,
) -> Result<(
    tracing_appender::non_blocking::WorkerGuard,
    tracing_appender::non_blocking::WorkerGuard,
)> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("session_ingest=info"))
        .context("Invalid log filter")?;

    let logs_dir = config.log_dir();
    fs::create_dir_all(&logs_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create logs directory: {}", e);
    });

    let file_appender = rolling::daily(&logs_dir, "session-ingest.log");
    let (non_blocking_file, file_guard) = non_blocking(file_appender);
    let (non_blocking_console, console_guard) = non_blocking(std::io::stderr());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking_console)
                .with_target(false)
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_target(true)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    debug!("Logging to {}", logs_dir.display());
    Ok((console_guard, file_guard))
}

async fn run(config: IngestConfig) -> Result<()> {
    info!("Starting Session Ingest on {}", config.storage_root.display());

    let pipeline_config = config.pipeline_config()?;
    let db = Arc::new(IngestDatabase::new(&config.database_path)?);
    let classifier = Arc::new(SessionFileClassifier::new(
        pipeline_config.reconciler.storage_root.clone(),
        config.classifier.rules.clone(),
    )?);

    let mut orchestrator = Orchestrator::new(
        pipeline_config,
        db.clone(),
        db.clone(),
        classifier,
        Box::new(NotifyChangeDetector::new()),
    );
    orchestrator.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    if let Some(stats) = orchestrator.stats() {
        info!(
            "Sent {} batches ({} files), {} scans, {} indexed, {} errors",
            stats.accumulator.batches_sent,
            stats.accumulator.files_sent,
            stats.reconciler.scans_completed,
            stats.ingest.files_indexed,
            stats.ingest.files_failed
        );
    }
    orchestrator.stop().await;

    if let Err(e) = db.checkpoint_wal() {
        warn!("Final WAL checkpoint failed: {}", e);
    }
    Ok(())
}

async fn scan(config: IngestConfig) -> Result<()> {
    let pipeline_config = config.pipeline_config()?;
    let db = Arc::new(IngestDatabase::new(&config.database_path)?);
    let classifier = Arc::new(SessionFileClassifier::new(
        pipeline_config.reconciler.storage_root.clone(),
        config.classifier.rules.clone(),
    )?);

    let totals = reconcile_once(&pipeline_config, db.clone(), db.clone(), classifier).await?;
    println!(
        "Ingested {} files ({} errors, {} skipped) in {} batches",
        totals.files_indexed, totals.files_failed, totals.files_skipped, totals.batches_processed
    );

    if let Err(e) = db.checkpoint_wal() {
        warn!("Final WAL checkpoint failed: {}", e);
    }
    Ok(())
}

fn status(config: &IngestConfig, errors: usize) -> Result<()> {
    let db = IngestDatabase::new(&config.database_path)?;
    let stats = db.tracking_stats()?;

    println!("Database: {}", db.file_path().display());
    println!("Tracked files: {}", stats.total());
    println!("  indexed: {}", stats.indexed);
    println!("  pending: {}", stats.pending);
    println!("  error:   {}", stats.error);

    let per_type = db.session_record_counts()?;
    if !per_type.is_empty() {
        println!("Loaded records:");
        for (record_type, count) in per_type {
            println!("  {}: {}", record_type, count);
        }
    }

    let recent = db.recent_errors(errors)?;
    if !recent.is_empty() {
        println!("Recent errors:");
        for record in recent {
            println!(
                "  {}: {}",
                record.path,
                record.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}
