//! # taskloom — workflow & notification engine runner
//!
//! Usage:
//!   taskloom serve                  # run dispatcher + detection jobs
//!   taskloom scan overdue           # one-shot overdue scan (cron-friendly)
//!   taskloom scan deadlines         # one-shot deadline scan
//!   taskloom config-path            # print the config file location

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use taskloom_channels::{HttpPushChannel, LiveHub};
use taskloom_core::traits::{LiveChannel, PushChannel, Store};
use taskloom_core::LoomConfig;
use taskloom_engine::{
    spawn_detection_jobs, spawn_dispatcher, DetectionJobs, EventBus, FanoutEngine,
};
use taskloom_store::{MemoryStore, SqliteStore};

#[derive(Parser)]
#[command(
    name = "taskloom",
    version,
    about = "Collaborative task workflow & notification fan-out engine"
)]
struct Cli {
    /// Path to config file (default: ~/.taskloom/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the event dispatcher and both detection jobs until interrupted
    Serve,
    /// Run a single detection scan and exit
    Scan {
        #[arg(value_enum)]
        job: ScanJob,
    },
    /// Print the config file location
    ConfigPath,
}

#[derive(ValueEnum, Clone, Copy)]
enum ScanJob {
    Overdue,
    Deadlines,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    if let Command::ConfigPath = &cli.command {
        println!("{}", LoomConfig::default_path().display());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => LoomConfig::load_from(path)?,
        None => LoomConfig::load()?,
    };

    let store = open_store(&config)?;
    let live: Arc<dyn LiveChannel> = Arc::new(LiveHub::new());
    let push: Arc<dyn PushChannel> = Arc::new(HttpPushChannel::new(config.push.timeout_secs));
    let fanout = Arc::new(FanoutEngine::new(
        store.clone(),
        live.clone(),
        push,
        &config.push,
    ));
    let jobs = Arc::new(DetectionJobs::new(
        store.clone(),
        fanout.clone(),
        config.jobs.clone(),
    ));

    match cli.command {
        Command::Serve => {
            let (bus, rx) = EventBus::channel();
            let dispatcher = tokio::spawn(spawn_dispatcher(
                rx,
                store.clone(),
                live.clone(),
                fanout.clone(),
            ));
            let detection = tokio::spawn(spawn_detection_jobs(jobs));

            tracing::info!("taskloom engine running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");

            detection.abort();
            drop(bus);
            let _ = dispatcher.await;
            live.shutdown().await;
        }
        Command::Scan { job } => {
            let report = match job {
                ScanJob::Overdue => jobs.run_overdue_scan().await?,
                ScanJob::Deadlines => jobs.run_deadline_scan().await?,
            };
            println!(
                "scanned {} tasks: {} delivered, {} deduped, {} failed",
                report.scanned, report.delivered, report.deduped, report.failed
            );
        }
        Command::ConfigPath => unreachable!(),
    }

    Ok(())
}

fn open_store(config: &LoomConfig) -> Result<Arc<dyn Store>> {
    Ok(match config.store.backend.as_str() {
        "memory" => Arc::new(MemoryStore::new()),
        _ => {
            let path = config.store.db_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!("opening store at {}", path.display());
            Arc::new(SqliteStore::open(&path)?)
        }
    })
}
