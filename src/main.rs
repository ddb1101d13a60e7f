//! Minimap tile ingestion worker entry point (spec.md §6): parses CLI
//! args, loads configuration, wires the pipeline's dependencies, and runs
//! the poll/dispatch loop until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use mapscan_core::{Settings, WorkerError};
use mapscan_db::Db;
use mapscan_pipeline::events::EventLog;
use mapscan_pipeline::{dispatch_once, poll_once, PollDeps, ScanDeps, WorkerPool};
use mapscan_resolver::{fake::FakeResolver, ContentResolver, ListfileCache, VersionOracle};
use mapscan_storage::{BlobStore, LocalBlobStore, S3BlobStore};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook_tokio::Signals;
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "mapscan", about = "Minimap tile ingestion worker")]
struct Cli {
    /// Path to the worker's TOML configuration file.
    #[arg(long, default_value = "mapscan.toml")]
    config: PathBuf,
}

/// The resolver this binary wires up for its `ContentResolver` collaborator
/// (spec.md §1 Non-goals: the virtual-filesystem / archive-decryption
/// library is out of scope here). The in-memory fake is the only
/// implementation this workspace ships; a production deployment swaps this
/// one call site for a real TACT/CASC-backed resolver — see DESIGN.md.
fn build_resolver() -> Arc<dyn ContentResolver> {
    Arc::new(FakeResolver::new())
}

async fn build_blob_store(settings: &Settings) -> Result<Arc<dyn BlobStore>, WorkerError> {
    match settings.blob_store.kind.as_str() {
        "local" => Ok(Arc::new(LocalBlobStore::new(settings.blob_store.local_path.clone()))),
        "s3" => {
            let bucket = settings
                .blob_store
                .s3_bucket
                .clone()
                .ok_or_else(|| WorkerError::Config("blob_store.kind = \"s3\" requires s3_bucket".to_string()))?;
            let store =
                S3BlobStore::new(bucket, settings.blob_store.s3_region.clone(), settings.blob_store.s3_endpoint.clone()).await;
            Ok(Arc::new(store))
        }
        other => Err(WorkerError::Config(format!("unknown blob_store.kind: {other}"))),
    }
}

fn init_logging(level: &str) {
    let level: Level = level.parse().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(&cli.config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    init_logging(&settings.log_level);

    match run(settings, cli.config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "worker exiting");
            std::process::exit(2);
        }
    }
}

async fn run(settings: Settings, config_path: PathBuf) -> Result<(), WorkerError> {
    let db = Db::connect(&settings.database_url).await.map_err(|e| WorkerError::Database(e.to_string()))?;
    let blob_store = build_blob_store(&settings).await?;
    let resolver = build_resolver();
    let listfile = Arc::new(ListfileCache::new());
    let events = Arc::new(EventLog::new());
    let worker_pool = Arc::new(WorkerPool::new(settings.single_thread));
    let oracle = VersionOracle::new(settings.version_oracle_url.clone());

    let poll_deps = PollDeps::new(db.clone(), oracle, events.clone(), settings.clone());

    let scan_deps = ScanDeps {
        db: db.clone(),
        resolver,
        blob_store,
        listfile,
        settings: settings.clone(),
        events: events.clone(),
        worker_pool,
    };

    let signals = Signals::new(&[SIGHUP, SIGTERM, SIGINT, SIGQUIT]).map_err(|e| WorkerError::Config(e.to_string()))?;
    let signals_handle = signals.handle();
    let shutdown = Arc::new(tokio::sync::Notify::new());

    let signal_task = tokio::spawn(signal_loop(signals, config_path, shutdown.clone()));

    let poll_interval = Duration::from_secs(poll_deps.settings.poll_interval_secs.max(1));
    let mut poll_tick = tokio::time::interval(poll_interval);

    info!("mapscan worker starting");

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("shutdown signal received, draining in-flight work");
                break;
            }
            _ = poll_tick.tick() => {
                match poll_once(&poll_deps).await {
                    Ok(n) if n > 0 => info!(upserted = n, "poll tick discovered new work"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "poll tick failed"),
                }
            }
            result = dispatch_once(&scan_deps) => {
                match result {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    Err(e) => {
                        error!(error = %e, "scan dispatch failed");
                        if !scan_deps.settings.catch_scan_exceptions {
                            signals_handle.close();
                            return Err(WorkerError::Config(e.to_string()));
                        }
                    }
                }
            }
        }
    }

    signals_handle.close();
    signal_task.abort();
    Ok(())
}

/// `SIGHUP` re-reads and validates the config file so an operator gets
/// immediate feedback on a bad edit, but does not hot-swap the running
/// worker's settings — `ScanDeps`/`PollDeps` own their `Settings` for the
/// lifetime of the process, so picking up a reload requires a restart
/// (the same limitation the teacher's own `SIGHUP` arm leaves as a
/// comment rather than an implementation).
async fn signal_loop(mut signals: Signals, config_path: PathBuf, shutdown: Arc<tokio::sync::Notify>) {
    while let Some(signal) = signals.next().await {
        match signal {
            SIGHUP => match mapscan_core::Settings::load(&config_path) {
                Ok(_) => info!("configuration file re-validated; restart the worker to apply changes"),
                Err(e) => warn!(error = %e, "configuration reload failed validation"),
            },
            SIGTERM | SIGINT | SIGQUIT => {
                shutdown.notify_one();
                break;
            }
            _ => unreachable!(),
        }
    }
}
