//! Dataset Indexer Main Entry Point
//!
//! Keeps the dataset search index in sync with the metadata catalog, either
//! by consuming catalog events or by reconciling the whole catalog.

use std::env;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dataset_indexer::reconciler::{ReconcileMode, ReconciliationEngine};
use dataset_indexer::{Dependencies, IndexingError, Settings};
use dotenv::dotenv;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "dataset-indexer", version, about = "Dataset search index synchronizer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Consume catalog events until stopped (default).
    Consume {
        /// Also reconcile the whole catalog every this many seconds.
        #[arg(long, value_name = "SECS")]
        reconcile_every: Option<u64>,
    },
    /// Reconcile the index against the catalog once.
    Reconcile {
        /// Delete the index and rebuild it from scratch.
        #[arg(long)]
        recreate_index: bool,
    },
    /// Create the index unless it exists.
    CreateIndex,
    /// Delete the index.
    DeleteIndex,
    /// Index the first N latest catalog records.
    LoadTestData {
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("dataset_indexer=info,dataset_indexer_repository=info,catalog_client=info")
    });

    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();

        info!(
            service_name = "dataset-indexer",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with JSON format"
        );
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .init();

        info!(
            service_name = "dataset-indexer",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with console output"
        );
    }
}

/// Send on `shutdown` when SIGTERM or ctrl-c arrives.
fn forward_shutdown_signals(shutdown: broadcast::Sender<()>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown.send(());
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Unable to listen for SIGTERM, only ctrl-c stops the consumer");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Reconcile on a fixed schedule until the process exits.
fn schedule_reconciliation(engine: ReconciliationEngine, every: Duration) {
    tokio::spawn(async move {
        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; start after one full period.
        timer.tick().await;

        loop {
            timer.tick().await;
            if let Err(e) = engine.reconcile(ReconcileMode::KeepIndex).await {
                error!(error = %e, "Scheduled reconciliation failed");
            }
        }
    });
}

async fn consume(deps: &Dependencies, reconcile_every: Option<u64>) -> Result<(), IndexingError> {
    if !deps.store.ensure_exists().await {
        return Err(IndexingError::index(format!(
            "Unable to ensure index {} exists",
            deps.store.index_name()
        )));
    }

    let mut orchestrator = deps.orchestrator()?;
    forward_shutdown_signals(orchestrator.shutdown_sender());

    if let Some(secs) = reconcile_every.filter(|secs| *secs > 0) {
        let engine = deps
            .reconciliation_engine()?
            .with_consumer_control(orchestrator.control());
        info!(every_secs = secs, "Scheduling periodic reconciliation");
        schedule_reconciliation(engine, Duration::from_secs(secs));
    }

    orchestrator.run().await?;
    Ok(())
}

async fn run(command: Command, deps: Dependencies) -> Result<(), IndexingError> {
    match command {
        Command::Consume { reconcile_every } => consume(&deps, reconcile_every).await,
        Command::Reconcile { recreate_index } => {
            let mode = if recreate_index {
                ReconcileMode::RecreateIndex
            } else {
                ReconcileMode::KeepIndex
            };
            let report = deps.reconciliation_engine()?.reconcile(mode).await?;
            if !report.success {
                warn!("Some bulk requests failed; see the log for the rejected operations");
            }
            Ok(())
        }
        Command::CreateIndex => {
            if deps.store.ensure_exists().await {
                Ok(())
            } else {
                Err(IndexingError::index(format!(
                    "Unable to create index {}",
                    deps.store.index_name()
                )))
            }
        }
        Command::DeleteIndex => {
            if deps.store.delete_index().await {
                Ok(())
            } else {
                Err(IndexingError::index(format!(
                    "Unable to delete index {}",
                    deps.store.index_name()
                )))
            }
        }
        Command::LoadTestData { count } => {
            deps.reconciliation_engine()?.load_test_data(count).await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), IndexingError> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();
    init_tracing();

    let command = cli.command.unwrap_or(Command::Consume {
        reconcile_every: None,
    });
    info!(command = ?command, "Starting dataset indexer");

    let settings = Settings::from_env();
    let deps = match Dependencies::new(settings).await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    match run(command, deps).await {
        Ok(()) => {
            info!("Dataset indexer completed successfully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Dataset indexer failed");
            Err(e)
        }
    }
}
