//! NRT Collector Binary Entry Point
//!
//! Loads the configuration, syncs declared instruments into the directory,
//! then runs one collection cycle (`--once`) or cycles on the configured
//! schedule until Ctrl+C / SIGTERM.

use std::sync::Arc;

use clap::Parser;
use nrt_collector::{
    collection::CollectionLoop,
    config::AppConfig,
    connect_gateway,
    retriever::RetrieverRegistry,
    scheduler::CycleScheduler,
    storage::StorageBuilder,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// NRT Collector - near-real-time instrument file collection
#[derive(Parser, Debug)]
#[command(name = "nrt-collector", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "configs/nrt.yaml", env = "NRT_CONFIG")]
    config: String,

    /// Database URL or path (overrides config file)
    #[arg(long, env = "NRT_DB_URL")]
    db_url: Option<String>,

    /// Run a single collection cycle and exit
    #[arg(long, env = "NRT_ONCE")]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_with_instrument_path(&cli.config)?;
    if let Some(url) = cli.db_url {
        config.database.url = url;
    }

    // RUST_LOG > config file > default
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("NRT Collector - instrument file collection");
    tracing::info!(config = %cli.config, database = %config.database.url, "Configuration loaded");

    let handles = StorageBuilder::new(&config.database.url).build().await?;
    tracing::info!("Storage initialized");

    let records = config.to_instrument_records();
    if !records.is_empty() {
        let synced = handles.instrument_store.sync_from_config(&records).await?;
        tracing::info!(
            added = synced.added,
            existing = synced.existing,
            "Instrument sync complete"
        );
    }

    let gateway = connect_gateway(&config.destination)?;
    let registry = RetrieverRegistry::with_builtin();
    tracing::info!(retrievers = ?registry.kinds(), "Retriever registry ready");

    let collection = CollectionLoop::new(
        Arc::new(handles.instrument_store.clone()),
        registry,
        gateway,
        handles.cursor_store.clone(),
        config.collection.clone(),
    )?;

    match config.schedule()? {
        Some(schedule) if !cli.once => {
            let scheduler = CycleScheduler::new(collection, schedule).await?;
            scheduler.start().await?;
            // First cycle right away, then on schedule.
            scheduler.run_now();
            tracing::info!("Press Ctrl+C to shutdown");

            shutdown_signal().await;

            tracing::info!("Shutting down scheduler...");
            if let Err(e) = scheduler.shutdown().await {
                tracing::error!(error = %e, "Failed to shutdown scheduler");
            }
        }
        _ => {
            let cycle = collection.run_cycle();
            tokio::pin!(cycle);
            tokio::select! {
                result = &mut cycle => {
                    result?;
                }
                _ = shutdown_signal() => {
                    collection.request_stop();
                    cycle.await?;
                }
            }
        }
    }

    tracing::info!("Shutting down storage...");
    handles.shutdown().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
