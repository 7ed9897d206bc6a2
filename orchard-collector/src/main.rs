//! orchard-collector - Credential Refresh & Measurement Worker

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for orchard-collector
#[derive(Parser, Debug)]
#[command(name = "orchard-collector")]
#[command(about = "Credential refresh and metrics measurement worker for Orchard")]
#[command(version)]
struct Args {
    /// Data folder containing the shared database
    #[arg(short, long, env = "ORCHARD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Worker identity recorded on claimed tasks
    #[arg(short, long, env = "ORCHARD_WORKER_ID")]
    worker_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchard_collector=info,orchard_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting orchard-collector worker");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let data_dir = orchard_common::config::resolve_data_dir(
        args.data_dir.as_deref().and_then(|p| p.to_str()),
    );
    orchard_common::config::ensure_data_dir(&data_dir)
        .context("Failed to initialize data folder")?;

    let db_path = orchard_common::config::database_path(&data_dir);
    info!("Database: {}", db_path.display());

    let pool = orchard_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;
    info!("Database connection established");

    let worker_id = args
        .worker_id
        .unwrap_or_else(|| format!("collector-{}", uuid::Uuid::new_v4()));
    info!("Worker id: {}", worker_id);

    let registry = orchard_common::platform::AdapterRegistry::with_defaults()
        .context("Failed to build platform adapters")?;

    // Two loops, one durable store: token refresh and measurement
    let refresher = {
        let pool = pool.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            orchard_collector::refresher::run_forever(&pool, &registry).await
        })
    };
    let measurement = {
        let pool = pool.clone();
        let registry = registry.clone();
        let worker_id = worker_id.clone();
        tokio::spawn(async move {
            orchard_collector::measurement::run_forever(&pool, &registry, &worker_id).await
        })
    };

    let (refresher_result, measurement_result) = tokio::try_join!(refresher, measurement)
        .context("Worker loop panicked")?;
    refresher_result.context("Refresher loop terminated")?;
    measurement_result.context("Measurement loop terminated")?;

    Ok(())
}
