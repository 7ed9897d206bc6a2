//! orchard-pipeline - Production/Publish Pipeline Worker
//!
//! Long-lived worker process owning the production pipeline state machine.
//! All coordination with other workers happens through the shared database.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orchard_pipeline::generate::SyntheticGenerator;
use orchard_pipeline::pipeline::Pipeline;

/// Command-line arguments for orchard-pipeline
#[derive(Parser, Debug)]
#[command(name = "orchard-pipeline")]
#[command(about = "Production/publish pipeline worker for Orchard")]
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
                .unwrap_or_else(|_| "orchard_pipeline=info,orchard_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting orchard-pipeline worker");
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
        .unwrap_or_else(|| format!("pipeline-{}", uuid::Uuid::new_v4()));
    info!("Worker id: {}", worker_id);

    let registry = orchard_common::platform::AdapterRegistry::with_defaults()
        .context("Failed to build platform adapters")?;

    let pipeline = Pipeline::new(pool, Arc::new(SyntheticGenerator), &worker_id);
    pipeline
        .run_forever(&registry)
        .await
        .context("Pipeline loop terminated")?;

    Ok(())
}
