//! orchard-batch - Batch Scheduler Worker
//!
//! Owns the minute-resolution scheduler loop. Safe to run more than one
//! instance; the dedup table in the shared store serializes job firings.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for orchard-batch
#[derive(Parser, Debug)]
#[command(name = "orchard-batch")]
#[command(about = "Batch maintenance scheduler for Orchard")]
#[command(version)]
struct Args {
    /// Data folder containing the shared database
    #[arg(short, long, env = "ORCHARD_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchard_batch=info,orchard_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting orchard-batch worker");
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

    orchard_batch::scheduler::run_forever(&pool)
        .await
        .context("Scheduler loop terminated")?;

    Ok(())
}
