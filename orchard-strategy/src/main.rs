//! orchard-strategy - Daily Strategy Cycle Worker
//!
//! One long-lived process: starts the daily cycle when none has run today
//! and resumes suspended cycles once their human-review decision arrives.
//! Suspension is durable — any instance of this worker can resume a cycle
//! another instance paused.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for orchard-strategy
#[derive(Parser, Debug)]
#[command(name = "orchard-strategy")]
#[command(about = "Daily strategy cycle worker for Orchard")]
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
                .unwrap_or_else(|_| "orchard_strategy=info,orchard_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting orchard-strategy worker");
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

    loop {
        if let Err(e) = orchard_strategy::cycle::tick(&pool).await {
            warn!(error = %e, "Strategy tick failed");
        }

        let interval: u64 = orchard_common::db::settings::get_setting(
            &pool,
            "CYCLE_RESUME_POLL_INTERVAL_SEC",
        )
        .await
        .unwrap_or(60);
        tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
    }
}
