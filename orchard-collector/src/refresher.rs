//! Token refresh loop
//!
//! Wraps the shared credential refresh cycle in a polling loop. The interval
//! is re-read every cycle so it can be tuned at runtime through the settings
//! table.

use orchard_common::db::settings;
use orchard_common::platform::{credentials, AdapterRegistry};
use orchard_common::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Run refresh cycles forever.
pub async fn run_forever(pool: &SqlitePool, registry: &AdapterRegistry) -> Result<()> {
    info!("Token refresher started");

    loop {
        match credentials::run_refresh_cycle(pool, registry, chrono::Utc::now()).await {
            Ok(summary) if summary.total > 0 => {
                info!(
                    total = summary.total,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "Refresh cycle finished"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Refresh cycle failed"),
        }

        let interval: u64 = settings::get_setting(pool, "TOKEN_REFRESH_INTERVAL_SEC")
            .await
            .unwrap_or(3600);
        tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
    }
}
