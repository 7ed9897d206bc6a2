//! Database schema migrations
//!
//! Versioned migrations allow seamless database upgrades without manual
//! intervention or data loss. The base schema is created by
//! [`crate::db::init`]; migrations handle changes to already-deployed
//! databases.
//!
//! Guidelines:
//! 1. Never modify existing migrations — they must remain stable for
//!    databases created by older builds
//! 2. Always add new migrations as new functions and bump the version
//! 3. Prefer `ALTER TABLE` over DROP/CREATE to preserve data
//! 4. Keep every migration idempotent (check before altering)

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version. Increment when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Get current schema version from database.
///
/// Returns 0 if the schema_version table has no rows.
async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        // v1 is the base schema created by init_schema; nothing to transform
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_record_version() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();

        let version = get_schema_version(&pool).await.unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        // Running again is a no-op
        run_migrations(&pool).await.unwrap();
        let version = get_schema_version(&pool).await.unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }
}
