//! Settings database operations
//!
//! Typed get/set accessors over the key-value settings table. Every cadence
//! and threshold in the system is read through here — nothing is hardcoded at
//! call sites. Defaults are seeded at init; a missing key is a configuration
//! error, not a silent fallback.

use crate::{Error, Result};
use sqlx::SqlitePool;

/// Generic setting getter. Returns `NotFound` if the key does not exist.
pub async fn get_setting<T>(pool: &SqlitePool, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match row {
        Some((Some(value),)) => value
            .parse::<T>()
            .map_err(|e| Error::Config(format!("Failed to parse setting '{}': {}", key, e))),
        Some((None,)) => Err(Error::Config(format!("Setting '{}' is NULL", key))),
        None => Err(Error::NotFound(format!("Setting not found: {}", key))),
    }
}

/// Generic setting setter (UPSERT).
pub async fn set_setting<T>(pool: &SqlitePool, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a JSON-valued setting (e.g. `METRICS_FOLLOWUP_DAYS = [7, 30]`).
pub async fn get_setting_json<T>(pool: &SqlitePool, key: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let raw: String = get_setting(pool, key).await?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("Failed to parse setting '{}' as JSON: {}", key, e)))
}

// ============================================================================
// Named accessors for frequently used settings
// ============================================================================

/// Hours between posting and the first (48h) measurement eligibility.
pub async fn metrics_collection_delay_hours(pool: &SqlitePool) -> Result<i64> {
    get_setting(pool, "METRICS_COLLECTION_DELAY_HOURS").await
}

/// Whether produced content must pass human review before publishing.
pub async fn human_review_enabled(pool: &SqlitePool) -> Result<bool> {
    get_setting(pool, "HUMAN_REVIEW_ENABLED").await
}

/// Quality score at or above which content is auto-approved.
pub async fn auto_approve_score_threshold(pool: &SqlitePool) -> Result<f64> {
    get_setting(pool, "AUTO_APPROVE_SCORE_THRESHOLD").await
}

/// Revision budget before content is terminally rejected.
pub async fn max_content_revision_count(pool: &SqlitePool) -> Result<i64> {
    get_setting(pool, "MAX_CONTENT_REVISION_COUNT").await
}

/// Production pipeline poll interval when the queue is empty.
pub async fn production_poll_interval_sec(pool: &SqlitePool) -> Result<u64> {
    get_setting(pool, "PRODUCTION_POLL_INTERVAL_SEC").await
}

/// Minimum cohort size for a baseline fallback stage to be used.
pub async fn baseline_min_sample(pool: &SqlitePool) -> Result<i64> {
    get_setting(pool, "BASELINE_MIN_SAMPLE").await
}

/// Fixed default baseline when every fallback stage is too thin.
pub async fn baseline_default_impressions(pool: &SqlitePool) -> Result<f64> {
    get_setting(pool, "BASELINE_DEFAULT_IMPRESSIONS").await
}

/// Lower bound a recalibrated factor weight can never go below.
pub async fn weight_floor(pool: &SqlitePool) -> Result<f64> {
    get_setting(pool, "WEIGHT_FLOOR").await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn defaults_are_readable_typed() {
        let pool = setup_test_db().await;

        assert_eq!(metrics_collection_delay_hours(&pool).await.unwrap(), 48);
        assert!(human_review_enabled(&pool).await.unwrap());
        assert_eq!(auto_approve_score_threshold(&pool).await.unwrap(), 8.0);
        assert_eq!(max_content_revision_count(&pool).await.unwrap(), 3);
        assert_eq!(weight_floor(&pool).await.unwrap(), 0.02);
    }

    #[tokio::test]
    async fn set_then_get_roundtrip() {
        let pool = setup_test_db().await;

        set_setting(&pool, "AUTO_APPROVE_SCORE_THRESHOLD", 9.5).await.unwrap();
        assert_eq!(auto_approve_score_threshold(&pool).await.unwrap(), 9.5);

        // Exactly one row after the upsert
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM settings WHERE key = 'AUTO_APPROVE_SCORE_THRESHOLD'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn json_setting_parses_array() {
        let pool = setup_test_db().await;

        let days: Vec<i64> = get_setting_json(&pool, "METRICS_FOLLOWUP_DAYS").await.unwrap();
        assert_eq!(days, vec![7, 30]);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let pool = setup_test_db().await;

        let result: Result<i64> = get_setting(&pool, "NO_SUCH_KEY").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
