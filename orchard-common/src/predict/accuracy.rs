//! Prediction accuracy
//!
//! Error is computed once per measurement round and never overwritten.
//! Edge-case policy:
//! - `actual` unavailable (e.g. account banned) → the publication is excluded
//!   from accuracy and KPI aggregates entirely; it is not treated as zero
//! - `predicted = 0` and `actual = 0` → error 0 (perfect), not 0/0
//! - `predicted > 0` and `actual = 0` → error 1.0

use crate::db::models::{MeasurementRound, Platform};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

/// Relative prediction error. `None` when the actual value is unavailable.
pub fn prediction_error(predicted: f64, actual: Option<f64>) -> Option<f64> {
    let actual = actual?;
    if predicted == 0.0 && actual == 0.0 {
        return Some(0.0);
    }
    if actual == 0.0 {
        return Some(1.0);
    }
    Some((predicted - actual).abs() / actual)
}

/// A publication due for measurement in a given round.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MeasurementTarget {
    pub publication_id: i64,
    pub content_id: String,
    pub account_id: String,
    pub platform: Platform,
    pub posted_at: DateTime<Utc>,
    pub platform_post_id: Option<String>,
    pub predicted_impressions: f64,
}

/// Publications whose round column is still NULL and whose fixed delay has
/// elapsed. Already-measured rows never reappear, which makes the whole
/// measurement flow idempotent.
pub async fn eligible_for_round(
    pool: &SqlitePool,
    round: MeasurementRound,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<MeasurementTarget>> {
    let cutoff = now - Duration::hours(round.delay_hours());

    let targets = sqlx::query_as::<_, MeasurementTarget>(&format!(
        r#"
        SELECT p.id AS publication_id, ps.content_id, p.account_id, p.platform,
               p.posted_at, p.platform_post_id, ps.predicted_impressions
        FROM publications p
        JOIN prediction_snapshots ps ON p.id = ps.publication_id
        WHERE ps.{actual} IS NULL
          AND p.posted_at <= ?
          AND p.status = 'posted'
        ORDER BY p.posted_at ASC
        LIMIT ?
        "#,
        actual = round.actual_column()
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(targets)
}

/// Record the measured impressions for a round.
///
/// Writes the actual value (and, for 7d/30d, the error) only when the round
/// column is still NULL — re-delivery of the same measurement is a no-op.
/// Returns whether a write actually happened.
pub async fn record_actual(
    pool: &SqlitePool,
    publication_id: i64,
    round: MeasurementRound,
    actual_views: f64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let predicted: Option<f64> = sqlx::query_scalar(
        "SELECT predicted_impressions FROM prediction_snapshots WHERE publication_id = ?",
    )
    .bind(publication_id)
    .fetch_optional(pool)
    .await?;

    let Some(predicted) = predicted else {
        return Ok(false);
    };

    let rows_affected = match round.error_column() {
        Some(error_column) => {
            let error = prediction_error(predicted, Some(actual_views));
            sqlx::query(&format!(
                r#"
                UPDATE prediction_snapshots
                SET {actual} = ?, {error} = ?, updated_at = ?
                WHERE publication_id = ? AND {actual} IS NULL
                "#,
                actual = round.actual_column(),
                error = error_column,
            ))
            .bind(actual_views)
            .bind(error)
            .bind(now)
            .bind(publication_id)
            .execute(pool)
            .await?
            .rows_affected()
        }
        None => {
            sqlx::query(&format!(
                r#"
                UPDATE prediction_snapshots
                SET {actual} = ?, updated_at = ?
                WHERE publication_id = ? AND {actual} IS NULL
                "#,
                actual = round.actual_column(),
            ))
            .bind(actual_views)
            .bind(now)
            .bind(publication_id)
            .execute(pool)
            .await?
            .rows_affected()
        }
    };

    Ok(rows_affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_edge_cases() {
        // Both zero: perfect, not 0/0
        assert_eq!(prediction_error(0.0, Some(0.0)), Some(0.0));
        // Predicted something, got nothing: max error
        assert_eq!(prediction_error(500.0, Some(0.0)), Some(1.0));
        // Unavailable actual: excluded
        assert_eq!(prediction_error(500.0, None), None);
        // Normal case
        assert_eq!(prediction_error(150.0, Some(100.0)), Some(0.5));
        assert_eq!(prediction_error(50.0, Some(100.0)), Some(0.5));
    }

    async fn setup_snapshot(pool: &SqlitePool) -> i64 {
        let now = Utc::now() - Duration::days(40);
        sqlx::query(
            "INSERT INTO accounts (account_id, platform, status, created_at, updated_at)
             VALUES ('acct-1', 'tiktok', 'active', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO content (content_id, content_format, status, created_at, updated_at)
             VALUES ('content-1', 'short_video', 'posted', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        let pub_id: i64 = sqlx::query_scalar(
            "INSERT INTO publications (content_id, account_id, platform, status, posted_at, measure_after, created_at)
             VALUES ('content-1', 'acct-1', 'tiktok', 'posted', ?, ?, ?) RETURNING id",
        )
        .bind(now)
        .bind(now + Duration::hours(48))
        .bind(now)
        .fetch_one(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO prediction_snapshots
                 (publication_id, content_id, account_id, baseline_used, baseline_source,
                  adjustments_applied, total_adjustment, predicted_impressions, created_at, updated_at)
             VALUES (?, 'content-1', 'acct-1', 500.0, 'default', '{}', 0.0, 500.0, ?, ?)",
        )
        .bind(pub_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        pub_id
    }

    #[tokio::test]
    async fn record_is_idempotent() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();
        let pub_id = setup_snapshot(&pool).await;
        let now = Utc::now();

        let wrote = record_actual(&pool, pub_id, MeasurementRound::Days7, 600.0, now).await.unwrap();
        assert!(wrote);

        // Second delivery is a no-op, the original value survives
        let wrote = record_actual(&pool, pub_id, MeasurementRound::Days7, 9999.0, now).await.unwrap();
        assert!(!wrote);

        let (actual, error): (f64, f64) = sqlx::query_as(
            "SELECT actual_impressions_7d, prediction_error_7d FROM prediction_snapshots WHERE publication_id = ?",
        )
        .bind(pub_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(actual, 600.0);
        assert!((error - (500.0 - 600.0_f64).abs() / 600.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn measured_rows_leave_eligibility() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();
        let pub_id = setup_snapshot(&pool).await;
        let now = Utc::now();

        // Posted 40 days ago: eligible for every round
        let targets = eligible_for_round(&pool, MeasurementRound::Hours48, now, 10).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].publication_id, pub_id);

        record_actual(&pool, pub_id, MeasurementRound::Hours48, 100.0, now).await.unwrap();

        // Even though posted_at + 48h <= now still holds, the row is gone
        let targets = eligible_for_round(&pool, MeasurementRound::Hours48, now, 10).await.unwrap();
        assert!(targets.is_empty());

        // Other rounds are unaffected
        let targets = eligible_for_round(&pool, MeasurementRound::Days7, now, 10).await.unwrap();
        assert_eq!(targets.len(), 1);
    }

    #[tokio::test]
    async fn recent_publication_not_yet_eligible() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();
        let pub_id = setup_snapshot(&pool).await;
        let now = Utc::now();

        // Move posted_at to one hour ago
        sqlx::query("UPDATE publications SET posted_at = ? WHERE id = ?")
            .bind(now - Duration::hours(1))
            .bind(pub_id)
            .execute(&pool)
            .await
            .unwrap();

        let targets = eligible_for_round(&pool, MeasurementRound::Hours48, now, 10).await.unwrap();
        assert!(targets.is_empty());
    }

    #[tokio::test]
    async fn forty_eight_hour_round_records_no_error() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();
        let pub_id = setup_snapshot(&pool).await;

        record_actual(&pool, pub_id, MeasurementRound::Hours48, 250.0, Utc::now()).await.unwrap();

        let (actual, error_7d): (f64, Option<f64>) = sqlx::query_as(
            "SELECT actual_impressions_48h, prediction_error_7d FROM prediction_snapshots WHERE publication_id = ?",
        )
        .bind(pub_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(actual, 250.0);
        assert!(error_7d.is_none());
    }
}
