//! Monthly KPI snapshots
//!
//! One snapshot per platform per month: average 7d impressions against the
//! platform's KPI target, plus prediction accuracy. Publications without a
//! measured 7d actual (e.g. banned accounts) are excluded from every
//! aggregate — they are not counted as zero. A snapshot backed by fewer than
//! `KPI_MIN_RELIABLE_ACCOUNTS` distinct accounts is stored but flagged
//! unreliable.

use crate::db::models::Platform;
use crate::db::settings;
use crate::predict::accuracy::prediction_error;
use crate::Result;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::info;

/// Computed KPI figures for one platform-month before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiResult {
    pub platform: Platform,
    pub year_month: String,
    pub kpi_target: f64,
    pub avg_impressions: f64,
    pub achievement_rate: f64,
    pub account_count: i64,
    pub publication_count: i64,
    pub prediction_accuracy: Option<f64>,
    pub is_reliable: bool,
}

fn kpi_target_key(platform: Platform) -> &'static str {
    match platform {
        Platform::Youtube => "KPI_TARGET_YOUTUBE",
        Platform::Tiktok => "KPI_TARGET_TIKTOK",
        Platform::Instagram => "KPI_TARGET_INSTAGRAM",
        Platform::X => "KPI_TARGET_X",
    }
}

/// Eligibility window for a target month: from `KPI_CALC_MONTH_START_DAY` of
/// the previous month (exclusive start day in the target month itself) to the
/// first day of the following month.
fn month_window(year: i32, month: u32, start_day: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    let (prev_year, prev_month) = if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    };
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    let start = Utc
        .with_ymd_and_hms(prev_year, prev_month, start_day, 0, 0, 0)
        .single()
        .unwrap_or_else(|| Utc.with_ymd_and_hms(prev_year, prev_month, 28, 0, 0, 0).unwrap());
    let end = Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).unwrap();
    (start, end)
}

/// Compute and persist the snapshot for every platform for a given month.
/// Platforms with no eligible publications are skipped.
pub async fn snapshot_month(
    pool: &SqlitePool,
    year: i32,
    month: u32,
    now: DateTime<Utc>,
) -> Result<Vec<KpiResult>> {
    let start_day: u32 = settings::get_setting(pool, "KPI_CALC_MONTH_START_DAY").await?;
    let min_accounts: i64 = settings::get_setting(pool, "KPI_MIN_RELIABLE_ACCOUNTS").await?;
    let (window_start, window_end) = month_window(year, month, start_day);
    let year_month = format!("{year:04}-{month:02}");

    let mut results = Vec::new();

    for platform in Platform::ALL {
        let kpi_target: f64 = settings::get_setting(pool, kpi_target_key(platform)).await?;

        // Only publications with a measured 7d actual participate
        let rows: Vec<(i64, String, f64, f64)> = sqlx::query_as(
            r#"
            SELECT p.id, p.account_id, ps.predicted_impressions, ps.actual_impressions_7d
            FROM publications p
            JOIN prediction_snapshots ps ON p.id = ps.publication_id
            WHERE p.platform = ?
              AND p.posted_at >= ?
              AND p.posted_at < ?
              AND ps.actual_impressions_7d IS NOT NULL
            "#,
        )
        .bind(platform)
        .bind(window_start)
        .bind(window_end)
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            continue;
        }

        let publication_count = rows.len() as i64;
        let accounts: BTreeSet<&str> = rows.iter().map(|(_, a, _, _)| a.as_str()).collect();
        let account_count = accounts.len() as i64;
        let avg_impressions =
            rows.iter().map(|(_, _, _, actual)| actual).sum::<f64>() / publication_count as f64;

        let errors: Vec<f64> = rows
            .iter()
            .filter_map(|(_, _, predicted, actual)| prediction_error(*predicted, Some(*actual)))
            .collect();
        let prediction_accuracy = if errors.is_empty() {
            None
        } else {
            Some(1.0 - errors.iter().sum::<f64>() / errors.len() as f64)
        };

        let result = KpiResult {
            platform,
            year_month: year_month.clone(),
            kpi_target,
            avg_impressions,
            achievement_rate: (avg_impressions / kpi_target).min(1.0),
            account_count,
            publication_count,
            prediction_accuracy,
            is_reliable: account_count >= min_accounts,
        };

        sqlx::query(
            r#"
            INSERT INTO kpi_snapshots
                (platform, year_month, kpi_target, avg_impressions, achievement_rate,
                 account_count, publication_count, prediction_accuracy, is_reliable, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (platform, year_month) DO UPDATE SET
                kpi_target = excluded.kpi_target,
                avg_impressions = excluded.avg_impressions,
                achievement_rate = excluded.achievement_rate,
                account_count = excluded.account_count,
                publication_count = excluded.publication_count,
                prediction_accuracy = excluded.prediction_accuracy,
                is_reliable = excluded.is_reliable,
                created_at = excluded.created_at
            "#,
        )
        .bind(platform)
        .bind(&result.year_month)
        .bind(result.kpi_target)
        .bind(result.avg_impressions)
        .bind(result.achievement_rate)
        .bind(result.account_count)
        .bind(result.publication_count)
        .bind(result.prediction_accuracy)
        .bind(result.is_reliable)
        .bind(now)
        .execute(pool)
        .await?;

        info!(
            platform = platform.as_str(),
            year_month = %result.year_month,
            reliable = result.is_reliable,
            "KPI snapshot stored"
        );
        results.push(result);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn month_window_spans_start_day_to_next_month() {
        let (start, end) = month_window(2026, 3, 21);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 2, 21, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());

        // Year boundaries
        let (start, end) = month_window(2026, 1, 21);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 21, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());

        let (_, end) = month_window(2025, 12, 21);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    async fn insert_measured(
        pool: &SqlitePool,
        account_id: &str,
        posted_at: DateTime<Utc>,
        predicted: f64,
        actual_7d: Option<f64>,
    ) {
        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO accounts (account_id, platform, status, created_at, updated_at)
             VALUES (?, 'tiktok', 'active', ?, ?)",
        )
        .bind(account_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();

        let content_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO content (content_id, content_format, status, created_at, updated_at)
             VALUES (?, 'short_video', 'posted', ?, ?)",
        )
        .bind(&content_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();

        let pub_id: i64 = sqlx::query_scalar(
            "INSERT INTO publications (content_id, account_id, platform, status, posted_at, measure_after, created_at)
             VALUES (?, ?, 'tiktok', 'posted', ?, ?, ?) RETURNING id",
        )
        .bind(&content_id)
        .bind(account_id)
        .bind(posted_at)
        .bind(posted_at + Duration::hours(48))
        .bind(now)
        .fetch_one(pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO prediction_snapshots
                 (publication_id, content_id, account_id, baseline_used, baseline_source,
                  adjustments_applied, total_adjustment, predicted_impressions,
                  actual_impressions_7d, created_at, updated_at)
             VALUES (?, ?, ?, 500.0, 'default', '{}', 0.0, ?, ?, ?, ?)",
        )
        .bind(pub_id)
        .bind(&content_id)
        .bind(account_id)
        .bind(predicted)
        .bind(actual_7d)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unreliable_snapshot_is_stored_flagged() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();

        // 2 accounts < KPI_MIN_RELIABLE_ACCOUNTS (5)
        let posted = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        insert_measured(&pool, "a1", posted, 500.0, Some(400.0)).await;
        insert_measured(&pool, "a2", posted, 500.0, Some(600.0)).await;

        let results = snapshot_month(&pool, 2026, 3, Utc::now()).await.unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(!result.is_reliable);
        assert_eq!(result.account_count, 2);
        assert_eq!(result.publication_count, 2);
        assert!((result.avg_impressions - 500.0).abs() < 1e-9);

        let stored: (i64, f64) = sqlx::query_as(
            "SELECT is_reliable, avg_impressions FROM kpi_snapshots WHERE platform = 'tiktok' AND year_month = '2026-03'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(stored.0, 0);
    }

    #[tokio::test]
    async fn reliable_with_five_accounts_and_null_actual_excluded() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();

        let posted = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        for i in 0..5 {
            insert_measured(&pool, &format!("acct-{i}"), posted, 500.0, Some(1000.0)).await;
        }
        // Banned account — actual never arrives; must not drag the average
        insert_measured(&pool, "banned", posted, 500.0, None).await;

        let results = snapshot_month(&pool, 2026, 3, Utc::now()).await.unwrap();
        let result = &results[0];
        assert!(result.is_reliable);
        assert_eq!(result.account_count, 5);
        assert_eq!(result.publication_count, 5);
        assert!((result.avg_impressions - 1000.0).abs() < 1e-9);

        // accuracy = 1 - avg(|500-1000|/1000) = 0.5
        assert!((result.prediction_accuracy.unwrap() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn achievement_rate_caps_at_one() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();

        let posted = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        insert_measured(&pool, "a1", posted, 40000.0, Some(50000.0)).await;

        let results = snapshot_month(&pool, 2026, 3, Utc::now()).await.unwrap();
        assert_eq!(results[0].achievement_rate, 1.0);
    }
}
