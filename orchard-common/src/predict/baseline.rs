//! Account baselines
//!
//! A baseline is the expected impressions for an account absent any
//! content-specific adjustment. Baselines are refreshed daily by the batch
//! scheduler; prediction falls back to a live computation when no cached row
//! exists yet. Every stage of the cohort fallback chain is gated by
//! `BASELINE_MIN_SAMPLE` and the winning stage is recorded as the source.

use crate::db::models::{Account, AgeBucket, BaselineSource};
use crate::db::settings;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::info;

/// Baseline resolution outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineResult {
    pub baseline_impressions: f64,
    pub source: BaselineSource,
    pub sample_count: i64,
}

/// Get the baseline for an account: cached row first, live fallback chain
/// otherwise.
pub async fn account_baseline(
    pool: &SqlitePool,
    account: &Account,
    now: DateTime<Utc>,
) -> Result<BaselineResult> {
    let cached: Option<(f64, BaselineSource, i64)> = sqlx::query_as(
        "SELECT baseline_impressions, source, sample_count FROM account_baselines WHERE account_id = ?",
    )
    .bind(&account.account_id)
    .fetch_optional(pool)
    .await?;

    if let Some((baseline_impressions, source, sample_count)) = cached {
        return Ok(BaselineResult {
            baseline_impressions,
            source,
            sample_count,
        });
    }

    fallback_chain(pool, account, now).await
}

/// 4-stage cohort fallback chain:
/// platform × niche × age bucket → platform × niche → platform → default.
///
/// Stops at the first stage whose cohort size meets `BASELINE_MIN_SAMPLE`.
pub async fn fallback_chain(
    pool: &SqlitePool,
    account: &Account,
    now: DateTime<Utc>,
) -> Result<BaselineResult> {
    let min_sample = settings::baseline_min_sample(pool).await?;

    if let Some(niche) = &account.niche {
        // Stage 1: platform × niche × age bucket
        let age_days = (now - account.created_at).num_days();
        let bucket = AgeBucket::from_age_days(age_days);
        let (lower, upper) = bucket.created_at_bounds(now);

        if let Some(result) = cohort_average(
            pool,
            account.platform.as_str(),
            Some(niche),
            lower,
            upper,
            min_sample,
            BaselineSource::CohortNicheAge,
        )
        .await?
        {
            return Ok(result);
        }

        // Stage 2: platform × niche
        if let Some(result) = cohort_average(
            pool,
            account.platform.as_str(),
            Some(niche),
            None,
            None,
            min_sample,
            BaselineSource::CohortNiche,
        )
        .await?
        {
            return Ok(result);
        }
    }

    // Stage 3: platform only
    if let Some(result) = cohort_average(
        pool,
        account.platform.as_str(),
        None,
        None,
        None,
        min_sample,
        BaselineSource::CohortPlatform,
    )
    .await?
    {
        return Ok(result);
    }

    // Stage 4: fixed default
    let default = settings::baseline_default_impressions(pool).await?;
    Ok(BaselineResult {
        baseline_impressions: default,
        source: BaselineSource::Default,
        sample_count: 0,
    })
}

/// Average 7d views over a cohort; `None` if the cohort is below the minimum
/// sample size.
async fn cohort_average(
    pool: &SqlitePool,
    platform: &str,
    niche: Option<&str>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
    min_sample: i64,
    source: BaselineSource,
) -> Result<Option<BaselineResult>> {
    let row: (Option<f64>, i64) = sqlx::query_as(
        r#"
        SELECT AVG(m.views), COUNT(*)
        FROM publications p
        JOIN metrics m ON p.id = m.publication_id
        JOIN accounts a ON p.account_id = a.account_id
        WHERE a.platform = ?
          AND m.measurement_point = '7d'
          AND (? IS NULL OR a.niche = ?)
          AND (? IS NULL OR a.created_at >= ?)
          AND (? IS NULL OR a.created_at < ?)
        "#,
    )
    .bind(platform)
    .bind(niche)
    .bind(niche)
    .bind(created_after)
    .bind(created_after)
    .bind(created_before)
    .bind(created_before)
    .fetch_one(pool)
    .await?;

    match row {
        (Some(avg), count) if count >= min_sample => Ok(Some(BaselineResult {
            baseline_impressions: avg,
            source,
            sample_count: count,
        })),
        _ => Ok(None),
    }
}

/// Daily batch: recompute the baseline for every active account.
///
/// Own 7d history inside `BASELINE_WINDOW_DAYS` wins when sufficiently
/// sampled; otherwise the cohort fallback chain decides. Returns the number
/// of accounts refreshed.
pub async fn refresh_all(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let window_days: i64 = settings::get_setting(pool, "BASELINE_WINDOW_DAYS").await?;
    let min_sample = settings::baseline_min_sample(pool).await?;
    let window_start = now - Duration::days(window_days);

    let accounts = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE status = 'active'")
        .fetch_all(pool)
        .await?;

    let mut refreshed = 0u64;
    for account in &accounts {
        let own: (Option<f64>, i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>) = sqlx::query_as(
            r#"
            SELECT AVG(m.views), COUNT(*), MIN(m.measured_at), MAX(m.measured_at)
            FROM publications p
            JOIN metrics m ON p.id = m.publication_id
            WHERE p.account_id = ?
              AND m.measurement_point = '7d'
              AND m.measured_at >= ?
            "#,
        )
        .bind(&account.account_id)
        .bind(window_start)
        .fetch_one(pool)
        .await?;

        let (result, window) = match own {
            (Some(avg), count, start, end) if count >= min_sample => (
                BaselineResult {
                    baseline_impressions: avg,
                    source: BaselineSource::OwnHistory,
                    sample_count: count,
                },
                (start, end),
            ),
            _ => (fallback_chain(pool, account, now).await?, (None, None)),
        };

        sqlx::query(
            r#"
            INSERT INTO account_baselines
                (account_id, baseline_impressions, source, sample_count,
                 window_start, window_end, calculated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (account_id) DO UPDATE SET
                baseline_impressions = excluded.baseline_impressions,
                source = excluded.source,
                sample_count = excluded.sample_count,
                window_start = excluded.window_start,
                window_end = excluded.window_end,
                calculated_at = excluded.calculated_at
            "#,
        )
        .bind(&account.account_id)
        .bind(result.baseline_impressions)
        .bind(result.source)
        .bind(result.sample_count)
        .bind(window.0)
        .bind(window.1)
        .bind(now)
        .execute(pool)
        .await?;

        refreshed += 1;
    }

    info!(accounts = refreshed, "Baseline refresh complete");
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Platform;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();
        pool
    }

    async fn insert_account(pool: &SqlitePool, id: &str, platform: &str, niche: Option<&str>, age_days: i64) {
        let created = Utc::now() - Duration::days(age_days);
        sqlx::query(
            "INSERT INTO accounts (account_id, platform, niche, status, created_at, updated_at)
             VALUES (?, ?, ?, 'active', ?, ?)",
        )
        .bind(id)
        .bind(platform)
        .bind(niche)
        .bind(created)
        .bind(created)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_measured_publication(pool: &SqlitePool, account_id: &str, views: f64) {
        let now = Utc::now();
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

        let platform: Platform =
            sqlx::query_scalar("SELECT platform FROM accounts WHERE account_id = ?")
                .bind(account_id)
                .fetch_one(pool)
                .await
                .unwrap();

        let pub_id: i64 = sqlx::query_scalar(
            "INSERT INTO publications (content_id, account_id, platform, status, posted_at, measure_after, created_at)
             VALUES (?, ?, ?, 'posted', ?, ?, ?) RETURNING id",
        )
        .bind(&content_id)
        .bind(account_id)
        .bind(platform)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO metrics (publication_id, measurement_point, views, measured_at)
             VALUES (?, '7d', ?, ?)",
        )
        .bind(pub_id)
        .bind(views)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn load_account(pool: &SqlitePool, id: &str) -> Account {
        sqlx::query_as("SELECT * FROM accounts WHERE account_id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn empty_store_falls_back_to_default() {
        let pool = setup_test_db().await;
        insert_account(&pool, "acct-1", "tiktok", Some("cooking"), 10).await;

        let account = load_account(&pool, "acct-1").await;
        let result = fallback_chain(&pool, &account, Utc::now()).await.unwrap();
        assert_eq!(result.source, BaselineSource::Default);
        assert_eq!(result.baseline_impressions, 500.0);
        assert_eq!(result.sample_count, 0);
    }

    #[tokio::test]
    async fn niche_cohort_wins_when_sampled() {
        let pool = setup_test_db().await;
        // Same niche, same age bucket as the subject account
        for i in 0..3 {
            let id = format!("peer-{i}");
            insert_account(&pool, &id, "tiktok", Some("cooking"), 10).await;
            insert_measured_publication(&pool, &id, 1000.0 + i as f64 * 100.0).await;
        }
        insert_account(&pool, "subject", "tiktok", Some("cooking"), 5).await;

        let account = load_account(&pool, "subject").await;
        let result = fallback_chain(&pool, &account, Utc::now()).await.unwrap();
        assert_eq!(result.source, BaselineSource::CohortNicheAge);
        assert_eq!(result.sample_count, 3);
        assert!((result.baseline_impressions - 1100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn thin_cohort_cascades_to_platform_stage() {
        let pool = setup_test_db().await;
        // Only 2 niche peers (below BASELINE_MIN_SAMPLE=3), but 4 platform-wide
        for i in 0..2 {
            let id = format!("niche-peer-{i}");
            insert_account(&pool, &id, "tiktok", Some("cooking"), 10).await;
            insert_measured_publication(&pool, &id, 800.0).await;
        }
        for i in 0..2 {
            let id = format!("other-{i}");
            insert_account(&pool, &id, "tiktok", Some("travel"), 200).await;
            insert_measured_publication(&pool, &id, 400.0).await;
        }
        insert_account(&pool, "subject", "tiktok", Some("cooking"), 5).await;

        let account = load_account(&pool, "subject").await;
        let result = fallback_chain(&pool, &account, Utc::now()).await.unwrap();
        assert_eq!(result.source, BaselineSource::CohortPlatform);
        assert_eq!(result.sample_count, 4);
    }

    #[tokio::test]
    async fn refresh_prefers_own_history() {
        let pool = setup_test_db().await;
        insert_account(&pool, "acct-1", "youtube", Some("tech"), 50).await;
        for _ in 0..3 {
            insert_measured_publication(&pool, "acct-1", 2000.0).await;
        }

        let refreshed = refresh_all(&pool, Utc::now()).await.unwrap();
        assert_eq!(refreshed, 1);

        let (baseline, source): (f64, BaselineSource) = sqlx::query_as(
            "SELECT baseline_impressions, source FROM account_baselines WHERE account_id = 'acct-1'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(source, BaselineSource::OwnHistory);
        assert!((baseline - 2000.0).abs() < 1e-6);
    }
}
