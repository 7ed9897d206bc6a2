//! Adjustment factor cache refresh
//!
//! Precomputes the 8 cacheable factors per platform from measured history:
//! for each (factor, value) bucket with enough samples, the cached adjustment
//! is the average relative lift `AVG(actual / baseline - 1)`. The live
//! cross-account factor is never cached here.

use crate::db::models::Platform;
use crate::db::settings;
use crate::predict::factors::{duration_bucket, hour_bucket, Factor};
use crate::Result;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::info;

/// One measured data point feeding the cache.
#[derive(Debug, sqlx::FromRow)]
struct CacheSourceRow {
    baseline_used: f64,
    views: f64,
    posted_at: DateTime<Utc>,
    hook_type: Option<String>,
    niche: Option<String>,
    narrative_structure: Option<String>,
    total_duration_seconds: Option<f64>,
    sound_bgm: Option<String>,
    tags: Option<sqlx::types::Json<Vec<String>>>,
}

impl CacheSourceRow {
    /// Bucketed value for a cacheable factor, if present on this row.
    fn factor_value(&self, factor: Factor) -> Option<String> {
        match factor {
            Factor::HookType => self.hook_type.clone(),
            Factor::Niche => self.niche.clone(),
            Factor::NarrativeStructure => self.narrative_structure.clone(),
            Factor::ContentLength => self
                .total_duration_seconds
                .map(|d| duration_bucket(d).to_string()),
            Factor::PostHour => Some(hour_bucket(self.posted_at.hour()).to_string()),
            Factor::PostWeekday => {
                Some(self.posted_at.weekday().num_days_from_sunday().to_string())
            }
            Factor::SoundBgm => self.sound_bgm.clone(),
            Factor::HashtagKeyword => {
                self.tags.as_ref().and_then(|tags| tags.0.first().cloned())
            }
            Factor::CrossAccountPerformance => None,
        }
    }
}

/// Refresh the cache for every platform. Returns the number of upserted rows.
pub async fn refresh_all(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let min_sample: i64 = settings::get_setting(pool, "ANALYSIS_MIN_SAMPLE_SIZE").await?;
    let mut upserted = 0u64;

    for platform in Platform::ALL {
        upserted += refresh_platform(pool, platform, min_sample, now).await?;
    }

    info!(rows = upserted, "Adjustment cache refresh complete");
    Ok(upserted)
}

/// Refresh one platform's cache from its last 90 days of measured history.
pub async fn refresh_platform(
    pool: &SqlitePool,
    platform: Platform,
    min_sample: i64,
    now: DateTime<Utc>,
) -> Result<u64> {
    let rows = sqlx::query_as::<_, CacheSourceRow>(
        r#"
        SELECT ps.baseline_used, m.views, p.posted_at,
               c.hook_type, c.niche, c.narrative_structure,
               c.total_duration_seconds, c.sound_bgm, c.tags
        FROM prediction_snapshots ps
        JOIN publications p ON ps.publication_id = p.id
        JOIN metrics m ON p.id = m.publication_id
        JOIN content c ON ps.content_id = c.content_id
        WHERE p.platform = ?
          AND ps.created_at > ?
          AND ps.baseline_used > 0
          AND m.measurement_point = '7d'
        "#,
    )
    .bind(platform)
    .bind(now - Duration::days(90))
    .fetch_all(pool)
    .await?;

    // Aggregate relative lift per (factor, value) bucket
    let mut buckets: BTreeMap<(Factor, String), (f64, i64)> = BTreeMap::new();
    for row in &rows {
        let lift = row.views / row.baseline_used - 1.0;
        for factor in Factor::ALL.into_iter().filter(Factor::is_cached) {
            if let Some(value) = row.factor_value(factor) {
                let entry = buckets.entry((factor, value)).or_insert((0.0, 0));
                entry.0 += lift;
                entry.1 += 1;
            }
        }
    }

    // Deactivate old entries; buckets that survive get re-activated below
    sqlx::query("UPDATE adjustment_factor_cache SET is_active = 0 WHERE platform = ?")
        .bind(platform)
        .execute(pool)
        .await?;

    let mut upserted = 0u64;
    for ((factor, value), (lift_sum, count)) in buckets {
        if count < min_sample {
            continue;
        }
        let adjustment = lift_sum / count as f64;

        sqlx::query(
            r#"
            INSERT INTO adjustment_factor_cache
                (platform, factor_name, factor_value, adjustment, sample_count, is_active, updated_at)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT (platform, factor_name, factor_value) DO UPDATE SET
                adjustment = excluded.adjustment,
                sample_count = excluded.sample_count,
                is_active = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(platform)
        .bind(factor.as_str())
        .bind(&value)
        .bind(adjustment)
        .bind(count)
        .bind(now)
        .execute(pool)
        .await?;
        upserted += 1;
    }

    Ok(upserted)
}
