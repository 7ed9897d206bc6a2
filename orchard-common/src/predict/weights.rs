//! Prediction weight recalibration
//!
//! Periodically moves each factor weight toward its newly observed importance
//! via an exponential moving average. Two safety rails keep the model stable:
//! the per-cycle update is clipped to ±`WEIGHT_CHANGE_MAX_RATE` of the prior
//! weight, and the result is floored at `WEIGHT_FLOOR` so no factor can be
//! driven to zero and become permanently unrecoverable. Weights are then
//! normalized to sum 1 and every change is written to the audit log.

use crate::db::models::Platform;
use crate::db::settings;
use crate::predict::engine::AdjustmentsApplied;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::info;

use crate::predict::factors::Factor;

/// Load the weight map for a platform, uniform-filled for missing factors.
pub async fn load_weights(
    pool: &SqlitePool,
    platform: Platform,
) -> Result<BTreeMap<Factor, f64>> {
    let rows: Vec<(String, f64)> =
        sqlx::query_as("SELECT factor_name, weight FROM prediction_weights WHERE platform = ?")
            .bind(platform)
            .fetch_all(pool)
            .await?;

    let uniform = 1.0 / Factor::ALL.len() as f64;
    let mut weights: BTreeMap<Factor, f64> =
        Factor::ALL.iter().map(|f| (*f, uniform)).collect();
    for (name, weight) in rows {
        if let Some(factor) = Factor::from_str(&name) {
            weights.insert(factor, weight);
        }
    }

    Ok(weights)
}

/// Outcome of one platform's recalibration attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RecalcOutcome {
    Performed,
    /// Skipped with the reason preserved for the batch execution record
    Skipped(String),
}

/// Thresholds mapping a platform's metric volume to a recalc interval.
struct TierThresholds {
    t1: i64,
    t2: i64,
    t3: i64,
}

fn tier_interval_hours(metrics_count: i64, thresholds: &TierThresholds) -> (u8, i64) {
    if metrics_count >= thresholds.t3 {
        (4, 12)
    } else if metrics_count >= thresholds.t2 {
        (3, 24)
    } else if metrics_count >= thresholds.t1 {
        (2, 72)
    } else {
        (1, 168)
    }
}

/// Recalibrate weights for one platform. Skips when the tier interval has not
/// elapsed or too little new data arrived since the last run.
pub async fn recalibrate_platform(
    pool: &SqlitePool,
    platform: Platform,
    now: DateTime<Utc>,
) -> Result<RecalcOutcome> {
    let thresholds = TierThresholds {
        t1: settings::get_setting(pool, "WEIGHT_RECALC_TIER_1_THRESHOLD").await?,
        t2: settings::get_setting(pool, "WEIGHT_RECALC_TIER_2_THRESHOLD").await?,
        t3: settings::get_setting(pool, "WEIGHT_RECALC_TIER_3_THRESHOLD").await?,
    };
    let min_new_data: i64 = settings::get_setting(pool, "WEIGHT_RECALC_MIN_NEW_DATA").await?;
    let alpha: f64 = settings::get_setting(pool, "WEIGHT_SMOOTHING_ALPHA").await?;
    let max_rate: f64 = settings::get_setting(pool, "WEIGHT_CHANGE_MAX_RATE").await?;
    let floor = settings::weight_floor(pool).await?;

    // Tier from this platform's total metric volume
    let metrics_count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM metrics m
        JOIN publications p ON m.publication_id = p.id
        WHERE p.platform = ?
        "#,
    )
    .bind(platform)
    .fetch_one(pool)
    .await?;
    let (tier, interval_hours) = tier_interval_hours(metrics_count, &thresholds);

    // Interval check against the audit log
    let last_calc: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT MAX(calculated_at) FROM weight_audit_log WHERE platform = ?")
            .bind(platform)
            .fetch_one(pool)
            .await?;

    if let Some(last) = last_calc {
        let hours_since = (now - last).num_hours();
        if hours_since < interval_hours {
            return Ok(RecalcOutcome::Skipped(format!(
                "tier {tier} interval not elapsed ({hours_since}h < {interval_hours}h)"
            )));
        }
    }

    // New-data check since the last recalibration
    let new_data_count: i64 = match last_calc {
        Some(last) => {
            sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM metrics m
                JOIN publications p ON m.publication_id = p.id
                WHERE p.platform = ? AND m.measured_at > ?
                "#,
            )
            .bind(platform)
            .bind(last)
            .fetch_one(pool)
            .await?
        }
        None => metrics_count,
    };
    if new_data_count < min_new_data {
        return Ok(RecalcOutcome::Skipped(format!(
            "insufficient new data ({new_data_count} < {min_new_data})"
        )));
    }

    let old_weights = load_weights(pool, platform).await?;

    // Observed importance: direction accuracy x average impact per factor,
    // over snapshots with a measured 7d outcome in the last 90 days.
    let rows: Vec<(String, f64, f64)> = sqlx::query_as(
        r#"
        SELECT ps.adjustments_applied, m.views, ps.baseline_used
        FROM prediction_snapshots ps
        JOIN publications p ON ps.publication_id = p.id
        JOIN metrics m ON p.id = m.publication_id
        WHERE p.platform = ?
          AND ps.prediction_error_7d IS NOT NULL
          AND m.measurement_point = '7d'
          AND ps.created_at > ?
        "#,
    )
    .bind(platform)
    .bind(now - Duration::days(90))
    .fetch_all(pool)
    .await?;

    let data_count = rows.len() as i64;
    let mut direction_hits: BTreeMap<Factor, (f64, f64, f64)> = BTreeMap::new(); // (hits, impact_sum, n)
    for (raw, views, baseline) in &rows {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
            continue;
        };
        let Ok(applied) = AdjustmentsApplied::from_value(&value) else {
            continue;
        };
        for (factor, detail) in applied.factors {
            let entry = direction_hits.entry(factor).or_insert((0.0, 0.0, 0.0));
            if detail.adjustment * (views - baseline) > 0.0 {
                entry.0 += 1.0;
            }
            entry.1 += (detail.adjustment * detail.weight).abs();
            entry.2 += 1.0;
        }
    }

    let mut raw_contributions: BTreeMap<Factor, f64> =
        Factor::ALL.iter().map(|f| (*f, 0.0)).collect();
    for (factor, (hits, impact_sum, n)) in direction_hits {
        if n > 0.0 {
            raw_contributions.insert(factor, (hits / n) * (impact_sum / n));
        }
    }

    // Normalize contributions; uniform fallback when there is no signal
    let uniform = 1.0 / Factor::ALL.len() as f64;
    let total: f64 = raw_contributions.values().sum();
    let calculated: BTreeMap<Factor, f64> = if total == 0.0 {
        Factor::ALL.iter().map(|f| (*f, uniform)).collect()
    } else {
        raw_contributions
            .iter()
            .map(|(f, c)| (*f, c / total))
            .collect()
    };

    // EMA toward the observed importance, then rate clip, then floor
    let mut ema_weights: BTreeMap<Factor, f64> = BTreeMap::new();
    for factor in Factor::ALL {
        let old = old_weights.get(&factor).copied().unwrap_or(uniform);
        let calc = calculated.get(&factor).copied().unwrap_or(uniform);
        let mut ema = alpha * calc + (1.0 - alpha) * old;
        ema = ema.clamp(old * (1.0 - max_rate), old * (1.0 + max_rate));
        ema = ema.max(floor);
        ema_weights.insert(factor, ema);
    }

    // Final normalization to sum 1.0
    let ema_total: f64 = ema_weights.values().sum();
    let final_weights: BTreeMap<Factor, f64> = ema_weights
        .iter()
        .map(|(f, w)| (*f, w / ema_total))
        .collect();

    let mut tx = pool.begin().await?;
    for factor in Factor::ALL {
        let old = old_weights.get(&factor).copied().unwrap_or(uniform);
        let new = final_weights[&factor];

        sqlx::query(
            "UPDATE prediction_weights SET weight = ?, updated_at = ?
             WHERE platform = ? AND factor_name = ?",
        )
        .bind(new)
        .bind(now)
        .bind(platform)
        .bind(factor.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO weight_audit_log
                (platform, factor_name, old_weight, new_weight, data_count, metrics_count, calculated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(platform)
        .bind(factor.as_str())
        .bind(old)
        .bind(new)
        .bind(data_count)
        .bind(metrics_count)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    info!(
        platform = platform.as_str(),
        tier,
        data_count,
        "Weight recalibration performed"
    );
    Ok(RecalcOutcome::Performed)
}

/// Recalibrate every platform. Outcomes are reported per platform.
pub async fn recalibrate_all(
    pool: &SqlitePool,
    now: DateTime<Utc>,
) -> Result<BTreeMap<Platform, RecalcOutcome>> {
    let mut outcomes = BTreeMap::new();
    for platform in Platform::ALL {
        let outcome = recalibrate_platform(pool, platform, now).await?;
        outcomes.insert(platform, outcome);
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_mapping() {
        let t = TierThresholds { t1: 500, t2: 5000, t3: 50000 };
        assert_eq!(tier_interval_hours(0, &t), (1, 168));
        assert_eq!(tier_interval_hours(499, &t), (1, 168));
        assert_eq!(tier_interval_hours(500, &t), (2, 72));
        assert_eq!(tier_interval_hours(4999, &t), (2, 72));
        assert_eq!(tier_interval_hours(5000, &t), (3, 24));
        assert_eq!(tier_interval_hours(50000, &t), (4, 12));
    }

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn load_weights_fills_uniform() {
        let pool = setup_test_db().await;

        let weights = load_weights(&pool, Platform::Tiktok).await.unwrap();
        assert_eq!(weights.len(), 9);
        let sum: f64 = weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn recalc_skips_without_new_data() {
        let pool = setup_test_db().await;

        let outcome = recalibrate_platform(&pool, Platform::Youtube, Utc::now()).await.unwrap();
        assert!(matches!(outcome, RecalcOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn recalc_clips_change_and_enforces_floor() {
        let pool = setup_test_db().await;
        let now = Utc::now();

        // Enough "new data" to clear the gate
        sqlx::query("UPDATE settings SET value = '1' WHERE key = 'WEIGHT_RECALC_MIN_NEW_DATA'")
            .execute(&pool)
            .await
            .unwrap();

        // Seed one measured publication so metrics exist
        sqlx::query(
            "INSERT INTO accounts (account_id, platform, status, created_at, updated_at)
             VALUES ('a', 'youtube', 'active', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO content (content_id, content_format, status, created_at, updated_at)
             VALUES ('c', 'short_video', 'posted', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();
        let pub_id: i64 = sqlx::query_scalar(
            "INSERT INTO publications (content_id, account_id, platform, status, posted_at, measure_after, created_at)
             VALUES ('c', 'a', 'youtube', 'posted', ?, ?, ?) RETURNING id",
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO metrics (publication_id, measurement_point, views, measured_at)
             VALUES (?, '7d', 900.0, ?)",
        )
        .bind(pub_id)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        // A snapshot where only hook_type pulled in the right direction
        let mut adjustments = crate::predict::engine::AdjustmentsApplied::default();
        for factor in Factor::ALL {
            let adjustment = if factor == Factor::HookType { 0.4 } else { 0.0 };
            adjustments.factors.insert(
                factor,
                crate::predict::engine::AdjustmentDetail {
                    value: "v".into(),
                    adjustment,
                    weight: 1.0 / 9.0,
                },
            );
        }
        sqlx::query(
            "INSERT INTO prediction_snapshots
                 (publication_id, content_id, account_id, baseline_used, baseline_source,
                  adjustments_applied, total_adjustment, predicted_impressions,
                  actual_impressions_7d, prediction_error_7d, created_at, updated_at)
             VALUES (?, 'c', 'a', 500.0, 'default', ?, 0.04, 520.0, 900.0, 0.42, ?, ?)",
        )
        .bind(pub_id)
        .bind(adjustments.to_value().to_string())
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        let outcome = recalibrate_platform(&pool, Platform::Youtube, now).await.unwrap();
        assert_eq!(outcome, RecalcOutcome::Performed);

        let weights = load_weights(&pool, Platform::Youtube).await.unwrap();
        let uniform = 1.0 / 9.0;

        // Weights stay normalized
        let sum: f64 = weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);

        // All floored at or above WEIGHT_FLOOR
        for weight in weights.values() {
            assert!(*weight >= 0.02 - 1e-9);
        }

        // Per-cycle change clipped: pre-normalization values stayed within
        // ±20% of uniform, so post-normalization no factor moved far from it
        for (factor, weight) in &weights {
            assert!(
                (*weight - uniform).abs() <= uniform * 0.25,
                "{:?} moved too far: {}",
                factor,
                weight
            );
        }

        // Audit log recorded one row per factor
        let audit_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM weight_audit_log WHERE platform = 'youtube'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(audit_count, 9);

        // Immediately recalibrating again hits the tier interval gate
        let outcome = recalibrate_platform(&pool, Platform::Youtube, now).await.unwrap();
        assert!(matches!(outcome, RecalcOutcome::Skipped(_)));
    }
}
