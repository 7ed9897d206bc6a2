//! Prediction pipeline
//!
//! Called at publish time, after the publication row exists. Produces a
//! prediction snapshot: baseline × (1 + Σ weighted adjustments), with every
//! adjustment clipped individually, the weighted total clipped, and the final
//! value clamped to a ratio band around the baseline.
//!
//! A prediction where no factor has any applicable history is a cold start —
//! recorded with a marker, never treated as an error.

use crate::db::models::{Account, Content, Publication};
use crate::predict::baseline;
use crate::predict::factors::{resolve_factor_values, Factor};
use crate::predict::weights;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

/// One factor's contribution inside `adjustments_applied`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentDetail {
    pub value: String,
    pub adjustment: f64,
    pub weight: f64,
}

/// The `adjustments_applied` document: exactly 9 factor keys plus an optional
/// cold-start marker. This shape is a wire contract with the dashboard.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdjustmentsApplied {
    pub factors: BTreeMap<Factor, AdjustmentDetail>,
    pub cold_start: bool,
}

impl AdjustmentsApplied {
    /// Cold start means every factor's adjustment is exactly zero.
    pub fn detect_cold_start(&mut self) {
        self.cold_start =
            !self.factors.is_empty() && self.factors.values().all(|d| d.adjustment == 0.0);
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (factor, detail) in &self.factors {
            map.insert(
                factor.as_str().to_string(),
                serde_json::json!({
                    "value": detail.value,
                    "adjustment": detail.adjustment,
                    "weight": detail.weight,
                }),
            );
        }
        if self.cold_start {
            map.insert("cold_start".to_string(), Value::String("true".to_string()));
        }
        Value::Object(map)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::InvalidInput("adjustments_applied is not an object".into()))?;

        let mut factors = BTreeMap::new();
        for (key, entry) in map {
            if key == "cold_start" {
                continue;
            }
            let factor = Factor::from_str(key).ok_or_else(|| {
                Error::InvalidInput(format!("Unknown adjustment factor: {}", key))
            })?;
            let detail: AdjustmentDetail = serde_json::from_value(entry.clone())
                .map_err(|e| Error::InvalidInput(format!("Bad adjustment entry {}: {}", key, e)))?;
            factors.insert(factor, detail);
        }

        let cold_start = map
            .get("cold_start")
            .and_then(|v| v.as_str())
            .map(|s| s == "true")
            .unwrap_or(false);

        Ok(Self { factors, cold_start })
    }
}

/// Output of [`predict`].
#[derive(Debug, Clone)]
pub struct Prediction {
    pub publication_id: i64,
    pub baseline_used: f64,
    pub baseline_source: crate::db::models::BaselineSource,
    pub total_adjustment: f64,
    pub predicted_impressions: f64,
    pub adjustments: AdjustmentsApplied,
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// Clip bounds read from settings once per prediction.
struct ClipSettings {
    individual_min: f64,
    individual_max: f64,
    total_min: f64,
    total_max: f64,
    value_min_ratio: f64,
    value_max_ratio: f64,
    cross_min_sample: i64,
}

impl ClipSettings {
    async fn load(pool: &SqlitePool) -> Result<Self> {
        use crate::db::settings::get_setting;
        Ok(Self {
            individual_min: get_setting(pool, "ADJUSTMENT_INDIVIDUAL_MIN").await?,
            individual_max: get_setting(pool, "ADJUSTMENT_INDIVIDUAL_MAX").await?,
            total_min: get_setting(pool, "ADJUSTMENT_TOTAL_MIN").await?,
            total_max: get_setting(pool, "ADJUSTMENT_TOTAL_MAX").await?,
            value_min_ratio: get_setting(pool, "PREDICTION_VALUE_MIN_RATIO").await?,
            value_max_ratio: get_setting(pool, "PREDICTION_VALUE_MAX_RATIO").await?,
            cross_min_sample: get_setting(pool, "CROSS_ACCOUNT_MIN_SAMPLE").await?,
        })
    }
}

/// Create (or refresh) the prediction snapshot for a publication.
pub async fn predict(pool: &SqlitePool, publication_id: i64) -> Result<Prediction> {
    let now = Utc::now();

    let publication =
        sqlx::query_as::<_, Publication>("SELECT * FROM publications WHERE id = ?")
            .bind(publication_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Publication not found: {}", publication_id)))?;

    let content = sqlx::query_as::<_, Content>("SELECT * FROM content WHERE content_id = ?")
        .bind(&publication.content_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Content not found: {}", publication.content_id)))?;

    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE account_id = ?")
        .bind(&publication.account_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Account not found: {}", publication.account_id)))?;

    let clips = ClipSettings::load(pool).await?;

    // Step 1: baseline (cached row or live fallback chain)
    let base = baseline::account_baseline(pool, &account, now).await?;

    // Step 2: per-platform weights, uniform-filled for missing factors
    let factor_weights = weights::load_weights(pool, publication.platform).await?;

    // Step 3: factor values and cached adjustments
    let factor_values = resolve_factor_values(&content, &publication);

    let mut adjustments = AdjustmentsApplied::default();
    let mut total_adjustment = 0.0;

    for factor in Factor::ALL {
        let (raw_adjustment, value) = if factor == Factor::CrossAccountPerformance {
            // Step 4: computed live from sibling publications of the same content
            let cross = cross_account_adjustment(
                pool,
                &publication.content_id,
                publication.platform.as_str(),
                &publication.account_id,
                clips.cross_min_sample,
            )
            .await?;
            (cross.unwrap_or(0.0), format!("{:.4}", cross.unwrap_or(0.0)))
        } else {
            match factor_values.get(&factor).cloned().flatten() {
                Some(value) => {
                    let cached = cached_adjustment(
                        pool,
                        publication.platform.as_str(),
                        factor.as_str(),
                        &value,
                    )
                    .await?;
                    (cached.unwrap_or(0.0), value)
                }
                None => (0.0, "NULL".to_string()),
            }
        };

        let adjustment = clamp(raw_adjustment, clips.individual_min, clips.individual_max);
        let weight = factor_weights
            .get(&factor)
            .copied()
            .unwrap_or(1.0 / Factor::ALL.len() as f64);

        total_adjustment += weight * adjustment;
        adjustments
            .factors
            .insert(factor, AdjustmentDetail { value, adjustment, weight });
    }

    // Step 5: total clip, value computation, final ratio clamp
    total_adjustment = clamp(total_adjustment, clips.total_min, clips.total_max);

    let unclamped = base.baseline_impressions * (1.0 + total_adjustment);
    let predicted_impressions = clamp(
        unclamped,
        base.baseline_impressions * clips.value_min_ratio,
        base.baseline_impressions * clips.value_max_ratio,
    );

    adjustments.detect_cold_start();
    if adjustments.cold_start {
        tracing::info!(
            publication_id,
            "Cold-start prediction: no applicable history for any factor"
        );
    }

    upsert_snapshot(
        pool,
        &publication,
        &base,
        &adjustments,
        total_adjustment,
        predicted_impressions,
        now,
    )
    .await?;

    Ok(Prediction {
        publication_id,
        baseline_used: base.baseline_impressions,
        baseline_source: base.source,
        total_adjustment,
        predicted_impressions,
        adjustments,
    })
}

/// Cached historical adjustment for one (platform, factor, value) bucket.
async fn cached_adjustment(
    pool: &SqlitePool,
    platform: &str,
    factor_name: &str,
    factor_value: &str,
) -> Result<Option<f64>> {
    let adjustment: Option<f64> = sqlx::query_scalar(
        r#"
        SELECT adjustment FROM adjustment_factor_cache
        WHERE platform = ? AND factor_name = ? AND factor_value = ? AND is_active = 1
        "#,
    )
    .bind(platform)
    .bind(factor_name)
    .bind(factor_value)
    .fetch_optional(pool)
    .await?;

    Ok(adjustment)
}

/// Average relative performance of the same content on other accounts of the
/// same platform. `None` below the minimum sample.
async fn cross_account_adjustment(
    pool: &SqlitePool,
    content_id: &str,
    platform: &str,
    exclude_account_id: &str,
    min_sample: i64,
) -> Result<Option<f64>> {
    let row: Option<(Option<f64>, i64)> = sqlx::query_as(
        r#"
        SELECT AVG(m.views / ps.baseline_used - 1.0), COUNT(*)
        FROM prediction_snapshots ps
        JOIN publications p ON ps.publication_id = p.id
        JOIN metrics m ON p.id = m.publication_id
        WHERE ps.content_id = ?
          AND p.platform = ?
          AND p.account_id != ?
          AND m.measurement_point = '7d'
          AND ps.baseline_used > 0
        "#,
    )
    .bind(content_id)
    .bind(platform)
    .bind(exclude_account_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some((Some(avg), count)) if count >= min_sample => Ok(Some(avg)),
        _ => Ok(None),
    }
}

#[allow(clippy::too_many_arguments)]
async fn upsert_snapshot(
    pool: &SqlitePool,
    publication: &Publication,
    base: &baseline::BaselineResult,
    adjustments: &AdjustmentsApplied,
    total_adjustment: f64,
    predicted_impressions: f64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO prediction_snapshots
            (publication_id, content_id, account_id, baseline_used, baseline_source,
             adjustments_applied, total_adjustment, predicted_impressions, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (publication_id) DO UPDATE SET
            baseline_used = excluded.baseline_used,
            baseline_source = excluded.baseline_source,
            adjustments_applied = excluded.adjustments_applied,
            total_adjustment = excluded.total_adjustment,
            predicted_impressions = excluded.predicted_impressions,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(publication.id)
    .bind(&publication.content_id)
    .bind(&publication.account_id)
    .bind(base.baseline_impressions)
    .bind(base.source)
    .bind(adjustments.to_value().to_string())
    .bind(total_adjustment)
    .bind(predicted_impressions)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
