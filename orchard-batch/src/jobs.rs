//! Batch job definitions
//!
//! Each job wraps a prediction-engine maintenance routine and returns a short
//! human-readable summary for the execution record. Job bodies never touch
//! scheduling concerns — cadence, dedup and error containment live in the
//! scheduler.

use chrono::{DateTime, Datelike, Utc};
use orchard_common::db::settings;
use orchard_common::predict::{adjustment_cache, baseline, kpi, weights};
use orchard_common::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

/// The five maintenance jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    BaselineUpdate,
    AdjustmentCache,
    WeightRecalc,
    KpiSnapshot,
    EmbeddingRefresh,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::BaselineUpdate,
        JobKind::AdjustmentCache,
        JobKind::WeightRecalc,
        JobKind::KpiSnapshot,
        JobKind::EmbeddingRefresh,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::BaselineUpdate => "baseline-update",
            JobKind::AdjustmentCache => "adjustment-cache",
            JobKind::WeightRecalc => "weight-recalc",
            JobKind::KpiSnapshot => "kpi-snapshot",
            JobKind::EmbeddingRefresh => "embedding-refresh",
        }
    }

    /// Whether this job's cadence is tier-based (data volume dependent).
    pub fn is_tiered(&self) -> bool {
        matches!(self, JobKind::AdjustmentCache | JobKind::WeightRecalc)
    }

    /// Execute the job. Returns a summary line for the execution record.
    pub async fn execute(&self, pool: &SqlitePool, now: DateTime<Utc>) -> Result<String> {
        match self {
            JobKind::BaselineUpdate => {
                let refreshed = baseline::refresh_all(pool, now).await?;
                Ok(format!("refreshed {refreshed} account baselines"))
            }
            JobKind::AdjustmentCache => {
                let rows = adjustment_cache::refresh_all(pool, now).await?;
                Ok(format!("cached {rows} factor buckets"))
            }
            JobKind::WeightRecalc => {
                let outcomes = weights::recalibrate_all(pool, now).await?;
                let performed = outcomes
                    .values()
                    .filter(|o| matches!(o, weights::RecalcOutcome::Performed))
                    .count();
                Ok(format!("recalibrated {performed}/{} platforms", outcomes.len()))
            }
            JobKind::KpiSnapshot => {
                // Always targets the just-completed month
                let (year, month) = previous_month(now);
                let results = kpi::snapshot_month(pool, year, month, now).await?;
                Ok(format!("stored {} snapshots for {year:04}-{month:02}", results.len()))
            }
            JobKind::EmbeddingRefresh => {
                let refreshed = refresh_embeddings(pool, now).await?;
                Ok(format!("refreshed {refreshed} embeddings"))
            }
        }
    }
}

/// The calendar month preceding `now`.
pub fn previous_month(now: DateTime<Utc>) -> (i32, u32) {
    if now.month() == 1 {
        (now.year() - 1, 12)
    } else {
        (now.year(), now.month() - 1)
    }
}

/// Refresh stale content embeddings.
///
/// Source text is hashed; rows whose hash drifted (or that have no embedding
/// yet) are re-embedded. The local embedder is a deterministic hash-derived
/// stand-in used when no external embedding backend is configured.
pub async fn refresh_embeddings(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let rows: Vec<(String, Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT c.content_id, c.generated_text, c.niche, ce.source_hash
        FROM content c
        LEFT JOIN content_embeddings ce ON c.content_id = ce.content_id
        WHERE c.status NOT IN ('cancelled', 'rejected')
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut refreshed = 0u64;
    for (content_id, generated_text, niche, stored_hash) in rows {
        let source = format!(
            "{}|{}",
            niche.as_deref().unwrap_or(""),
            generated_text.as_deref().unwrap_or("")
        );
        let hash = hex_digest(&source);
        if stored_hash.as_deref() == Some(hash.as_str()) {
            continue;
        }

        let embedding = local_embedding(&source);
        let embedding_json = serde_json::to_string(&embedding)
            .map_err(|e| orchard_common::Error::Internal(format!("embedding serialize: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO content_embeddings (content_id, embedding, source_hash, embedded_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (content_id) DO UPDATE SET
                embedding = excluded.embedding,
                source_hash = excluded.source_hash,
                embedded_at = excluded.embedded_at
            "#,
        )
        .bind(&content_id)
        .bind(embedding_json)
        .bind(&hash)
        .bind(now)
        .execute(pool)
        .await?;
        refreshed += 1;
    }

    Ok(refreshed)
}

fn hex_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Deterministic 16-dimensional unit-ish vector derived from the source hash.
fn local_embedding(source: &str) -> Vec<f32> {
    let digest = Sha256::digest(source.as_bytes());
    digest
        .chunks(2)
        .map(|pair| (u16::from_be_bytes([pair[0], pair[1]]) as f32 / u16::MAX as f32) * 2.0 - 1.0)
        .collect()
}

/// Settings-driven schedule hours for the fixed-cadence jobs.
pub struct ScheduleHours {
    pub baseline_hour: u32,
    pub adjustment_hour: u32,
    pub weight_hour: u32,
    pub kpi_hour: u32,
    pub embedding_interval_hours: u32,
}

impl ScheduleHours {
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        Ok(Self {
            baseline_hour: settings::get_setting(pool, "BASELINE_UPDATE_UTC_HOUR").await?,
            adjustment_hour: settings::get_setting(pool, "ADJUSTMENT_CACHE_UTC_HOUR").await?,
            weight_hour: settings::get_setting(pool, "WEIGHT_RECALC_UTC_HOUR").await?,
            kpi_hour: settings::get_setting(pool, "KPI_SNAPSHOT_UTC_HOUR").await?,
            embedding_interval_hours: settings::get_setting(pool, "EMBEDDING_REFRESH_INTERVAL_HOURS")
                .await?,
        })
    }
}
