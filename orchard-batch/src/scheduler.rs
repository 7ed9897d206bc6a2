//! Batch scheduler
//!
//! A single minute-resolution loop. Every tick evaluates which jobs are due
//! for the current UTC hour, claims a dedup row keyed on
//! (year, month, day, hour, job), and runs the winners inside an error
//! wrapper. Claiming is an INSERT against a unique index, so two scheduler
//! instances (e.g. during a deploy) serialize on the store, not on a mutex.
//!
//! Tier cadences for the data-volume-driven jobs:
//!   Tier 1 (<500 metrics):    weekly, Monday
//!   Tier 2 (<5,000):          Monday and Thursday
//!   Tier 3 (<50,000):         daily
//!   Tier 4 (≥50,000):         twice daily (primary hour and +12h)

use crate::jobs::{JobKind, ScheduleHours};
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use orchard_common::db::settings;
use orchard_common::Result;
use sqlx::SqlitePool;
use tracing::{error, info};

/// Dedup key: one firing slot per job per UTC hour.
pub fn dedup_key(now: DateTime<Utc>) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:00",
        now.year(),
        now.month(),
        now.day(),
        now.hour()
    )
}

/// Map total metric volume to a tier.
pub fn tier_for_count(metrics_count: i64, t1: i64, t2: i64, t3: i64) -> u8 {
    if metrics_count >= t3 {
        4
    } else if metrics_count >= t2 {
        3
    } else if metrics_count >= t1 {
        2
    } else {
        1
    }
}

/// Whether a tier-based job is due at this hour/weekday.
pub fn tier_due(tier: u8, primary_hour: u32, hour: u32, weekday: Weekday) -> bool {
    match tier {
        1 => weekday == Weekday::Mon && hour == primary_hour,
        2 => (weekday == Weekday::Mon || weekday == Weekday::Thu) && hour == primary_hour,
        3 => hour == primary_hour,
        4 => hour == primary_hour || hour == (primary_hour + 12) % 24,
        _ => false,
    }
}

/// Outcome of one job evaluation within a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Not due at this hour
    NotDue,
    /// Due, but another tick/instance already claimed this hour's slot
    AlreadyClaimed,
    Executed { success: bool },
}

/// Evaluate and fire all due jobs for `now`. Returns per-job outcomes.
pub async fn tick(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<(JobKind, JobOutcome)>> {
    let hours = ScheduleHours::load(pool).await?;
    let hour = now.hour();
    let weekday = now.weekday();

    // Resolve the tier only when a tier-based job could fire this hour
    let tier_hours = [
        hours.adjustment_hour,
        (hours.adjustment_hour + 12) % 24,
        hours.weight_hour,
        (hours.weight_hour + 12) % 24,
    ];
    let tier = if tier_hours.contains(&hour) {
        let t1: i64 = settings::get_setting(pool, "WEIGHT_RECALC_TIER_1_THRESHOLD").await?;
        let t2: i64 = settings::get_setting(pool, "WEIGHT_RECALC_TIER_2_THRESHOLD").await?;
        let t3: i64 = settings::get_setting(pool, "WEIGHT_RECALC_TIER_3_THRESHOLD").await?;
        let metrics_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metrics")
            .fetch_one(pool)
            .await?;
        Some(tier_for_count(metrics_count, t1, t2, t3))
    } else {
        None
    };

    let mut outcomes = Vec::new();
    for job in JobKind::ALL {
        let due = match job {
            JobKind::BaselineUpdate => hour == hours.baseline_hour,
            JobKind::KpiSnapshot => now.day() == 1 && hour == hours.kpi_hour,
            JobKind::EmbeddingRefresh => {
                hours.embedding_interval_hours > 0 && hour % hours.embedding_interval_hours == 0
            }
            JobKind::AdjustmentCache => {
                tier.is_some_and(|t| tier_due(t, hours.adjustment_hour, hour, weekday))
            }
            JobKind::WeightRecalc => {
                tier.is_some_and(|t| tier_due(t, hours.weight_hour, hour, weekday))
            }
        };

        if !due {
            outcomes.push((job, JobOutcome::NotDue));
            continue;
        }

        let key = dedup_key(now);
        if !claim_execution(pool, job.name(), &key, now).await? {
            outcomes.push((job, JobOutcome::AlreadyClaimed));
            continue;
        }

        let success = execute_wrapped(pool, job, &key, now).await;
        outcomes.push((job, JobOutcome::Executed { success }));
    }

    Ok(outcomes)
}

/// Claim this hour's firing slot for a job. The UNIQUE(job_name, dedup_key)
/// index makes exactly one claimant win, across ticks and across scheduler
/// instances.
async fn claim_execution(
    pool: &SqlitePool,
    job_name: &str,
    key: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO batch_executions (job_name, dedup_key, started_at) VALUES (?, ?, ?)",
    )
    .bind(job_name)
    .bind(key)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Run a job inside the error wrapper: a thrown error becomes a failed
/// execution record, never a scheduler crash.
async fn execute_wrapped(
    pool: &SqlitePool,
    job: JobKind,
    key: &str,
    now: DateTime<Utc>,
) -> bool {
    info!(job = job.name(), "Batch job starting");
    let started = std::time::Instant::now();

    let (success, summary, error_message) = match job.execute(pool, now).await {
        Ok(summary) => (true, Some(summary), None),
        Err(e) => (false, None, Some(e.to_string())),
    };
    let duration_ms = started.elapsed().as_millis() as i64;

    match (&summary, &error_message) {
        (Some(summary), _) => {
            info!(job = job.name(), duration_ms, %summary, "Batch job completed")
        }
        (_, Some(message)) => {
            error!(job = job.name(), duration_ms, error = %message, "Batch job failed")
        }
        _ => {}
    }

    let record = sqlx::query(
        "UPDATE batch_executions SET duration_ms = ?, success = ?, error = ?
         WHERE job_name = ? AND dedup_key = ?",
    )
    .bind(duration_ms)
    .bind(success)
    .bind(error_message)
    .bind(job.name())
    .bind(key)
    .execute(pool)
    .await;

    if let Err(e) = record {
        error!(job = job.name(), error = %e, "Failed to record batch execution");
    }

    success
}

/// The scheduler loop: one tick per minute, forever. Tick failures are
/// logged and never break the loop.
pub async fn run_forever(pool: &SqlitePool) -> Result<()> {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Batch scheduler started (checking every 60s)");
    loop {
        interval.tick().await;
        if let Err(e) = tick(pool, Utc::now()).await {
            error!(error = %e, "Scheduler tick failed");
        }
    }
}
