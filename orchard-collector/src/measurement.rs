//! Measurement rounds
//!
//! Measure tasks become claimable only once their publication's fixed delay
//! has elapsed. Each round records metrics and the snapshot actual exactly
//! once; re-delivery is a no-op. After the first (48h) round the follow-up
//! rounds are scheduled, after 48h/7d an analysis (curate) task is queued,
//! and the 30d round closes the publication out.

use chrono::{DateTime, Duration, Utc};
use orchard_common::db::models::{
    MeasurementRound, Platform, Task, TaskPayload, TaskType,
};
use orchard_common::db::{settings, tasks};
use orchard_common::platform::{collector, AdapterRegistry};
use orchard_common::predict::accuracy;
use orchard_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Claim the next measure task whose publication is due for its round.
///
/// Same atomic single-statement shape as the generic queue claim, with the
/// round-delay eligibility folded into the selection.
pub async fn claim_due_measure_task(
    pool: &SqlitePool,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        r#"
        UPDATE tasks
        SET status = 'processing', assigned_worker = ?, started_at = ?
        WHERE id = (
            SELECT t.id FROM tasks t
            JOIN publications p
              ON p.id = CAST(json_extract(t.payload, '$.publication_id') AS INTEGER)
            WHERE t.task_type = 'measure'
              AND t.status IN ('pending', 'queued', 'retrying')
              AND (t.retry_after IS NULL OR t.retry_after <= ?)
              AND (julianday(?) - julianday(p.posted_at)) * 24.0 >=
                  CASE json_extract(t.payload, '$.measurement_round')
                      WHEN '48h' THEN 48.0
                      WHEN '7d' THEN 168.0
                      WHEN '30d' THEN 720.0
                      ELSE 48.0
                  END
            ORDER BY t.priority DESC, t.created_at ASC
            LIMIT 1
        )
          AND status IN ('pending', 'queued', 'retrying')
        RETURNING *
        "#,
    )
    .bind(worker_id)
    .bind(now)
    .bind(now)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(task)
}

/// Work all due measure tasks once. Returns the number processed.
pub async fn run_measurement_pass(
    pool: &SqlitePool,
    registry: &AdapterRegistry,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<u32> {
    let mut processed = 0;

    while let Some(task) = claim_due_measure_task(pool, worker_id, now).await? {
        let task_id = task.id;
        match handle_measure_task(pool, registry, &task, now).await {
            Ok(()) => {
                tasks::complete(pool, task_id).await?;
                processed += 1;
            }
            Err(e @ (Error::InvalidInput(_) | Error::NotFound(_))) => {
                tasks::fail_permanent(pool, task_id, &e.to_string()).await?;
            }
            Err(e) => {
                // Transient: retry after the configured interval
                let retry_hours: i64 =
                    settings::get_setting(pool, "METRICS_COLLECTION_RETRY_HOURS").await?;
                warn!(task_id, error = %e, "Measurement failed, scheduling retry");
                tasks::fail(pool, task_id, &e.to_string(), Duration::hours(retry_hours)).await?;
            }
        }
    }

    Ok(processed)
}

async fn handle_measure_task(
    pool: &SqlitePool,
    registry: &AdapterRegistry,
    task: &Task,
    now: DateTime<Utc>,
) -> Result<()> {
    let publication_id = task
        .payload
        .publication_id
        .ok_or_else(|| Error::InvalidInput("measure task payload missing publication_id".into()))?;
    let round = task
        .payload
        .measurement_round
        .as_deref()
        .and_then(MeasurementRound::from_str)
        .ok_or_else(|| Error::InvalidInput("measure task payload missing measurement_round".into()))?;

    let row: Option<(String, String, Platform, Option<String>)> = sqlx::query_as(
        "SELECT content_id, account_id, platform, platform_post_id FROM publications WHERE id = ?",
    )
    .bind(publication_id)
    .fetch_optional(pool)
    .await?;
    let (content_id, account_id, platform, platform_post_id) =
        row.ok_or_else(|| Error::NotFound(format!("Publication not found: {publication_id}")))?;

    // A publication that never got a platform post id is measured
    // synthetically, seeded by its own identity
    let post_id = platform_post_id.unwrap_or_else(|| format!("publication-{publication_id}"));

    let metrics =
        collector::collect_metrics(pool, registry, &account_id, platform, &post_id).await?;

    collector::store_metrics(pool, publication_id, round.as_str(), &metrics, now).await?;
    let recorded = accuracy::record_actual(pool, publication_id, round, metrics.views, now).await?;
    if !recorded {
        // Already measured in this round (task re-delivery) — nothing else to do
        info!(publication_id, round = round.as_str(), "Round already recorded, skipping");
        return Ok(());
    }

    info!(
        publication_id,
        round = round.as_str(),
        views = metrics.views,
        synthetic = metrics.synthetic,
        "Measurement recorded"
    );

    match round {
        MeasurementRound::Hours48 => {
            schedule_followups(pool, publication_id, &content_id, &account_id, now).await?;
            enqueue_curation(pool, &content_id, publication_id, "micro_analysis").await?;
        }
        MeasurementRound::Days7 => {
            // The 7d actual is the headline measurement
            sqlx::query(
                "UPDATE content SET status = 'measured', updated_at = ? WHERE content_id = ? AND status = 'posted'",
            )
            .bind(now)
            .bind(&content_id)
            .execute(pool)
            .await?;
            enqueue_curation(pool, &content_id, publication_id, "cumulative_analysis").await?;
        }
        MeasurementRound::Days30 => {
            // Final round: the publication is fully measured
            sqlx::query("UPDATE publications SET status = 'measured' WHERE id = ?")
                .bind(publication_id)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}

/// Schedule the 7d/30d follow-up rounds after the first measurement, unless
/// a metrics row or a live task for that round already exists.
pub async fn schedule_followups(
    pool: &SqlitePool,
    publication_id: i64,
    content_id: &str,
    account_id: &str,
    _now: DateTime<Utc>,
) -> Result<Vec<&'static str>> {
    let followup_days: Vec<i64> = settings::get_setting_json(pool, "METRICS_FOLLOWUP_DAYS").await?;
    let mut scheduled = Vec::new();

    for days in followup_days {
        let round = if days <= 7 {
            MeasurementRound::Days7
        } else {
            MeasurementRound::Days30
        };

        let metrics_exist: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM metrics WHERE publication_id = ? AND measurement_point = ?",
        )
        .bind(publication_id)
        .bind(round.as_str())
        .fetch_one(pool)
        .await?;
        if metrics_exist > 0 {
            continue;
        }

        let task_exists: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM tasks
            WHERE task_type = 'measure'
              AND status IN ('pending', 'queued', 'retrying', 'processing')
              AND CAST(json_extract(payload, '$.publication_id') AS INTEGER) = ?
              AND json_extract(payload, '$.measurement_round') = ?
            "#,
        )
        .bind(publication_id)
        .bind(round.as_str())
        .fetch_one(pool)
        .await?;
        if task_exists > 0 {
            continue;
        }

        tasks::enqueue(
            pool,
            TaskType::Measure,
            &TaskPayload {
                content_id: Some(content_id.to_string()),
                account_id: Some(account_id.to_string()),
                publication_id: Some(publication_id),
                measurement_round: Some(round.as_str().to_string()),
                ..TaskPayload::default()
            },
            0,
        )
        .await?;
        scheduled.push(round.as_str());
    }

    Ok(scheduled)
}

async fn enqueue_curation(
    pool: &SqlitePool,
    content_id: &str,
    publication_id: i64,
    analysis_kind: &str,
) -> Result<()> {
    tasks::enqueue(
        pool,
        TaskType::Curate,
        &TaskPayload {
            content_id: Some(content_id.to_string()),
            publication_id: Some(publication_id),
            analysis_kind: Some(analysis_kind.to_string()),
            ..TaskPayload::default()
        },
        0,
    )
    .await?;
    Ok(())
}

/// Work curate tasks: fold the round's measured outcome into the content's
/// analysis record; fully measured content becomes `analyzed`.
pub async fn run_curation_pass(
    pool: &SqlitePool,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<u32> {
    let mut processed = 0;

    while let Some(task) = tasks::claim(pool, TaskType::Curate, worker_id).await? {
        let task_id = task.id;
        match handle_curate_task(pool, &task, now).await {
            Ok(()) => {
                tasks::complete(pool, task_id).await?;
                processed += 1;
            }
            Err(e @ (Error::InvalidInput(_) | Error::NotFound(_))) => {
                tasks::fail_permanent(pool, task_id, &e.to_string()).await?;
            }
            Err(e) => {
                let base_sec: i64 = settings::get_setting(pool, "TASK_RETRY_BASE_SEC").await?;
                tasks::fail(pool, task_id, &e.to_string(), Duration::seconds(base_sec)).await?;
            }
        }
    }

    Ok(processed)
}

async fn handle_curate_task(pool: &SqlitePool, task: &Task, now: DateTime<Utc>) -> Result<()> {
    let content_id = task
        .payload
        .content_id
        .clone()
        .ok_or_else(|| Error::InvalidInput("curate task payload missing content_id".into()))?;
    let publication_id = task
        .payload
        .publication_id
        .ok_or_else(|| Error::InvalidInput("curate task payload missing publication_id".into()))?;
    let kind = task.payload.analysis_kind.as_deref().unwrap_or("micro_analysis");

    let snapshot: Option<(f64, Option<f64>, Option<f64>)> = sqlx::query_as(
        "SELECT predicted_impressions, actual_impressions_48h, actual_impressions_7d
         FROM prediction_snapshots WHERE publication_id = ?",
    )
    .bind(publication_id)
    .fetch_optional(pool)
    .await?;
    let Some((predicted, actual_48h, actual_7d)) = snapshot else {
        return Err(Error::NotFound(format!(
            "No prediction snapshot for publication {publication_id}"
        )));
    };

    let analysis = serde_json::json!({
        "kind": kind,
        "publication_id": publication_id,
        "predicted_impressions": predicted,
        "actual_impressions_48h": actual_48h,
        "actual_impressions_7d": actual_7d,
        "analyzed_at": now.to_rfc3339(),
    });

    sqlx::query(
        r#"
        UPDATE content
        SET metadata = json_set(COALESCE(metadata, '{}'), '$.analysis', json(?)),
            status = CASE WHEN status = 'measured' THEN 'analyzed' ELSE status END,
            updated_at = ?
        WHERE content_id = ?
        "#,
    )
    .bind(analysis.to_string())
    .bind(now)
    .bind(&content_id)
    .execute(pool)
    .await?;

    info!(content_id = %content_id, kind, "Curation analysis recorded");
    Ok(())
}

/// The measurement loop: measure + curate passes at a fixed poll interval.
pub async fn run_forever(
    pool: &SqlitePool,
    registry: &AdapterRegistry,
    worker_id: &str,
) -> Result<()> {
    loop {
        let now = Utc::now();
        if let Err(e) = run_measurement_pass(pool, registry, worker_id, now).await {
            warn!(error = %e, "Measurement pass failed");
        }
        if let Err(e) = run_curation_pass(pool, worker_id, now).await {
            warn!(error = %e, "Curation pass failed");
        }

        let interval: u64 = settings::get_setting(pool, "MEASUREMENT_POLL_INTERVAL_SEC")
            .await
            .unwrap_or(300);
        tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
    }
}
