//! Publish task handling
//!
//! Ready content is posted to its target account through the platform
//! adapter (at-least-once — the publication record is the idempotent side),
//! a prediction snapshot is created at publish time, and the first (48h)
//! measurement task is scheduled.

use chrono::{Duration, Utc};
use orchard_common::db::models::{
    Account, AccountStatus, Content, ContentStatus, Task, TaskPayload, TaskType,
};
use orchard_common::db::{settings, tasks};
use orchard_common::platform::AdapterRegistry;
use orchard_common::predict::engine;
use orchard_common::retry::{retry_with_backoff, RetryPolicy};
use orchard_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Claim and handle publish tasks until the queue is drained.
pub async fn drain_publish_tasks(
    pool: &SqlitePool,
    registry: &AdapterRegistry,
    worker_id: &str,
) -> Result<u32> {
    let mut handled = 0;

    while let Some(task) = tasks::claim(pool, TaskType::Publish, worker_id).await? {
        let task_id = task.id;
        match handle_publish_task(pool, registry, &task).await {
            Ok(publication_id) => {
                tasks::complete(pool, task_id).await?;
                handled += 1;
                info!(task_id, publication_id, "Publish task completed");
            }
            Err(e @ (Error::InvalidInput(_) | Error::Unsupported(_) | Error::NotFound(_))) => {
                tasks::fail_permanent(pool, task_id, &e.to_string()).await?;
            }
            Err(e) => {
                let base_sec: i64 = settings::get_setting(pool, "TASK_RETRY_BASE_SEC").await?;
                warn!(task_id, error = %e, "Publish task failed");
                tasks::fail(pool, task_id, &e.to_string(), Duration::seconds(base_sec)).await?;
            }
        }
    }

    Ok(handled)
}

/// Publish one content item to one account. Returns the publication id.
pub async fn handle_publish_task(
    pool: &SqlitePool,
    registry: &AdapterRegistry,
    task: &Task,
) -> Result<i64> {
    let content_id = task
        .payload
        .content_id
        .clone()
        .ok_or_else(|| Error::InvalidInput("publish task payload missing content_id".into()))?;
    let account_id = task
        .payload
        .account_id
        .clone()
        .ok_or_else(|| Error::InvalidInput("publish task payload missing account_id".into()))?;

    let content = sqlx::query_as::<_, Content>("SELECT * FROM content WHERE content_id = ?")
        .bind(&content_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Content not found: {}", content_id)))?;

    if content.status != ContentStatus::Ready {
        return Err(Error::InvalidInput(format!(
            "Content {} is not ready for publishing",
            content_id
        )));
    }

    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE account_id = ?")
        .bind(&account_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Account not found: {}", account_id)))?;

    if account.status != AccountStatus::Active {
        // Suspension may lift later; let the retry budget decide
        return Err(Error::Unauthorized(format!(
            "Account {} is suspended",
            account_id
        )));
    }

    let adapter = registry.get(account.platform)?;
    let result = retry_with_backoff("publish", &RetryPolicy::default(), || {
        adapter.publish(&account, &content)
    })
    .await?;

    let posted_at = Utc::now();
    let delay_hours = settings::metrics_collection_delay_hours(pool).await?;
    let measure_after = posted_at + Duration::hours(delay_hours);

    let publication_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO publications
            (content_id, account_id, platform, status, posted_at, platform_post_id,
             post_url, measure_after, created_at)
        VALUES (?, ?, ?, 'posted', ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&content_id)
    .bind(&account_id)
    .bind(account.platform)
    .bind(posted_at)
    .bind(&result.platform_post_id)
    .bind(&result.post_url)
    .bind(measure_after)
    .bind(posted_at)
    .fetch_one(pool)
    .await?;

    sqlx::query("UPDATE content SET status = 'posted', updated_at = ? WHERE content_id = ?")
        .bind(posted_at)
        .bind(&content_id)
        .execute(pool)
        .await?;

    // Prediction snapshot is created at publish time, before measurement
    let prediction = engine::predict(pool, publication_id).await?;
    info!(
        publication_id,
        content_id = %content_id,
        predicted = prediction.predicted_impressions,
        baseline_source = ?prediction.baseline_source,
        cold_start = prediction.adjustments.cold_start,
        "Prediction snapshot created"
    );

    // First measurement round
    tasks::enqueue(
        pool,
        TaskType::Measure,
        &TaskPayload {
            content_id: Some(content_id),
            account_id: Some(account_id),
            publication_id: Some(publication_id),
            measurement_round: Some("48h".to_string()),
            ..TaskPayload::default()
        },
        0,
    )
    .await?;

    Ok(publication_id)
}
