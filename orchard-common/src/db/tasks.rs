//! Durable task queue
//!
//! Work items persist across restarts and are the only coordination channel
//! between worker processes. Claiming is a single atomic read-modify-write
//! statement: of all concurrent claimants for the same task, exactly one
//! receives it and the rest observe no eligible task. Failed tasks are never
//! deleted — they remain queryable for operator inspection.

use crate::db::models::{Task, TaskPayload, TaskStatus, TaskType};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

/// Statuses a claim may pick up.
const CLAIMABLE: &str = "'pending', 'queued', 'retrying'";

/// Insert a new pending task.
pub async fn enqueue(
    pool: &SqlitePool,
    task_type: TaskType,
    payload: &TaskPayload,
    priority: i64,
) -> Result<i64> {
    enqueue_with_retries(pool, task_type, payload, priority, 3).await
}

/// Insert a new pending task with an explicit retry budget.
pub async fn enqueue_with_retries(
    pool: &SqlitePool,
    task_type: TaskType,
    payload: &TaskPayload,
    priority: i64,
    max_retries: i64,
) -> Result<i64> {
    let payload_json = serde_json::to_string(payload)
        .map_err(|e| Error::Internal(format!("Failed to serialize task payload: {}", e)))?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO tasks (task_type, payload, status, priority, max_retries, created_at)
        VALUES (?, ?, 'pending', ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(task_type)
    .bind(payload_json)
    .bind(priority)
    .bind(max_retries)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    tracing::debug!(task_id = id, task_type = task_type.as_str(), "Task enqueued");
    Ok(id)
}

/// Atomically claim the next eligible task of a given type.
///
/// Eligible: status pending/queued/retrying, with any retry backoff elapsed.
/// Ordered by priority (higher first) then age (older first). The whole
/// select-and-mark runs as one UPDATE statement, so at most one worker wins;
/// losers get `None` — there is no lock to busy-wait on.
pub async fn claim(
    pool: &SqlitePool,
    task_type: TaskType,
    worker_id: &str,
) -> Result<Option<Task>> {
    let now = Utc::now();

    let task = sqlx::query_as::<_, Task>(&format!(
        r#"
        UPDATE tasks
        SET status = 'processing', assigned_worker = ?, started_at = ?
        WHERE id = (
            SELECT id FROM tasks
            WHERE task_type = ?
              AND status IN ({CLAIMABLE})
              AND (retry_after IS NULL OR retry_after <= ?)
            ORDER BY priority DESC, created_at ASC
            LIMIT 1
        )
          AND status IN ({CLAIMABLE})
        RETURNING *
        "#
    ))
    .bind(worker_id)
    .bind(now)
    .bind(task_type)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    if let Some(ref t) = task {
        tracing::info!(
            task_id = t.id,
            task_type = task_type.as_str(),
            worker = worker_id,
            "Task claimed"
        );
    }

    Ok(task)
}

/// Mark a claimed task completed.
pub async fn complete(pool: &SqlitePool, task_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE tasks SET status = 'completed', completed_at = ?
        WHERE id = ? AND status NOT IN ('completed', 'failed_permanent')
        "#,
    )
    .bind(Utc::now())
    .bind(task_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a task failure.
///
/// Increments `retry_count` and re-queues as `retrying` with an exponential
/// backoff gate, or transitions to `failed_permanent` once the retry budget
/// is exhausted. Terminal tasks are left untouched. Returns the new status.
pub async fn fail(
    pool: &SqlitePool,
    task_id: i64,
    error_message: &str,
    base_backoff: Duration,
) -> Result<TaskStatus> {
    let now = Utc::now();

    // Read the current retry count to size the backoff; the status decision
    // itself happens inside the guarded UPDATE against current values.
    let row: Option<(i64, i64, TaskStatus)> =
        sqlx::query_as("SELECT retry_count, max_retries, status FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(pool)
            .await?;

    let (retry_count, _max_retries, status) =
        row.ok_or_else(|| Error::NotFound(format!("Task not found: {}", task_id)))?;

    if status.is_terminal() {
        return Ok(status);
    }

    let backoff = exponential_backoff(base_backoff, retry_count);
    let retry_after = now + backoff;

    let updated: Option<TaskStatus> = sqlx::query_scalar(
        r#"
        UPDATE tasks SET
            status = CASE WHEN retry_count + 1 > max_retries
                          THEN 'failed_permanent' ELSE 'retrying' END,
            retry_count = MIN(retry_count + 1, max_retries),
            error_message = ?,
            last_error_at = ?,
            assigned_worker = NULL,
            started_at = NULL,
            retry_after = CASE WHEN retry_count + 1 > max_retries THEN NULL ELSE ? END,
            completed_at = CASE WHEN retry_count + 1 > max_retries THEN ? ELSE NULL END
        WHERE id = ? AND status NOT IN ('completed', 'failed_permanent')
        RETURNING status
        "#,
    )
    .bind(error_message)
    .bind(now)
    .bind(retry_after)
    .bind(now)
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    let new_status = match updated {
        Some(status) => status,
        // Lost a race against a terminal transition; report what stands
        None => return Ok(get(pool, task_id).await?.status),
    };

    match new_status {
        TaskStatus::FailedPermanent => tracing::error!(
            task_id,
            error = error_message,
            "Task failed permanently, retry budget exhausted"
        ),
        _ => tracing::warn!(
            task_id,
            error = error_message,
            retry_after = %retry_after,
            "Task failed, re-queued for retry"
        ),
    }

    Ok(new_status)
}

/// Immediately mark a task failed-permanent (validation-class failures that
/// must never be retried).
pub async fn fail_permanent(pool: &SqlitePool, task_id: i64, error_message: &str) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        UPDATE tasks SET status = 'failed_permanent', error_message = ?,
                         last_error_at = ?, completed_at = ?
        WHERE id = ? AND status NOT IN ('completed', 'failed_permanent')
        "#,
    )
    .bind(error_message)
    .bind(now)
    .bind(now)
    .bind(task_id)
    .execute(pool)
    .await?;

    tracing::error!(task_id, error = error_message, "Task failed permanently");
    Ok(())
}

/// Count tasks of a type currently being processed.
pub async fn count_processing(pool: &SqlitePool, task_type: TaskType) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tasks WHERE task_type = ? AND status = 'processing'",
    )
    .bind(task_type)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Load a task by id.
pub async fn get(pool: &SqlitePool, task_id: i64) -> Result<Task> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Task not found: {}", task_id)))
}

fn exponential_backoff(base: Duration, retry_count: i64) -> Duration {
    let factor = 2_i64.saturating_pow(retry_count.clamp(0, 16) as u32);
    base.checked_mul(factor as i32).unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn enqueue_and_claim_roundtrip() {
        let pool = setup_test_db().await;

        let payload = TaskPayload::for_content("content-1");
        let id = enqueue(&pool, TaskType::Produce, &payload, 0).await.unwrap();

        let task = claim(&pool, TaskType::Produce, "worker-a").await.unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.assigned_worker.as_deref(), Some("worker-a"));
        assert_eq!(task.payload.content_id.as_deref(), Some("content-1"));
        assert!(task.started_at.is_some());

        // Nothing left to claim
        assert!(claim(&pool, TaskType::Produce, "worker-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_respects_priority_then_age() {
        let pool = setup_test_db().await;

        let low = enqueue(&pool, TaskType::Produce, &TaskPayload::default(), 0).await.unwrap();
        let high = enqueue(&pool, TaskType::Produce, &TaskPayload::default(), 5).await.unwrap();

        let first = claim(&pool, TaskType::Produce, "w").await.unwrap().unwrap();
        assert_eq!(first.id, high);
        let second = claim(&pool, TaskType::Produce, "w").await.unwrap().unwrap();
        assert_eq!(second.id, low);
    }

    #[tokio::test]
    async fn claim_is_scoped_to_task_type() {
        let pool = setup_test_db().await;

        enqueue(&pool, TaskType::Measure, &TaskPayload::default(), 0).await.unwrap();
        assert!(claim(&pool, TaskType::Produce, "w").await.unwrap().is_none());
        assert!(claim(&pool, TaskType::Measure, "w").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        // File-backed database so all connections in the pool see one store
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init::init_database(&dir.path().join("test.db")).await.unwrap();

        enqueue(&pool, TaskType::Produce, &TaskPayload::default(), 0).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                claim(&pool, TaskType::Produce, &format!("worker-{i}")).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one concurrent claim must succeed");
    }

    #[tokio::test]
    async fn fail_requeues_then_goes_permanent() {
        let pool = setup_test_db().await;

        let id = enqueue_with_retries(&pool, TaskType::Produce, &TaskPayload::default(), 0, 2)
            .await
            .unwrap();

        // First two failures re-queue
        for expected_count in 1..=2 {
            claim_ignoring_backoff(&pool, id).await;
            let status = fail(&pool, id, "boom", Duration::milliseconds(1)).await.unwrap();
            assert_eq!(status, TaskStatus::Retrying);
            let task = get(&pool, id).await.unwrap();
            assert_eq!(task.retry_count, expected_count);
            assert!(task.retry_count <= task.max_retries);
            assert_eq!(task.error_message.as_deref(), Some("boom"));
            assert!(task.last_error_at.is_some());
        }

        // Third failure exceeds the budget
        claim_ignoring_backoff(&pool, id).await;
        let status = fail(&pool, id, "boom again", Duration::milliseconds(1)).await.unwrap();
        assert_eq!(status, TaskStatus::FailedPermanent);

        let task = get(&pool, id).await.unwrap();
        assert!(task.retry_count <= task.max_retries);

        // Terminal: further failures change nothing
        let status = fail(&pool, id, "late failure", Duration::milliseconds(1)).await.unwrap();
        assert_eq!(status, TaskStatus::FailedPermanent);

        // And the task is still there for inspection
        assert_eq!(get(&pool, id).await.unwrap().status, TaskStatus::FailedPermanent);
    }

    #[tokio::test]
    async fn completed_tasks_never_transition() {
        let pool = setup_test_db().await;

        let id = enqueue(&pool, TaskType::Publish, &TaskPayload::default(), 0).await.unwrap();
        claim(&pool, TaskType::Publish, "w").await.unwrap().unwrap();
        complete(&pool, id).await.unwrap();

        let status = fail(&pool, id, "too late", Duration::seconds(1)).await.unwrap();
        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(get(&pool, id).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn retrying_task_waits_for_backoff() {
        let pool = setup_test_db().await;

        let id = enqueue(&pool, TaskType::Measure, &TaskPayload::default(), 0).await.unwrap();
        claim(&pool, TaskType::Measure, "w").await.unwrap().unwrap();
        fail(&pool, id, "transient", Duration::hours(6)).await.unwrap();

        // Backoff gate is hours away — not claimable now
        assert!(claim(&pool, TaskType::Measure, "w").await.unwrap().is_none());

        // Clear the gate and it becomes claimable again
        sqlx::query("UPDATE tasks SET retry_after = ? WHERE id = ?")
            .bind(Utc::now() - Duration::seconds(1))
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();
        let task = claim(&pool, TaskType::Measure, "w").await.unwrap().unwrap();
        assert_eq!(task.id, id);
    }

    /// Re-claim a task regardless of its backoff gate (test helper).
    async fn claim_ignoring_backoff(pool: &SqlitePool, id: i64) {
        sqlx::query("UPDATE tasks SET retry_after = NULL WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .unwrap();
        let task_type: TaskType = sqlx::query_scalar("SELECT task_type FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap();
        claim(pool, task_type, "test-worker").await.unwrap().unwrap();
    }
}
