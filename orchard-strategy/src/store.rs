//! Cycle persistence
//!
//! The cycles table is the durable-resume record: current node + serialized
//! state, rewritten after every node execution. Approval decisions arrive as
//! rows in cycle_approvals written by the external dashboard; consuming one
//! stamps `consumed_at` so a decision applies exactly once.

use crate::cycle::{CycleNode, CycleState};
use chrono::{DateTime, Utc};
use orchard_common::db::models::{Cycle, CycleApproval, CycleStatus};
use orchard_common::{Error, Result};
use sqlx::SqlitePool;

/// Insert a fresh cycle row in `running` state.
pub async fn create_cycle(pool: &SqlitePool, thread_id: &str, node: &str) -> Result<Cycle> {
    let now = Utc::now();
    let cycle_number: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(cycle_number), 0) + 1 FROM cycles")
            .fetch_one(pool)
            .await?;

    sqlx::query(
        r#"
        INSERT INTO cycles (cycle_number, thread_id, status, current_node, state, started_at, updated_at)
        VALUES (?, ?, 'running', ?, '{}', ?, ?)
        "#,
    )
    .bind(cycle_number)
    .bind(thread_id)
    .bind(node)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    load_cycle(pool, thread_id).await
}

pub async fn load_cycle(pool: &SqlitePool, thread_id: &str) -> Result<Cycle> {
    sqlx::query_as::<_, Cycle>("SELECT * FROM cycles WHERE thread_id = ?")
        .bind(thread_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Cycle not found: {}", thread_id)))
}

/// Rewrite the durable-resume record. `completed_at` is stamped on terminal
/// statuses.
pub async fn save_progress(
    pool: &SqlitePool,
    thread_id: &str,
    current_node: &str,
    state: &CycleState,
    status: CycleStatus,
) -> Result<()> {
    let now = Utc::now();
    let state_json = serde_json::to_string(state)
        .map_err(|e| Error::Internal(format!("Cycle state serialize: {e}")))?;
    let completed_at = matches!(status, CycleStatus::Completed | CycleStatus::Cancelled)
        .then_some(now);

    sqlx::query(
        r#"
        UPDATE cycles
        SET current_node = ?, state = ?, status = ?, updated_at = ?,
            completed_at = COALESCE(?, completed_at)
        WHERE thread_id = ?
        "#,
    )
    .bind(current_node)
    .bind(state_json)
    .bind(status)
    .bind(now)
    .bind(completed_at)
    .bind(thread_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Whether any cycle started at or after the given instant.
pub async fn cycle_started_since(pool: &SqlitePool, since: DateTime<Utc>) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cycles WHERE started_at >= ?")
        .bind(since)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// All cycles durably paused at the human review gate.
pub async fn suspended_cycles(pool: &SqlitePool) -> Result<Vec<Cycle>> {
    let cycles =
        sqlx::query_as::<_, Cycle>("SELECT * FROM cycles WHERE status = 'suspended' ORDER BY id")
            .fetch_all(pool)
            .await?;
    Ok(cycles)
}

/// Consume the oldest unconsumed approval decision for a cycle, if any.
/// The consumption stamp makes each decision apply at most once, regardless
/// of which process picks it up.
pub async fn take_pending_approval(
    pool: &SqlitePool,
    thread_id: &str,
) -> Result<Option<CycleApproval>> {
    let approval = sqlx::query_as::<_, CycleApproval>(
        r#"
        UPDATE cycle_approvals SET consumed_at = ?
        WHERE id = (
            SELECT id FROM cycle_approvals
            WHERE thread_id = ? AND consumed_at IS NULL
            ORDER BY decided_at ASC
            LIMIT 1
        )
          AND consumed_at IS NULL
        RETURNING *
        "#,
    )
    .bind(Utc::now())
    .bind(thread_id)
    .fetch_optional(pool)
    .await?;

    Ok(approval)
}

/// Write an approval decision (what the dashboard does; used by tests and
/// operational tooling).
pub async fn write_approval(
    pool: &SqlitePool,
    thread_id: &str,
    status: orchard_common::db::models::ApprovalStatus,
    rejection_category: Option<orchard_common::db::models::RejectionCategory>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO cycle_approvals (thread_id, status, rejection_category, decided_at)
        VALUES (?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(thread_id)
    .bind(status)
    .bind(rejection_category)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Convenience for resuming: parse the recorded node.
pub fn parse_node(cycle: &Cycle) -> Result<CycleNode> {
    CycleNode::from_str(&cycle.current_node)
        .ok_or_else(|| Error::Internal(format!("Unknown cycle node: {}", cycle.current_node)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchard_common::db::models::ApprovalStatus;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        orchard_common::db::init::init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn cycle_numbers_increment() {
        let pool = setup_test_db().await;
        let a = create_cycle(&pool, "t-1", "collect_intel").await.unwrap();
        let b = create_cycle(&pool, "t-2", "collect_intel").await.unwrap();
        assert_eq!(a.cycle_number, 1);
        assert_eq!(b.cycle_number, 2);
    }

    #[tokio::test]
    async fn approval_is_consumed_exactly_once() {
        let pool = setup_test_db().await;
        create_cycle(&pool, "t-1", "human_review_gate").await.unwrap();
        write_approval(&pool, "t-1", ApprovalStatus::Approved, None).await.unwrap();

        let first = take_pending_approval(&pool, "t-1").await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().status, ApprovalStatus::Approved);

        let second = take_pending_approval(&pool, "t-1").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn save_progress_round_trips_state() {
        let pool = setup_test_db().await;
        create_cycle(&pool, "t-1", "collect_intel").await.unwrap();

        let mut state = CycleState::default();
        state.directive = Some("push cooking shorts".into());
        state.record_run(CycleNode::CollectIntel);

        save_progress(&pool, "t-1", "analyze_cycle", &state, CycleStatus::Running)
            .await
            .unwrap();

        let cycle = load_cycle(&pool, "t-1").await.unwrap();
        assert_eq!(cycle.current_node, "analyze_cycle");
        assert_eq!(parse_node(&cycle).unwrap(), CycleNode::AnalyzeCycle);

        let restored: CycleState = serde_json::from_value(cycle.state.0).unwrap();
        assert_eq!(restored.directive.as_deref(), Some("push cooking shorts"));
        assert_eq!(restored.runs(CycleNode::CollectIntel), 1);
    }
}
