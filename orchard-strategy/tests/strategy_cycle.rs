//! Strategy cycle scenarios: rejection routing, durable suspend/resume.

use chrono::Utc;
use orchard_common::db::init::init_schema;
use orchard_common::db::models::{ApprovalStatus, CycleStatus, RejectionCategory};
use orchard_strategy::cycle::{
    resume_cycle, start_cycle, CycleNode, CycleOutcome, CycleState, Decision,
};
use orchard_strategy::store;
use sqlx::SqlitePool;

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    init_schema(&pool).await.unwrap();
    pool
}

async fn set_human_review(pool: &SqlitePool, enabled: bool) {
    sqlx::query("UPDATE settings SET value = ? WHERE key = 'HUMAN_REVIEW_ENABLED'")
        .bind(if enabled { "true" } else { "false" })
        .execute(pool)
        .await
        .unwrap();
}

async fn insert_account(pool: &SqlitePool, id: &str) {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO accounts (account_id, platform, niche, status, created_at, updated_at)
         VALUES (?, 'tiktok', 'cooking', 'active', ?, ?)",
    )
    .bind(id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_recipe(pool: &SqlitePool) {
    sqlx::query(
        r#"INSERT INTO production_recipes (recipe_name, steps, is_active, created_at)
           VALUES ('standard', '[{"step_name":"video_gen"}]', 1, ?)"#,
    )
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
}

async fn load_state(pool: &SqlitePool, thread_id: &str) -> CycleState {
    let cycle = store::load_cycle(pool, thread_id).await.unwrap();
    serde_json::from_value(cycle.state.0).unwrap()
}

#[tokio::test]
async fn cycle_completes_without_human_review() {
    let pool = setup_pool().await;
    set_human_review(&pool, false).await;
    insert_account(&pool, "acct-1").await;
    insert_account(&pool, "acct-2").await;
    insert_recipe(&pool).await;

    let (thread_id, outcome) = start_cycle(&pool).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed);

    let cycle = store::load_cycle(&pool, &thread_id).await.unwrap();
    assert_eq!(cycle.status, CycleStatus::Completed);
    assert_eq!(cycle.current_node, "reflect_all");

    // One plan per active account, handed to production
    let state = load_state(&pool, &thread_id).await;
    assert_eq!(state.content_plans.len(), 2);

    let produce_tasks: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tasks WHERE task_type = 'produce' AND status = 'pending'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(produce_tasks, 2);

    // Recipes were attached during select_tools
    let with_recipe: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM content WHERE recipe_id IS NOT NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(with_recipe, 2);
}

#[tokio::test]
async fn empty_plan_routes_back_to_collect_intel_not_plan_content() {
    let pool = setup_pool().await;
    set_human_review(&pool, false).await;
    // No accounts at all: plan_content produces nothing

    let (thread_id, outcome) = start_cycle(&pool).await.unwrap();
    // The bounded auto-gate lets the second pass through, so the cycle ends
    assert_eq!(outcome, CycleOutcome::Completed);

    let state = load_state(&pool, &thread_id).await;
    // Rejection category data_insufficient re-ran the whole intel chain
    assert_eq!(state.runs(CycleNode::CollectIntel), 2);
    assert_eq!(state.runs(CycleNode::AnalyzeCycle), 2);
    // plan_content was NOT the re-entry point (that would be plan_revision)
    assert_eq!(state.runs(CycleNode::PlanContent), 2);
    assert_eq!(state.runs(CycleNode::ApprovePlan), 2);
}

#[tokio::test]
async fn human_gate_suspends_and_resume_continues_from_gate() {
    let pool = setup_pool().await;
    set_human_review(&pool, true).await;
    insert_account(&pool, "acct-1").await;
    insert_recipe(&pool).await;

    let (thread_id, outcome) = start_cycle(&pool).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Suspended);

    let cycle = store::load_cycle(&pool, &thread_id).await.unwrap();
    assert_eq!(cycle.status, CycleStatus::Suspended);
    assert_eq!(cycle.current_node, "human_review_gate");

    // Plans were exposed for review
    let pending: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM content WHERE status = 'pending_approval'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(pending, 1);

    // Nothing queued for production while suspended
    let produce_tasks: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE task_type = 'produce'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(produce_tasks, 0);

    // External approval arrives; resume completes the cycle
    let outcome = resume_cycle(
        &pool,
        &thread_id,
        Decision {
            status: ApprovalStatus::Approved,
            rejection_category: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome, CycleOutcome::Completed);

    // Resumed from the gate: pre-gate nodes ran exactly once
    let state = load_state(&pool, &thread_id).await;
    assert_eq!(state.runs(CycleNode::CollectIntel), 1);
    assert_eq!(state.runs(CycleNode::PlanContent), 1);
    assert_eq!(state.runs(CycleNode::ApprovePlan), 1);
    // The gate itself ran twice: suspend entry + resumed decision
    assert_eq!(state.runs(CycleNode::HumanReviewGate), 2);

    let produce_tasks: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE task_type = 'produce'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(produce_tasks, 1);
}

#[tokio::test]
async fn human_rejection_with_plan_revision_replans_and_resuspends() {
    let pool = setup_pool().await;
    set_human_review(&pool, true).await;
    insert_account(&pool, "acct-1").await;
    insert_recipe(&pool).await;

    let (thread_id, _) = start_cycle(&pool).await.unwrap();
    let first_state = load_state(&pool, &thread_id).await;
    let first_plan = first_state.content_plans[0].content_id.clone();

    // Human rejects with plan_revision: back to plan_content, then the gate
    // suspends again with a fresh plan
    let outcome = resume_cycle(
        &pool,
        &thread_id,
        Decision {
            status: ApprovalStatus::Rejected,
            rejection_category: Some(RejectionCategory::PlanRevision),
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome, CycleOutcome::Suspended);

    let state = load_state(&pool, &thread_id).await;
    // plan_content re-ran; collect_intel did not
    assert_eq!(state.runs(CycleNode::PlanContent), 2);
    assert_eq!(state.runs(CycleNode::CollectIntel), 1);

    // The earlier draft was cancelled and replaced
    let first_status: String =
        sqlx::query_scalar("SELECT status FROM content WHERE content_id = ?")
            .bind(&first_plan)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(first_status, "cancelled");
    assert_ne!(state.content_plans[0].content_id, first_plan);
}

#[tokio::test]
async fn tick_consumes_dashboard_decision() {
    let pool = setup_pool().await;
    set_human_review(&pool, true).await;
    insert_account(&pool, "acct-1").await;
    insert_recipe(&pool).await;

    let (thread_id, outcome) = start_cycle(&pool).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Suspended);

    // Dashboard writes the decision row; the worker tick picks it up
    store::write_approval(&pool, &thread_id, ApprovalStatus::Approved, None)
        .await
        .unwrap();
    orchard_strategy::cycle::tick(&pool).await.unwrap();

    let cycle = store::load_cycle(&pool, &thread_id).await.unwrap();
    assert_eq!(cycle.status, CycleStatus::Completed);

    // Decision applied exactly once
    let unconsumed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM cycle_approvals WHERE thread_id = ? AND consumed_at IS NULL",
    )
    .bind(&thread_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(unconsumed, 0);
}
