//! Scheduler firing/dedup scenarios against an in-memory store.

use chrono::{TimeZone, Utc};
use orchard_batch::jobs::JobKind;
use orchard_batch::scheduler::{tick, JobOutcome};
use sqlx::SqlitePool;

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    orchard_common::db::init::init_schema(&pool).await.unwrap();
    pool
}

fn outcome_for(outcomes: &[(JobKind, JobOutcome)], job: JobKind) -> &JobOutcome {
    &outcomes.iter().find(|(j, _)| *j == job).unwrap().1
}

#[tokio::test]
async fn same_hour_tick_fires_job_at_most_once() {
    let pool = setup_pool().await;

    // BASELINE_UPDATE_UTC_HOUR defaults to 1
    let now = Utc.with_ymd_and_hms(2026, 8, 3, 1, 0, 0).unwrap();
    let first = tick(&pool, now).await.unwrap();
    assert_eq!(
        outcome_for(&first, JobKind::BaselineUpdate),
        &JobOutcome::Executed { success: true }
    );

    // A second tick in the same hour — slow tick, restart, or a second
    // scheduler instance — must not fire again
    let later = Utc.with_ymd_and_hms(2026, 8, 3, 1, 37, 0).unwrap();
    let second = tick(&pool, later).await.unwrap();
    assert_eq!(
        outcome_for(&second, JobKind::BaselineUpdate),
        &JobOutcome::AlreadyClaimed
    );

    let executions: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM batch_executions WHERE job_name = 'baseline-update'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(executions, 1);

    // Next day's hour fires again
    let tomorrow = Utc.with_ymd_and_hms(2026, 8, 4, 1, 0, 0).unwrap();
    let third = tick(&pool, tomorrow).await.unwrap();
    assert_eq!(
        outcome_for(&third, JobKind::BaselineUpdate),
        &JobOutcome::Executed { success: true }
    );
}

#[tokio::test]
async fn jobs_not_due_do_not_fire() {
    let pool = setup_pool().await;

    // Hour 5: nothing scheduled (baseline=1, adjustment=2, weight=3, kpi=4,
    // embedding every 6h fires at 0/6/12/18)
    let now = Utc.with_ymd_and_hms(2026, 8, 3, 5, 0, 0).unwrap();
    let outcomes = tick(&pool, now).await.unwrap();
    for (job, outcome) in &outcomes {
        assert_eq!(outcome, &JobOutcome::NotDue, "{} should not fire", job.name());
    }

    let executions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batch_executions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(executions, 0);
}

#[tokio::test]
async fn tier_one_store_runs_tiered_jobs_only_on_monday() {
    let pool = setup_pool().await;

    // Empty store → tier 1. 2026-08-03 is a Monday.
    let monday = Utc.with_ymd_and_hms(2026, 8, 3, 2, 0, 0).unwrap();
    let outcomes = tick(&pool, monday).await.unwrap();
    assert_eq!(
        outcome_for(&outcomes, JobKind::AdjustmentCache),
        &JobOutcome::Executed { success: true }
    );

    // Tuesday same hour: not due at tier 1
    let tuesday = Utc.with_ymd_and_hms(2026, 8, 4, 2, 0, 0).unwrap();
    let outcomes = tick(&pool, tuesday).await.unwrap();
    assert_eq!(
        outcome_for(&outcomes, JobKind::AdjustmentCache),
        &JobOutcome::NotDue
    );
}

#[tokio::test]
async fn kpi_fires_only_on_first_of_month_for_previous_month() {
    let pool = setup_pool().await;

    // KPI_SNAPSHOT_UTC_HOUR defaults to 4
    let mid_month = Utc.with_ymd_and_hms(2026, 8, 15, 4, 0, 0).unwrap();
    let outcomes = tick(&pool, mid_month).await.unwrap();
    assert_eq!(outcome_for(&outcomes, JobKind::KpiSnapshot), &JobOutcome::NotDue);

    let first = Utc.with_ymd_and_hms(2026, 8, 1, 4, 0, 0).unwrap();
    let outcomes = tick(&pool, first).await.unwrap();
    assert_eq!(
        outcome_for(&outcomes, JobKind::KpiSnapshot),
        &JobOutcome::Executed { success: true }
    );
}

#[tokio::test]
async fn failing_job_is_recorded_and_does_not_poison_the_tick() {
    let pool = setup_pool().await;

    // Break the KPI job's configuration: a missing setting is an error inside
    // the job body, which the wrapper must contain
    sqlx::query("DELETE FROM settings WHERE key = 'KPI_CALC_MONTH_START_DAY'")
        .execute(&pool)
        .await
        .unwrap();

    let first = Utc.with_ymd_and_hms(2026, 8, 1, 4, 0, 0).unwrap();
    let outcomes = tick(&pool, first).await.unwrap();
    assert_eq!(
        outcome_for(&outcomes, JobKind::KpiSnapshot),
        &JobOutcome::Executed { success: false }
    );

    // The failure is a record, not a crash
    let (success, error): (bool, Option<String>) = sqlx::query_as(
        "SELECT success, error FROM batch_executions WHERE job_name = 'kpi-snapshot'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(!success);
    assert!(error.unwrap().contains("KPI_CALC_MONTH_START_DAY"));

    // And the scheduler keeps going: next day, other jobs still fire
    let next = Utc.with_ymd_and_hms(2026, 8, 2, 1, 0, 0).unwrap();
    let outcomes = tick(&pool, next).await.unwrap();
    assert_eq!(
        outcome_for(&outcomes, JobKind::BaselineUpdate),
        &JobOutcome::Executed { success: true }
    );
}
