//! Cycle node implementations
//!
//! Every node works from store data: intel and analysis aggregate what the
//! measurement side has written, planning creates content rows, reflection
//! hands approved plans to the production pipeline through the task queue.

use crate::cycle::{ContentPlan, CycleState, Decision};
use chrono::{Duration, Utc};
use orchard_common::db::models::{
    Account, ApprovalStatus, RejectionCategory, TaskPayload, TaskType,
};
use orchard_common::db::tasks;
use orchard_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Market/account intelligence gathered at cycle start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelSummary {
    pub active_accounts: i64,
    pub publications_last_7d: i64,
    pub measured_publications: i64,
}

/// Prior-cycle outcome analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Mean 7d prediction error over the last 30 days, when any exists
    pub avg_prediction_error_7d: Option<f64>,
    /// Niche with the best average measured views
    pub top_niche: Option<String>,
    pub cold_start_predictions: i64,
}

/// collect_intel: counts of what the system currently operates on.
pub async fn collect_intel(pool: &SqlitePool) -> Result<IntelSummary> {
    let now = Utc::now();

    let active_accounts: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE status = 'active'")
            .fetch_one(pool)
            .await?;

    let publications_last_7d: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM publications WHERE posted_at >= ?")
            .bind(now - Duration::days(7))
            .fetch_one(pool)
            .await?;

    let measured_publications: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM publications WHERE status = 'measured'")
            .fetch_one(pool)
            .await?;

    Ok(IntelSummary {
        active_accounts,
        publications_last_7d,
        measured_publications,
    })
}

/// analyze_cycle: how well predictions tracked reality recently.
pub async fn analyze_cycle(pool: &SqlitePool) -> Result<AnalysisSummary> {
    let now = Utc::now();

    let avg_prediction_error_7d: Option<f64> = sqlx::query_scalar(
        r#"
        SELECT AVG(prediction_error_7d) FROM prediction_snapshots
        WHERE prediction_error_7d IS NOT NULL AND created_at >= ?
        "#,
    )
    .bind(now - Duration::days(30))
    .fetch_one(pool)
    .await?;

    let top_niche: Option<String> = sqlx::query_scalar(
        r#"
        SELECT a.niche
        FROM publications p
        JOIN accounts a ON p.account_id = a.account_id
        JOIN metrics m ON p.id = m.publication_id
        WHERE m.measurement_point = '7d' AND a.niche IS NOT NULL
        GROUP BY a.niche
        ORDER BY AVG(m.views) DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    let cold_start_predictions: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM prediction_snapshots
        WHERE json_extract(adjustments_applied, '$.cold_start') = 'true'
          AND created_at >= ?
        "#,
    )
    .bind(now - Duration::days(30))
    .fetch_one(pool)
    .await?;

    Ok(AnalysisSummary {
        avg_prediction_error_7d,
        top_niche,
        cold_start_predictions,
    })
}

/// set_strategy: a directive derived from the analysis.
pub fn set_strategy(state: &CycleState) -> String {
    let analysis = state.analysis.as_ref();

    match analysis.and_then(|a| a.top_niche.clone()) {
        Some(niche) => format!("Concentrate production on the '{niche}' niche"),
        None => "Explore: no measured niche signal yet, spread across accounts".to_string(),
    }
}

/// plan_content: one planned content row per active account. Re-entry after
/// a plan_revision rejection cancels this cycle's previous drafts first.
pub async fn plan_content(
    pool: &SqlitePool,
    thread_id: &str,
    state: &CycleState,
) -> Result<Vec<ContentPlan>> {
    let now = Utc::now();

    // Drop drafts from an earlier pass of this same cycle
    sqlx::query(
        r#"
        UPDATE content SET status = 'cancelled', updated_at = ?
        WHERE status IN ('planned', 'pending_approval')
          AND json_extract(metadata, '$.cycle_thread_id') = ?
        "#,
    )
    .bind(now)
    .bind(thread_id)
    .execute(pool)
    .await?;

    let accounts =
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE status = 'active' ORDER BY account_id")
            .fetch_all(pool)
            .await?;

    let target_niche = state.analysis.as_ref().and_then(|a| a.top_niche.clone());
    let mut plans = Vec::new();

    for account in &accounts {
        let content_id = uuid::Uuid::new_v4().to_string();
        let niche = account.niche.clone().or_else(|| target_niche.clone());
        // Short-form video is the default product; accounts keep their niche
        let format = "short_video";
        let metadata = serde_json::json!({ "cycle_thread_id": thread_id });

        sqlx::query(
            r#"
            INSERT INTO content
                (content_id, content_format, status, niche, hook_type, metadata, created_at, updated_at)
            VALUES (?, ?, 'planned', ?, 'question', ?, ?, ?)
            "#,
        )
        .bind(&content_id)
        .bind(format)
        .bind(&niche)
        .bind(metadata.to_string())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        plans.push(ContentPlan {
            content_id,
            account_id: account.account_id.clone(),
            content_format: format.to_string(),
            niche,
        });
    }

    info!(thread_id, plans = plans.len(), "Content planned");
    Ok(plans)
}

/// select_tools: attach the default active recipe to planned short videos.
pub async fn select_tools(pool: &SqlitePool, state: &CycleState) -> Result<()> {
    let recipe_id: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM production_recipes WHERE is_active = 1 ORDER BY times_used DESC, id ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    let Some(recipe_id) = recipe_id else {
        warn!("No active production recipe; planned videos will fail validation at dispatch");
        return Ok(());
    };

    for plan in &state.content_plans {
        if plan.content_format == "short_video" {
            sqlx::query("UPDATE content SET recipe_id = ?, updated_at = ? WHERE content_id = ?")
                .bind(recipe_id)
                .bind(Utc::now())
                .bind(&plan.content_id)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}

/// approve_plan: the automatic gate. An empty plan is rejected once as
/// data-insufficient (sending the cycle back to intel collection); a repeat
/// empty outcome is approved so an empty store cannot spin the cycle forever.
pub fn approve_plan(state: &CycleState) -> Decision {
    if state.content_plans.is_empty() && state.approval_attempts == 0 {
        return Decision {
            status: ApprovalStatus::Rejected,
            rejection_category: Some(RejectionCategory::DataInsufficient),
        };
    }

    Decision {
        status: ApprovalStatus::Approved,
        rejection_category: None,
    }
}

/// Expose this cycle's plans for dashboard review before suspension.
pub async fn mark_plans_pending_approval(pool: &SqlitePool, state: &CycleState) -> Result<()> {
    let now = Utc::now();
    for plan in &state.content_plans {
        sqlx::query(
            "UPDATE content SET status = 'pending_approval', updated_at = ? WHERE content_id = ? AND status = 'planned'",
        )
        .bind(now)
        .bind(&plan.content_id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// reflect_all: close out the cycle and hand approved plans to production.
pub async fn reflect_all(pool: &SqlitePool, thread_id: &str, state: &CycleState) -> Result<()> {
    let now = Utc::now();
    let mut queued = 0;

    for plan in &state.content_plans {
        // Plans cancelled/rejected after review are left behind
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM content WHERE content_id = ?")
                .bind(&plan.content_id)
                .fetch_optional(pool)
                .await?;
        if !matches!(status.as_deref(), Some("planned") | Some("pending_approval")) {
            continue;
        }

        sqlx::query("UPDATE content SET status = 'planned', updated_at = ? WHERE content_id = ?")
            .bind(now)
            .bind(&plan.content_id)
            .execute(pool)
            .await?;

        tasks::enqueue(
            pool,
            TaskType::Produce,
            &TaskPayload {
                content_id: Some(plan.content_id.clone()),
                account_id: Some(plan.account_id.clone()),
                ..TaskPayload::default()
            },
            0,
        )
        .await?;
        queued += 1;
    }

    info!(
        thread_id,
        queued,
        avg_error = ?state.analysis.as_ref().and_then(|a| a.avg_prediction_error_7d),
        "Cycle reflection: plans handed to production"
    );
    Ok(())
}
