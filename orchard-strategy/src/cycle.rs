//! Strategy cycle state machine
//!
//! Linear: collect_intel → analyze_cycle → set_strategy → plan_content →
//! select_tools → approve_plan, then category-routed rejection re-entry or
//! the human review gate. The gate is a durable interrupt: the cycle row is
//! suspended and a later, independent resume call injects the decision and
//! continues from the recorded node. Prior nodes are never re-run.

use crate::nodes;
use crate::router;
use crate::store;
use chrono::Utc;
use orchard_common::db::models::{ApprovalStatus, Cycle, CycleStatus, RejectionCategory};
use orchard_common::db::settings;
use orchard_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Nodes of the strategy cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleNode {
    CollectIntel,
    AnalyzeCycle,
    SetStrategy,
    PlanContent,
    SelectTools,
    ApprovePlan,
    HumanReviewGate,
    ReflectAll,
}

impl CycleNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleNode::CollectIntel => "collect_intel",
            CycleNode::AnalyzeCycle => "analyze_cycle",
            CycleNode::SetStrategy => "set_strategy",
            CycleNode::PlanContent => "plan_content",
            CycleNode::SelectTools => "select_tools",
            CycleNode::ApprovePlan => "approve_plan",
            CycleNode::HumanReviewGate => "human_review_gate",
            CycleNode::ReflectAll => "reflect_all",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "collect_intel" => Some(CycleNode::CollectIntel),
            "analyze_cycle" => Some(CycleNode::AnalyzeCycle),
            "set_strategy" => Some(CycleNode::SetStrategy),
            "plan_content" => Some(CycleNode::PlanContent),
            "select_tools" => Some(CycleNode::SelectTools),
            "approve_plan" => Some(CycleNode::ApprovePlan),
            "human_review_gate" => Some(CycleNode::HumanReviewGate),
            "reflect_all" => Some(CycleNode::ReflectAll),
            _ => None,
        }
    }
}

/// An approval/rejection decision, from the automatic gate or a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub status: ApprovalStatus,
    pub rejection_category: Option<RejectionCategory>,
}

/// One planned content item inside the cycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPlan {
    pub content_id: String,
    pub account_id: String,
    pub content_format: String,
    pub niche: Option<String>,
}

/// Serialized cycle state — persisted after every node so any process can
/// resume from exactly where another left off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleState {
    #[serde(default)]
    pub intel: Option<nodes::IntelSummary>,
    #[serde(default)]
    pub analysis: Option<nodes::AnalysisSummary>,
    #[serde(default)]
    pub directive: Option<String>,
    #[serde(default)]
    pub content_plans: Vec<ContentPlan>,
    #[serde(default)]
    pub approval: Option<Decision>,
    #[serde(default)]
    pub human_decision: Option<Decision>,
    /// Automatic-gate attempts, bounds auto-rejection loops
    #[serde(default)]
    pub approval_attempts: u32,
    /// Per-node execution counts (observability + resume verification)
    #[serde(default)]
    pub node_runs: BTreeMap<String, u32>,
}

impl CycleState {
    pub fn record_run(&mut self, node: CycleNode) {
        *self.node_runs.entry(node.as_str().to_string()).or_insert(0) += 1;
    }

    pub fn runs(&self, node: CycleNode) -> u32 {
        self.node_runs.get(node.as_str()).copied().unwrap_or(0)
    }
}

/// Terminal outcome of driving a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// Durably paused at the human review gate
    Suspended,
}

/// Start a fresh daily cycle and drive it until completion or suspension.
pub async fn start_cycle(pool: &SqlitePool) -> Result<(String, CycleOutcome)> {
    let thread_id = uuid::Uuid::new_v4().to_string();
    let cycle = store::create_cycle(pool, &thread_id, CycleNode::CollectIntel.as_str()).await?;
    info!(thread_id = %thread_id, cycle_number = cycle.cycle_number, "Strategy cycle started");

    let outcome = run_from(pool, cycle).await?;
    Ok((thread_id, outcome))
}

/// Resume a suspended cycle with an external decision. Any process may call
/// this — the machine continues from the recorded node, not from the top.
pub async fn resume_cycle(
    pool: &SqlitePool,
    thread_id: &str,
    decision: Decision,
) -> Result<CycleOutcome> {
    let cycle = store::load_cycle(pool, thread_id).await?;

    if cycle.status != CycleStatus::Suspended {
        return Err(Error::InvalidInput(format!(
            "Cycle {} is not suspended (status: {:?})",
            thread_id, cycle.status
        )));
    }

    let mut state: CycleState = serde_json::from_value(cycle.state.0.clone())
        .map_err(|e| Error::Internal(format!("Corrupt cycle state: {e}")))?;
    state.human_decision = Some(decision);

    let mut cycle = cycle;
    cycle.state = sqlx::types::Json(
        serde_json::to_value(&state)
            .map_err(|e| Error::Internal(format!("State serialize: {e}")))?,
    );
    store::save_progress(pool, thread_id, &cycle.current_node, &state, CycleStatus::Running)
        .await?;

    info!(thread_id = %thread_id, node = %cycle.current_node, "Resuming suspended cycle");
    run_from(pool, cycle).await
}

/// Drive the machine from its recorded node until it completes or suspends.
async fn run_from(pool: &SqlitePool, cycle: Cycle) -> Result<CycleOutcome> {
    let thread_id = cycle.thread_id.clone();
    let mut node = CycleNode::from_str(&cycle.current_node)
        .ok_or_else(|| Error::Internal(format!("Unknown cycle node: {}", cycle.current_node)))?;
    let mut state: CycleState = serde_json::from_value(cycle.state.0)
        .map_err(|e| Error::Internal(format!("Corrupt cycle state: {e}")))?;

    loop {
        let next = execute_node(pool, &thread_id, node, &mut state).await?;
        state.record_run(node);

        match next {
            NodeResult::Next(next_node) => {
                store::save_progress(
                    pool,
                    &thread_id,
                    next_node.as_str(),
                    &state,
                    CycleStatus::Running,
                )
                .await?;
                node = next_node;
            }
            NodeResult::Suspend => {
                store::save_progress(
                    pool,
                    &thread_id,
                    node.as_str(),
                    &state,
                    CycleStatus::Suspended,
                )
                .await?;
                info!(thread_id = %thread_id, "Cycle suspended awaiting human review");
                return Ok(CycleOutcome::Suspended);
            }
            NodeResult::Complete => {
                store::save_progress(
                    pool,
                    &thread_id,
                    node.as_str(),
                    &state,
                    CycleStatus::Completed,
                )
                .await?;
                info!(thread_id = %thread_id, "Strategy cycle completed");
                return Ok(CycleOutcome::Completed);
            }
        }
    }
}

enum NodeResult {
    Next(CycleNode),
    Suspend,
    Complete,
}

async fn execute_node(
    pool: &SqlitePool,
    thread_id: &str,
    node: CycleNode,
    state: &mut CycleState,
) -> Result<NodeResult> {
    info!(thread_id, node = node.as_str(), "Executing cycle node");

    match node {
        CycleNode::CollectIntel => {
            state.intel = Some(nodes::collect_intel(pool).await?);
            Ok(NodeResult::Next(CycleNode::AnalyzeCycle))
        }
        CycleNode::AnalyzeCycle => {
            state.analysis = Some(nodes::analyze_cycle(pool).await?);
            Ok(NodeResult::Next(CycleNode::SetStrategy))
        }
        CycleNode::SetStrategy => {
            state.directive = Some(nodes::set_strategy(state));
            Ok(NodeResult::Next(CycleNode::PlanContent))
        }
        CycleNode::PlanContent => {
            state.content_plans = nodes::plan_content(pool, thread_id, state).await?;
            Ok(NodeResult::Next(CycleNode::SelectTools))
        }
        CycleNode::SelectTools => {
            nodes::select_tools(pool, state).await?;
            Ok(NodeResult::Next(CycleNode::ApprovePlan))
        }
        CycleNode::ApprovePlan => {
            let decision = nodes::approve_plan(state);
            state.approval_attempts += 1;
            state.approval = Some(decision.clone());

            let human_review = settings::human_review_enabled(pool).await?;
            Ok(NodeResult::Next(router::approve_plan_edge(&decision, human_review)))
        }
        CycleNode::HumanReviewGate => {
            // A decision may already be waiting (dashboard wrote it before we
            // reached the gate, or this is a resume)
            if state.human_decision.is_none() {
                if let Some(approval) = store::take_pending_approval(pool, thread_id).await? {
                    state.human_decision = Some(Decision {
                        status: approval.status,
                        rejection_category: approval.rejection_category,
                    });
                }
            }

            match state.human_decision.take() {
                Some(decision) => {
                    info!(
                        thread_id,
                        status = ?decision.status,
                        category = ?decision.rejection_category,
                        "Human review decision applied"
                    );
                    Ok(NodeResult::Next(router::human_review_edge(&decision)))
                }
                None => {
                    // First entry: expose the plans for review, then pause
                    nodes::mark_plans_pending_approval(pool, state).await?;
                    Ok(NodeResult::Suspend)
                }
            }
        }
        CycleNode::ReflectAll => {
            nodes::reflect_all(pool, thread_id, state).await?;
            Ok(NodeResult::Complete)
        }
    }
}

/// One scheduler pass: start today's cycle if none exists yet, and resume any
/// suspended cycle that has received a decision.
pub async fn tick(pool: &SqlitePool) -> Result<()> {
    let today_start = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| Error::Internal("invalid day start".into()))?;

    if !store::cycle_started_since(pool, today_start).await? {
        let (thread_id, outcome) = start_cycle(pool).await?;
        info!(thread_id = %thread_id, outcome = ?outcome, "Daily cycle run");
    }

    // Resume suspended cycles for which a decision has arrived
    for cycle in store::suspended_cycles(pool).await? {
        if let Some(approval) = store::take_pending_approval(pool, &cycle.thread_id).await? {
            let decision = Decision {
                status: approval.status,
                rejection_category: approval.rejection_category,
            };
            match resume_cycle(pool, &cycle.thread_id, decision).await {
                Ok(outcome) => {
                    info!(thread_id = %cycle.thread_id, outcome = ?outcome, "Cycle resumed")
                }
                Err(e) => warn!(thread_id = %cycle.thread_id, error = %e, "Resume failed"),
            }
        }
    }

    Ok(())
}
