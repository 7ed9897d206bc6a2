//! Rejection routing
//!
//! One routing table shared by `approve_plan` and the human review gate —
//! the two places must never diverge.

use crate::cycle::{CycleNode, Decision};
use orchard_common::db::models::{ApprovalStatus, RejectionCategory};

/// Where a rejection category re-enters the cycle.
pub fn route_rejection(category: RejectionCategory) -> CycleNode {
    match category {
        RejectionCategory::PlanRevision => CycleNode::PlanContent,
        RejectionCategory::DataInsufficient => CycleNode::CollectIntel,
        RejectionCategory::HypothesisWeak => CycleNode::AnalyzeCycle,
    }
}

/// Edge out of `approve_plan`.
pub fn approve_plan_edge(decision: &Decision, human_review_enabled: bool) -> CycleNode {
    match decision.status {
        ApprovalStatus::Rejected => route_rejection(
            decision
                .rejection_category
                .unwrap_or(RejectionCategory::PlanRevision),
        ),
        ApprovalStatus::Approved => {
            if human_review_enabled {
                CycleNode::HumanReviewGate
            } else {
                CycleNode::ReflectAll
            }
        }
    }
}

/// Edge out of the human review gate, applied on resume. Same category table
/// as `approve_plan`.
pub fn human_review_edge(decision: &Decision) -> CycleNode {
    match decision.status {
        ApprovalStatus::Rejected => route_rejection(
            decision
                .rejection_category
                .unwrap_or(RejectionCategory::PlanRevision),
        ),
        ApprovalStatus::Approved => CycleNode::ReflectAll,
    }
}
