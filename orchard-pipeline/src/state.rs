//! Pipeline state machine definition
//!
//! Nodes are a closed enum; routing happens on variants, never on strings.
//! One `PipelineState` lives for the duration of a single task and is reset
//! when the machine loops back to polling.

use orchard_common::db::models::{Content, Task};

/// Nodes of the production pipeline state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineNode {
    PollTasks,
    Sleep,
    FetchData,
    Dispatch,
    GenerateVideo,
    GenerateText,
    QualityCheck,
    HandleError,
    RevisionPlanning,
}

impl PipelineNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineNode::PollTasks => "poll_tasks",
            PipelineNode::Sleep => "sleep",
            PipelineNode::FetchData => "fetch_data",
            PipelineNode::Dispatch => "dispatch",
            PipelineNode::GenerateVideo => "generate_video",
            PipelineNode::GenerateText => "generate_text",
            PipelineNode::QualityCheck => "quality_check",
            PipelineNode::HandleError => "handle_error",
            PipelineNode::RevisionPlanning => "revision_planning",
        }
    }
}

/// A recorded pipeline fault, routed through `handle_error`.
#[derive(Debug, Clone)]
pub struct PipelineError {
    pub node: PipelineNode,
    pub message: String,
    /// Validation-class faults are failed permanently, never retried
    pub retryable: bool,
}

/// Mutable state carried between node executions.
#[derive(Debug, Default)]
pub struct PipelineState {
    pub task: Option<Task>,
    pub content: Option<Content>,
    /// Generated media location (video path)
    pub media_url: Option<String>,
    pub duration_seconds: Option<f64>,
    /// Generated text (text posts)
    pub generated_text: Option<String>,
    pub quality_score: Option<f64>,
    /// Set in fetch_data when the content had been rejected by human review
    pub human_rejected: bool,
    pub error: Option<PipelineError>,
}

impl PipelineState {
    /// Reset per-task fields when returning to the poll node.
    pub fn reset(&mut self) {
        *self = PipelineState::default();
    }
}
