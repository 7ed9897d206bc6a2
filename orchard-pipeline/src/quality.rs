//! Quality gate
//!
//! Scores produced content 0.0-10.0 from a list of per-format checks; each
//! check contributes equally. The score is compared against
//! `AUTO_APPROVE_SCORE_THRESHOLD` by the pipeline.

use orchard_common::db::models::{Content, ContentFormat};
use crate::state::PipelineState;

/// One quality check outcome.
#[derive(Debug, Clone)]
pub struct QualityCheck {
    pub name: &'static str,
    pub passed: bool,
}

/// Full quality report for one produced content item.
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub checks: Vec<QualityCheck>,
    pub score: f64,
}

impl QualityReport {
    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name)
            .collect()
    }
}

fn score(checks: &[QualityCheck]) -> f64 {
    if checks.is_empty() {
        return 0.0;
    }
    let passed = checks.iter().filter(|c| c.passed).count();
    let raw = passed as f64 / checks.len() as f64 * 10.0;
    (raw * 10.0).round() / 10.0
}

/// Evaluate produced output against per-format checks.
pub fn evaluate(content: &Content, state: &PipelineState) -> QualityReport {
    let checks = match content.content_format {
        ContentFormat::ShortVideo => video_checks(state),
        ContentFormat::TextPost => text_checks(state),
        // Dispatch fails fast before production; nothing to evaluate
        ContentFormat::ImagePost => Vec::new(),
    };

    let score = score(&checks);
    QualityReport { checks, score }
}

fn video_checks(state: &PipelineState) -> Vec<QualityCheck> {
    let duration = state.duration_seconds.unwrap_or(0.0);
    vec![
        QualityCheck {
            name: "media_present",
            passed: state.media_url.as_deref().is_some_and(|u| !u.is_empty()),
        },
        QualityCheck {
            name: "duration_positive",
            passed: duration > 0.0,
        },
        QualityCheck {
            name: "duration_short_form",
            passed: duration > 0.0 && duration <= 180.0,
        },
    ]
}

fn text_checks(state: &PipelineState) -> Vec<QualityCheck> {
    let text = state.generated_text.as_deref().unwrap_or("");
    vec![
        QualityCheck {
            name: "text_present",
            passed: !text.trim().is_empty(),
        },
        QualityCheck {
            name: "text_within_limit",
            passed: !text.is_empty() && text.chars().count() <= 2200,
        },
        QualityCheck {
            name: "text_minimum_length",
            passed: text.chars().count() >= 20,
        },
    ]
}
