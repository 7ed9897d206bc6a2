//! Database models
//!
//! Closed enums for every routed status/category — routing happens on enum
//! variants, never on open-ended strings. Unknown variants are decode errors,
//! not silent no-ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

// ============================================================================
// Task queue
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskType {
    Produce,
    Publish,
    Measure,
    Curate,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Produce => "produce",
            TaskType::Publish => "publish",
            TaskType::Measure => "measure",
            TaskType::Curate => "curate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Waiting,
    Processing,
    Retrying,
    Completed,
    Failed,
    FailedPermanent,
}

impl TaskStatus {
    /// Terminal statuses never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::FailedPermanent)
    }
}

/// Minimal task payload shape shared by all task types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_id: Option<i64>,
    /// Measurement round for measure tasks ("48h", "7d", "30d")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurement_round: Option<String>,
    /// Analysis kind for curate tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_kind: Option<String>,
}

impl TaskPayload {
    pub fn for_content(content_id: &str) -> Self {
        Self {
            content_id: Some(content_id.to_string()),
            ..Self::default()
        }
    }
}

/// One row in the durable task queue. Retained indefinitely for audit.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub task_type: TaskType,
    pub payload: Json<TaskPayload>,
    pub status: TaskStatus,
    pub priority: i64,
    pub assigned_worker: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    pub error_message: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Earliest time a retrying task becomes claimable again
    pub retry_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Content
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContentFormat {
    ShortVideo,
    TextPost,
    ImagePost,
}

impl ContentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFormat::ShortVideo => "short_video",
            ContentFormat::TextPost => "text_post",
            ContentFormat::ImagePost => "image_post",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContentStatus {
    Planned,
    Producing,
    PendingApproval,
    Ready,
    Posted,
    Measured,
    Analyzed,
    Rejected,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Content {
    pub content_id: String,
    pub character_id: Option<String>,
    pub content_format: ContentFormat,
    pub status: ContentStatus,
    pub niche: Option<String>,
    pub hook_type: Option<String>,
    pub narrative_structure: Option<String>,
    pub total_duration_seconds: Option<f64>,
    pub sound_bgm: Option<String>,
    /// Hashtag/keyword tags, first tag drives the hashtag_keyword factor
    pub tags: Option<Json<Vec<String>>>,
    pub recipe_id: Option<i64>,
    pub script_language: Option<String>,
    pub generated_text: Option<String>,
    pub media_url: Option<String>,
    pub quality_score: Option<f64>,
    pub revision_count: i64,
    pub metadata: Option<Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Accounts & platforms
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Platform {
    Youtube,
    Tiktok,
    Instagram,
    X,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Youtube,
        Platform::Tiktok,
        Platform::Instagram,
        Platform::X,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::X => "x",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
}

/// OAuth credential blob stored per account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub account_id: String,
    pub platform: Platform,
    pub niche: Option<String>,
    pub status: AccountStatus,
    pub display_name: Option<String>,
    pub auth_credentials: Option<Json<OAuthCredentials>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account age buckets used by the baseline cohort fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBucket {
    Days0To30,
    Days31To90,
    Days91To180,
    Days180Plus,
}

impl AgeBucket {
    pub fn from_age_days(age_days: i64) -> Self {
        match age_days {
            d if d <= 30 => AgeBucket::Days0To30,
            d if d <= 90 => AgeBucket::Days31To90,
            d if d <= 180 => AgeBucket::Days91To180,
            _ => AgeBucket::Days180Plus,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeBucket::Days0To30 => "0-30",
            AgeBucket::Days31To90 => "31-90",
            AgeBucket::Days91To180 => "91-180",
            AgeBucket::Days180Plus => "180+",
        }
    }

    /// `created_at` bounds (lower inclusive, upper exclusive) for accounts in
    /// this bucket at time `now`.
    pub fn created_at_bounds(
        &self,
        now: DateTime<Utc>,
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let days = |n: i64| chrono::Duration::days(n);
        match self {
            AgeBucket::Days0To30 => (Some(now - days(30)), None),
            AgeBucket::Days31To90 => (Some(now - days(90)), Some(now - days(30))),
            AgeBucket::Days91To180 => (Some(now - days(180)), Some(now - days(90))),
            AgeBucket::Days180Plus => (None, Some(now - days(180))),
        }
    }
}

// ============================================================================
// Publications, metrics & measurement rounds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PublicationStatus {
    Posted,
    Measured,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Publication {
    pub id: i64,
    pub content_id: String,
    pub account_id: String,
    pub platform: Platform,
    pub status: PublicationStatus,
    pub posted_at: DateTime<Utc>,
    pub platform_post_id: Option<String>,
    pub post_url: Option<String>,
    /// posted_at + METRICS_COLLECTION_DELAY_HOURS
    pub measure_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Fixed-delay measurement checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementRound {
    Hours48,
    Days7,
    Days30,
}

impl MeasurementRound {
    pub const ALL: [MeasurementRound; 3] = [
        MeasurementRound::Hours48,
        MeasurementRound::Days7,
        MeasurementRound::Days30,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementRound::Hours48 => "48h",
            MeasurementRound::Days7 => "7d",
            MeasurementRound::Days30 => "30d",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "48h" => Some(MeasurementRound::Hours48),
            "7d" => Some(MeasurementRound::Days7),
            "30d" => Some(MeasurementRound::Days30),
            _ => None,
        }
    }

    pub fn delay_hours(&self) -> i64 {
        match self {
            MeasurementRound::Hours48 => 48,
            MeasurementRound::Days7 => 7 * 24,
            MeasurementRound::Days30 => 30 * 24,
        }
    }

    /// Column in prediction_snapshots that holds this round's actual value.
    pub fn actual_column(&self) -> &'static str {
        match self {
            MeasurementRound::Hours48 => "actual_impressions_48h",
            MeasurementRound::Days7 => "actual_impressions_7d",
            MeasurementRound::Days30 => "actual_impressions_30d",
        }
    }

    /// Error column for this round; the 48h checkpoint records no error.
    pub fn error_column(&self) -> Option<&'static str> {
        match self {
            MeasurementRound::Hours48 => None,
            MeasurementRound::Days7 => Some("prediction_error_7d"),
            MeasurementRound::Days30 => Some("prediction_error_30d"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MetricsRow {
    pub id: i64,
    pub publication_id: i64,
    pub measurement_point: String,
    pub views: f64,
    pub likes: f64,
    pub comments: f64,
    pub shares: f64,
    /// Degraded-mode provenance: 1 when hash-seeded synthetic data was stored
    pub synthetic: bool,
    pub measured_at: DateTime<Utc>,
}

// ============================================================================
// Prediction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BaselineSource {
    OwnHistory,
    CohortNicheAge,
    CohortNiche,
    CohortPlatform,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountBaseline {
    pub account_id: String,
    pub baseline_impressions: f64,
    pub source: BaselineSource,
    pub sample_count: i64,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PredictionSnapshot {
    pub id: i64,
    pub publication_id: i64,
    pub content_id: String,
    pub account_id: String,
    pub baseline_used: f64,
    pub baseline_source: BaselineSource,
    /// Exactly 9 factor keys, each `{value, adjustment, weight}`, plus an
    /// optional `"cold_start": "true"` marker
    pub adjustments_applied: Json<serde_json::Value>,
    pub total_adjustment: f64,
    pub predicted_impressions: f64,
    pub actual_impressions_48h: Option<f64>,
    pub actual_impressions_7d: Option<f64>,
    pub actual_impressions_30d: Option<f64>,
    pub prediction_error_7d: Option<f64>,
    pub prediction_error_30d: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Strategy cycles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CycleStatus {
    Running,
    Suspended,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RejectionCategory {
    PlanRevision,
    DataInsufficient,
    HypothesisWeak,
}

/// Durable state machine record: current node + serialized state. Resuming
/// loads this row, injects the decision and continues from `current_node`;
/// prior nodes are never re-run.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cycle {
    pub id: i64,
    pub cycle_number: i64,
    pub thread_id: String,
    pub status: CycleStatus,
    pub current_node: String,
    pub state: Json<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Approval/rejection decision written by the external dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CycleApproval {
    pub id: i64,
    pub thread_id: String,
    pub status: ApprovalStatus,
    pub rejection_category: Option<RejectionCategory>,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Recipes, KPI, batch bookkeeping
// ============================================================================

/// One step of a deterministic video production recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeStep {
    pub step_name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductionRecipe {
    pub id: i64,
    pub recipe_name: String,
    pub steps: Json<Vec<RecipeStep>>,
    pub is_active: bool,
    pub times_used: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct KpiSnapshot {
    pub id: i64,
    pub platform: Platform,
    /// "YYYY-MM"
    pub year_month: String,
    pub kpi_target: f64,
    pub avg_impressions: f64,
    pub achievement_rate: f64,
    pub account_count: i64,
    pub publication_count: i64,
    pub prediction_accuracy: Option<f64>,
    /// True only when distinct contributing accounts meet the minimum
    pub is_reliable: bool,
    pub created_at: DateTime<Utc>,
}

/// Audit + dedup record for batch job firings. UNIQUE(job_name, dedup_key)
/// is the serialization point for concurrent scheduler instances.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BatchExecution {
    pub id: i64,
    pub job_name: String,
    pub dedup_key: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub success: Option<bool>,
    pub error: Option<String>,
}
