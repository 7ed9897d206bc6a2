//! Production pipeline state machine
//!
//! poll_tasks → {sleep | fetch_data} → dispatch → {generate_video |
//! generate_text} → quality_check → {poll_tasks | handle_error |
//! revision_planning}
//!
//! `dispatch` routes purely on the content format. The declared-but-unbuilt
//! `image_post` format fails fast with an unsupported-variant error instead
//! of silently doing nothing.

use crate::generate::{self, GenerativeAdapter};
use crate::quality;
use crate::state::{PipelineError, PipelineNode, PipelineState};
use chrono::{Duration, Utc};
use orchard_common::db::models::{Content, ContentFormat, ContentStatus, TaskPayload, TaskType};
use orchard_common::db::{settings, tasks};
use orchard_common::{Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Pipeline {
    pool: SqlitePool,
    generator: Arc<dyn GenerativeAdapter>,
    worker_id: String,
}

impl Pipeline {
    pub fn new(pool: SqlitePool, generator: Arc<dyn GenerativeAdapter>, worker_id: &str) -> Self {
        Self {
            pool,
            generator,
            worker_id: worker_id.to_string(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Execute the current node and return the next one. Node faults are
    /// converted into the `handle_error` route, they never escape the
    /// machine; only infrastructure failures (e.g. the store disappearing)
    /// propagate as errors.
    pub async fn step(
        &self,
        node: PipelineNode,
        state: &mut PipelineState,
    ) -> Result<PipelineNode> {
        let result = match node {
            PipelineNode::PollTasks => self.poll_tasks(state).await,
            PipelineNode::Sleep => self.sleep().await,
            PipelineNode::FetchData => self.fetch_data(state).await,
            PipelineNode::Dispatch => self.dispatch(state).await,
            PipelineNode::GenerateVideo => self.generate_video(state).await,
            PipelineNode::GenerateText => self.generate_text(state).await,
            PipelineNode::QualityCheck => self.quality_check(state).await,
            PipelineNode::HandleError => self.handle_error(state).await,
            PipelineNode::RevisionPlanning => self.revision_planning(state).await,
        };

        match result {
            Ok(next) => Ok(next),
            Err(Error::Database(e)) => Err(Error::Database(e)),
            Err(e) => {
                let retryable = !matches!(
                    e,
                    Error::InvalidInput(_) | Error::Unsupported(_) | Error::NotFound(_)
                );
                warn!(node = node.as_str(), error = %e, "Pipeline node failed");
                state.error = Some(PipelineError {
                    node,
                    message: e.to_string(),
                    retryable,
                });
                Ok(PipelineNode::HandleError)
            }
        }
    }

    async fn poll_tasks(&self, state: &mut PipelineState) -> Result<PipelineNode> {
        state.reset();

        match tasks::claim(&self.pool, TaskType::Produce, &self.worker_id).await? {
            Some(task) => {
                state.task = Some(task);
                Ok(PipelineNode::FetchData)
            }
            None => Ok(PipelineNode::Sleep),
        }
    }

    async fn sleep(&self) -> Result<PipelineNode> {
        let interval = settings::production_poll_interval_sec(&self.pool).await?;
        tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
        Ok(PipelineNode::PollTasks)
    }

    async fn fetch_data(&self, state: &mut PipelineState) -> Result<PipelineNode> {
        let task = state
            .task
            .as_ref()
            .ok_or_else(|| Error::Internal("fetch_data without a claimed task".into()))?;
        let content_id = task
            .payload
            .content_id
            .clone()
            .ok_or_else(|| Error::InvalidInput("produce task payload missing content_id".into()))?;

        let content = sqlx::query_as::<_, Content>("SELECT * FROM content WHERE content_id = ?")
            .bind(&content_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Content not found: {}", content_id)))?;

        // A previously human-rejected item re-entering production routes to
        // revision planning if it fails the gate again
        state.human_rejected = content.status == ContentStatus::Rejected;

        self.set_content_status(&content_id, ContentStatus::Producing).await?;
        info!(content_id = %content_id, "Content entering production");

        state.content = Some(content);
        Ok(PipelineNode::Dispatch)
    }

    async fn dispatch(&self, state: &mut PipelineState) -> Result<PipelineNode> {
        let content = state
            .content
            .as_ref()
            .ok_or_else(|| Error::Internal("dispatch without content".into()))?;

        match content.content_format {
            ContentFormat::ShortVideo => {
                if content.recipe_id.is_none() {
                    return Err(Error::InvalidInput(format!(
                        "short_video content {} requires a recipe",
                        content.content_id
                    )));
                }
                Ok(PipelineNode::GenerateVideo)
            }
            ContentFormat::TextPost => Ok(PipelineNode::GenerateText),
            // Declared future extension: refuse loudly, never no-op
            ContentFormat::ImagePost => Err(Error::Unsupported(
                "image_post generation is not yet supported".into(),
            )),
        }
    }

    async fn generate_video(&self, state: &mut PipelineState) -> Result<PipelineNode> {
        let content = state
            .content
            .as_ref()
            .ok_or_else(|| Error::Internal("generate_video without content".into()))?;
        let recipe_id = content
            .recipe_id
            .ok_or_else(|| Error::InvalidInput("missing recipe id".into()))?;

        let recipe = generate::load_recipe(&self.pool, recipe_id).await?;
        let output = generate::run_recipe(self.generator.as_ref(), content, &recipe).await?;
        generate::record_recipe_use(&self.pool, recipe_id).await?;

        sqlx::query(
            "UPDATE content SET media_url = ?, total_duration_seconds = ?, updated_at = ? WHERE content_id = ?",
        )
        .bind(&output.media_url)
        .bind(output.duration_seconds)
        .bind(Utc::now())
        .bind(&content.content_id)
        .execute(&self.pool)
        .await?;

        state.media_url = output.media_url;
        state.duration_seconds = output.duration_seconds;
        Ok(PipelineNode::QualityCheck)
    }

    async fn generate_text(&self, state: &mut PipelineState) -> Result<PipelineNode> {
        let content = state
            .content
            .as_ref()
            .ok_or_else(|| Error::Internal("generate_text without content".into()))?;

        let generated = self.generator.generate_text(content).await?;
        let full_text = generated.full_text();

        sqlx::query("UPDATE content SET generated_text = ?, updated_at = ? WHERE content_id = ?")
            .bind(&full_text)
            .bind(Utc::now())
            .bind(&content.content_id)
            .execute(&self.pool)
            .await?;

        state.generated_text = Some(full_text);
        Ok(PipelineNode::QualityCheck)
    }

    async fn quality_check(&self, state: &mut PipelineState) -> Result<PipelineNode> {
        let content = state
            .content
            .clone()
            .ok_or_else(|| Error::Internal("quality_check without content".into()))?;
        let (task_id, task_priority, task_account) = {
            let task = state
                .task
                .as_ref()
                .ok_or_else(|| Error::Internal("quality_check without task".into()))?;
            (task.id, task.priority, task.payload.account_id.clone())
        };

        let report = quality::evaluate(&content, state);
        let threshold = settings::auto_approve_score_threshold(&self.pool).await?;

        sqlx::query("UPDATE content SET quality_score = ?, updated_at = ? WHERE content_id = ?")
            .bind(report.score)
            .bind(Utc::now())
            .bind(&content.content_id)
            .execute(&self.pool)
            .await?;
        state.quality_score = Some(report.score);

        if report.score >= threshold {
            let human_review = settings::human_review_enabled(&self.pool).await?;

            if human_review {
                self.set_content_status(&content.content_id, ContentStatus::PendingApproval)
                    .await?;
                info!(
                    content_id = %content.content_id,
                    score = report.score,
                    "Quality passed, awaiting human review"
                );
            } else {
                self.set_content_status(&content.content_id, ContentStatus::Ready).await?;

                let payload = TaskPayload {
                    content_id: Some(content.content_id.clone()),
                    account_id: task_account,
                    ..TaskPayload::default()
                };
                tasks::enqueue(&self.pool, TaskType::Publish, &payload, task_priority).await?;
                info!(
                    content_id = %content.content_id,
                    score = report.score,
                    "Quality passed, content ready and queued for publishing"
                );
            }

            tasks::complete(&self.pool, task_id).await?;
            return Ok(PipelineNode::PollTasks);
        }

        let failed = report.failed_checks().join(", ");
        warn!(
            content_id = %content.content_id,
            score = report.score,
            threshold,
            failed_checks = %failed,
            "Quality below threshold"
        );

        if state.human_rejected {
            return Ok(PipelineNode::RevisionPlanning);
        }

        state.error = Some(PipelineError {
            node: PipelineNode::QualityCheck,
            message: format!(
                "Quality score {} below threshold {} (failed: {})",
                report.score, threshold, failed
            ),
            retryable: true,
        });
        Ok(PipelineNode::HandleError)
    }

    async fn handle_error(&self, state: &mut PipelineState) -> Result<PipelineNode> {
        let error = state.error.take().unwrap_or(PipelineError {
            node: PipelineNode::HandleError,
            message: "Unknown pipeline error".into(),
            retryable: false,
        });

        if let Some(content) = &state.content {
            self.set_content_status(&content.content_id, ContentStatus::Error).await?;
        }

        if let Some(task) = &state.task {
            if error.retryable {
                let base_sec: i64 = settings::get_setting(&self.pool, "TASK_RETRY_BASE_SEC").await?;
                tasks::fail(&self.pool, task.id, &error.message, Duration::seconds(base_sec))
                    .await?;
            } else {
                tasks::fail_permanent(&self.pool, task.id, &error.message).await?;
            }
        }

        Ok(PipelineNode::PollTasks)
    }

    async fn revision_planning(&self, state: &mut PipelineState) -> Result<PipelineNode> {
        let content = state
            .content
            .as_ref()
            .ok_or_else(|| Error::Internal("revision_planning without content".into()))?;
        let task = state
            .task
            .as_ref()
            .ok_or_else(|| Error::Internal("revision_planning without task".into()))?;

        let max_revisions = settings::max_content_revision_count(&self.pool).await?;
        let revision_count = content.revision_count + 1;

        if revision_count > max_revisions {
            // Revision budget exhausted: terminal rejection, no endless loop
            sqlx::query(
                "UPDATE content SET status = 'rejected', revision_count = ?, updated_at = ? WHERE content_id = ?",
            )
            .bind(revision_count)
            .bind(Utc::now())
            .bind(&content.content_id)
            .execute(&self.pool)
            .await?;

            warn!(
                content_id = %content.content_id,
                revision_count,
                max_revisions,
                "Revision budget exhausted, content terminally rejected"
            );
            tasks::complete(&self.pool, task.id).await?;
            return Ok(PipelineNode::PollTasks);
        }

        sqlx::query(
            "UPDATE content SET status = 'planned', revision_count = ?, updated_at = ? WHERE content_id = ?",
        )
        .bind(revision_count)
        .bind(Utc::now())
        .bind(&content.content_id)
        .execute(&self.pool)
        .await?;

        // Fresh produce task for the revision attempt, slightly prioritized
        tasks::enqueue(
            &self.pool,
            TaskType::Produce,
            &TaskPayload {
                content_id: Some(content.content_id.clone()),
                account_id: task.payload.account_id.clone(),
                ..TaskPayload::default()
            },
            task.priority + 1,
        )
        .await?;
        tasks::complete(&self.pool, task.id).await?;

        info!(
            content_id = %content.content_id,
            revision_count,
            "Revision planned, content re-queued for production"
        );
        Ok(PipelineNode::PollTasks)
    }

    async fn set_content_status(&self, content_id: &str, status: ContentStatus) -> Result<()> {
        sqlx::query("UPDATE content SET status = ?, updated_at = ? WHERE content_id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drive the machine forever. Publish tasks are drained at every poll
    /// boundary; the same worker owns both halves of the produce/publish
    /// flow.
    pub async fn run_forever(
        &self,
        registry: &orchard_common::platform::AdapterRegistry,
    ) -> Result<()> {
        let mut node = PipelineNode::PollTasks;
        let mut state = PipelineState::default();

        loop {
            if node == PipelineNode::PollTasks {
                if let Err(e) = crate::publish::drain_publish_tasks(
                    &self.pool,
                    registry,
                    &self.worker_id,
                )
                .await
                {
                    warn!(error = %e, "Publish drain failed");
                }
            }

            node = self.step(node, &mut state).await?;
        }
    }
}
