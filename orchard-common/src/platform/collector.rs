//! Platform metrics collector
//!
//! Resolves the owning account's credentials for a platform post and fetches
//! engagement numbers under a bounded retry policy. The pipeline must never
//! stall on missing or broken credentials, so the degradation ladder is:
//!
//! 1. no credentials / no access token → deterministic synthetic metrics
//! 2. transient API failures → retry with exponential backoff and jitter
//! 3. authorization failure → exactly one token refresh-and-retry
//! 4. refresh also fails → suspend the account, return synthetic metrics

use crate::db::models::{Account, OAuthCredentials, Platform};
use crate::db::settings;
use crate::platform::credentials::{store_credentials, suspend_account};
use crate::platform::synthetic::synthetic_metrics;
use crate::platform::{AdapterRegistry, PlatformMetrics};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Collect metrics for a platform post owned by `account_id`.
///
/// Always returns metrics — synthetic as a last resort — so downstream
/// measurement can proceed.
pub async fn collect_metrics(
    pool: &SqlitePool,
    registry: &AdapterRegistry,
    account_id: &str,
    platform: Platform,
    platform_post_id: &str,
) -> Result<PlatformMetrics> {
    if platform_post_id.is_empty() {
        return Err(Error::InvalidInput(
            "platform_post_id is required for metrics collection".into(),
        ));
    }

    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE account_id = ?")
        .bind(account_id)
        .fetch_optional(pool)
        .await?;

    // No account or no usable token: degrade to synthetic immediately
    let Some(account) = account else {
        info!(platform_post_id, "No owning account, returning synthetic metrics");
        return Ok(synthetic_metrics(platform, platform_post_id));
    };
    let Some(credentials) = account.auth_credentials.as_ref().map(|c| c.0.clone()) else {
        info!(
            account_id,
            platform_post_id, "No credentials stored, returning synthetic metrics"
        );
        return Ok(synthetic_metrics(platform, platform_post_id));
    };
    if credentials.access_token.is_none() {
        info!(
            account_id,
            platform_post_id, "No access token, returning synthetic metrics"
        );
        return Ok(synthetic_metrics(platform, platform_post_id));
    }

    let adapter = registry.get(platform)?;
    let max_attempts: i64 = settings::get_setting(pool, "METRICS_MAX_COLLECTION_ATTEMPTS").await?;
    let policy = RetryPolicy::metrics_collection(max_attempts.max(1) as u32);

    let first = retry_with_backoff("fetch_metrics", &policy, || {
        adapter.fetch_metrics(&credentials, platform_post_id)
    })
    .await;

    match first {
        Ok(metrics) => Ok(metrics),
        Err(Error::Unauthorized(_)) => {
            // One refresh-and-retry, then suspension
            match refresh_and_retry(
                pool,
                registry,
                &account,
                &credentials,
                platform_post_id,
                &policy,
            )
            .await
            {
                Ok(metrics) => Ok(metrics),
                Err(e) => {
                    warn!(
                        account_id = %account.account_id,
                        error = %e,
                        "Authorization unrecoverable, suspending account and degrading to synthetic"
                    );
                    suspend_account(pool, &account.account_id).await?;
                    Ok(synthetic_metrics(platform, platform_post_id))
                }
            }
        }
        Err(e) => Err(e),
    }
}

async fn refresh_and_retry(
    pool: &SqlitePool,
    registry: &AdapterRegistry,
    account: &Account,
    credentials: &OAuthCredentials,
    platform_post_id: &str,
    policy: &RetryPolicy,
) -> Result<PlatformMetrics> {
    let adapter = registry.get(account.platform)?;

    let fresh = adapter.refresh_token(credentials).await?;
    store_credentials(pool, &account.account_id, &fresh).await?;
    info!(account_id = %account.account_id, "Token refreshed after authorization failure");

    retry_with_backoff("fetch_metrics_after_refresh", policy, || {
        adapter.fetch_metrics(&fresh, platform_post_id)
    })
    .await
}

/// Persist collected metrics for a publication round (UPSERT keyed by
/// publication and measurement point).
pub async fn store_metrics(
    pool: &SqlitePool,
    publication_id: i64,
    measurement_point: &str,
    metrics: &PlatformMetrics,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO metrics
            (publication_id, measurement_point, views, likes, comments, shares, synthetic, measured_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (publication_id, measurement_point) DO UPDATE SET
            views = excluded.views,
            likes = excluded.likes,
            comments = excluded.comments,
            shares = excluded.shares,
            synthetic = excluded.synthetic,
            measured_at = excluded.measured_at
        "#,
    )
    .bind(publication_id)
    .bind(measurement_point)
    .bind(metrics.views)
    .bind(metrics.likes)
    .bind(metrics.comments)
    .bind(metrics.shares)
    .bind(metrics.synthetic)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
