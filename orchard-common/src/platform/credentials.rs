//! Credential refresh
//!
//! Keeps per-account OAuth credentials valid: accounts whose access token
//! expires inside the configured buffer window — and that hold a refresh
//! token — get a new token through their platform adapter. Accounts whose
//! refresh is rejected outright are left to the collector's
//! suspend-on-authorization-failure path.

use crate::db::models::{Account, OAuthCredentials};
use crate::db::settings;
use crate::platform::AdapterRegistry;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Summary of one refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Active accounts whose token expires within `buffer_hours` and that can
/// actually be refreshed (refresh token present).
pub async fn expiring_accounts(
    pool: &SqlitePool,
    buffer_hours: i64,
    now: DateTime<Utc>,
) -> Result<Vec<Account>> {
    let horizon = now + Duration::hours(buffer_hours);

    let accounts = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE status = 'active'")
        .fetch_all(pool)
        .await?;

    // Credential JSON is opaque to SQLite; filter after decode
    Ok(accounts
        .into_iter()
        .filter(|account| {
            account
                .auth_credentials
                .as_ref()
                .map(|c| &c.0)
                .is_some_and(|c| {
                    c.refresh_token.is_some()
                        && c.token_expires_at.is_some_and(|expires| expires < horizon)
                })
        })
        .collect())
}

/// Persist refreshed credentials for an account.
pub async fn store_credentials(
    pool: &SqlitePool,
    account_id: &str,
    credentials: &OAuthCredentials,
) -> Result<()> {
    let json = serde_json::to_string(credentials)
        .map_err(|e| crate::Error::Internal(format!("Failed to serialize credentials: {e}")))?;

    sqlx::query("UPDATE accounts SET auth_credentials = ?, updated_at = ? WHERE account_id = ?")
        .bind(json)
        .bind(Utc::now())
        .bind(account_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Mark an account suspended (revoked credentials, repeated auth failures).
pub async fn suspend_account(pool: &SqlitePool, account_id: &str) -> Result<()> {
    sqlx::query("UPDATE accounts SET status = 'suspended', updated_at = ? WHERE account_id = ?")
        .bind(Utc::now())
        .bind(account_id)
        .execute(pool)
        .await?;

    warn!(account_id, "Account suspended");
    Ok(())
}

/// Run one refresh cycle: find expiring tokens, refresh each through its
/// platform adapter, persist the results. Individual failures are logged and
/// counted; they never abort the cycle.
pub async fn run_refresh_cycle(
    pool: &SqlitePool,
    registry: &AdapterRegistry,
    now: DateTime<Utc>,
) -> Result<RefreshSummary> {
    let buffer_hours: i64 = settings::get_setting(pool, "TOKEN_REFRESH_BUFFER_HOURS").await?;
    let expiring = expiring_accounts(pool, buffer_hours, now).await?;

    let mut summary = RefreshSummary {
        total: expiring.len() as u32,
        ..RefreshSummary::default()
    };

    for account in &expiring {
        let Some(credentials) = account.auth_credentials.as_ref().map(|c| &c.0) else {
            continue;
        };

        let result = match registry.get(account.platform) {
            Ok(adapter) => adapter.refresh_token(credentials).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(fresh) => {
                store_credentials(pool, &account.account_id, &fresh).await?;
                summary.succeeded += 1;
            }
            Err(e) => {
                warn!(
                    account_id = %account.account_id,
                    platform = account.platform.as_str(),
                    error = %e,
                    "Token refresh failed"
                );
                summary.failed += 1;
            }
        }
    }

    if summary.total > 0 {
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Token refresh cycle complete"
        );
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Platform;
    use crate::platform::{PlatformAdapter, PlatformMetrics, PublishResult};
    use crate::Error;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedRefreshAdapter {
        fail: bool,
    }

    #[async_trait]
    impl PlatformAdapter for FixedRefreshAdapter {
        async fn publish(
            &self,
            _account: &Account,
            _content: &crate::db::models::Content,
        ) -> crate::Result<PublishResult> {
            unimplemented!("not used in this test")
        }

        async fn fetch_metrics(
            &self,
            _credentials: &OAuthCredentials,
            _post_id: &str,
        ) -> crate::Result<PlatformMetrics> {
            unimplemented!("not used in this test")
        }

        async fn refresh_token(
            &self,
            credentials: &OAuthCredentials,
        ) -> crate::Result<OAuthCredentials> {
            if self.fail {
                return Err(Error::Unauthorized("refresh rejected".into()));
            }
            Ok(OAuthCredentials {
                access_token: Some("fresh-token".into()),
                refresh_token: credentials.refresh_token.clone(),
                token_expires_at: Some(Utc::now() + Duration::hours(24)),
            })
        }
    }

    async fn insert_account_with_expiry(
        pool: &SqlitePool,
        id: &str,
        expires_in_hours: i64,
        with_refresh_token: bool,
    ) {
        let now = Utc::now();
        let credentials = OAuthCredentials {
            access_token: Some("old-token".into()),
            refresh_token: with_refresh_token.then(|| "refresh".to_string()),
            token_expires_at: Some(now + Duration::hours(expires_in_hours)),
        };
        sqlx::query(
            "INSERT INTO accounts (account_id, platform, status, auth_credentials, created_at, updated_at)
             VALUES (?, 'tiktok', 'active', ?, ?, ?)",
        )
        .bind(id)
        .bind(serde_json::to_string(&credentials).unwrap())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn selects_only_refreshable_expiring_accounts() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();

        insert_account_with_expiry(&pool, "expiring", 1, true).await;
        insert_account_with_expiry(&pool, "healthy", 48, true).await;
        insert_account_with_expiry(&pool, "no-refresh-token", 1, false).await;

        let accounts = expiring_accounts(&pool, 2, Utc::now()).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].account_id, "expiring");
    }

    #[tokio::test]
    async fn refresh_cycle_persists_new_token() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();
        insert_account_with_expiry(&pool, "expiring", 1, true).await;

        let mut registry = AdapterRegistry::empty();
        registry.insert(Platform::Tiktok, Arc::new(FixedRefreshAdapter { fail: false }));

        let summary = run_refresh_cycle(&pool, &registry, Utc::now()).await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);

        let raw: String =
            sqlx::query_scalar("SELECT auth_credentials FROM accounts WHERE account_id = 'expiring'")
                .fetch_one(&pool)
                .await
                .unwrap();
        let stored: OAuthCredentials = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("fresh-token"));
    }

    #[tokio::test]
    async fn failed_refresh_is_counted_not_fatal() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        crate::db::init::init_schema(&pool).await.unwrap();
        insert_account_with_expiry(&pool, "expiring", 1, true).await;

        let mut registry = AdapterRegistry::empty();
        registry.insert(Platform::Tiktok, Arc::new(FixedRefreshAdapter { fail: true }));

        let summary = run_refresh_cycle(&pool, &registry, Utc::now()).await.unwrap();
        assert_eq!(summary.failed, 1);

        // Account is not suspended by the refresher; that's the collector's call
        let status: String =
            sqlx::query_scalar("SELECT status FROM accounts WHERE account_id = 'expiring'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "active");
    }
}
