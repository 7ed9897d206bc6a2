//! Platform capability layer
//!
//! Social platforms are consumed as capabilities: publish a content item,
//! fetch post-level metrics, refresh an OAuth token. The wire format of any
//! particular platform API is out of scope — `RestAdapter` maps generic REST
//! semantics onto the shared error taxonomy and each platform contributes its
//! endpoints only.

pub mod collector;
pub mod credentials;
pub mod synthetic;

use crate::db::models::{Account, Content, OAuthCredentials, Platform};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Result of publishing one content item to one account.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub platform_post_id: String,
    pub post_url: Option<String>,
}

/// Post-level engagement numbers as returned by a platform (or synthesized).
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformMetrics {
    pub views: f64,
    pub likes: f64,
    pub comments: f64,
    pub shares: f64,
    /// True when this is hash-seeded synthetic data, never real API output
    pub synthetic: bool,
}

/// Per-platform capability seam. Implementations must be cheap to clone
/// behind an `Arc` and safe to call from any worker.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Publish content to the platform, returning the platform's post id.
    async fn publish(&self, account: &Account, content: &Content) -> Result<PublishResult>;

    /// Fetch engagement metrics for a platform post id.
    async fn fetch_metrics(
        &self,
        credentials: &OAuthCredentials,
        platform_post_id: &str,
    ) -> Result<PlatformMetrics>;

    /// Exchange a refresh token for fresh credentials.
    async fn refresh_token(&self, credentials: &OAuthCredentials) -> Result<OAuthCredentials>;
}

/// Registry mapping each platform to its adapter.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    /// Registry with the standard REST adapter for all four platforms.
    pub fn with_defaults() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("orchard/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        let mut adapters: HashMap<Platform, Arc<dyn PlatformAdapter>> = HashMap::new();
        for platform in Platform::ALL {
            adapters.insert(
                platform,
                Arc::new(RestAdapter::new(platform, http.clone())) as Arc<dyn PlatformAdapter>,
            );
        }
        Ok(Self { adapters })
    }

    /// Empty registry, populated via [`AdapterRegistry::insert`] (tests and
    /// alternate deployments).
    pub fn empty() -> Self {
        Self { adapters: HashMap::new() }
    }

    pub fn insert(&mut self, platform: Platform, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(platform, adapter);
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>> {
        self.adapters
            .get(&platform)
            .cloned()
            .ok_or_else(|| Error::Unsupported(format!("No adapter registered for platform: {}", platform.as_str())))
    }
}

/// Generic REST adapter. Maps HTTP status classes onto the error taxonomy:
/// 401 → `Unauthorized`, 429 → `RateLimited`, other 4xx → `InvalidInput`
/// (never retried), 5xx → `Platform` (retryable).
pub struct RestAdapter {
    platform: Platform,
    base_url: String,
    http: reqwest::Client,
}

impl RestAdapter {
    pub fn new(platform: Platform, http: reqwest::Client) -> Self {
        let base_url = match platform {
            Platform::Youtube => "https://www.googleapis.com/youtube/v3",
            Platform::Tiktok => "https://open.tiktokapis.com/v2",
            Platform::Instagram => "https://graph.facebook.com/v19.0",
            Platform::X => "https://api.x.com/2",
        }
        .to_string();
        Self { platform, base_url, http }
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<serde_json::Value> {
        let status = response.status();

        if status.as_u16() == 401 {
            return Err(Error::Unauthorized(format!(
                "{} access token expired or invalid",
                self.platform.as_str()
            )));
        }
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(Error::RateLimited { retry_after_secs });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::InvalidInput(format!(
                "{} API rejected request ({}): {}",
                self.platform.as_str(),
                status.as_u16(),
                body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Platform {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::Platform { status: status.as_u16(), message: e.to_string() })
    }
}

#[async_trait]
impl PlatformAdapter for RestAdapter {
    async fn publish(&self, account: &Account, content: &Content) -> Result<PublishResult> {
        let credentials = account
            .auth_credentials
            .as_ref()
            .map(|c| &c.0)
            .ok_or_else(|| Error::Unauthorized(format!("No credentials for account {}", account.account_id)))?;
        let token = credentials
            .access_token
            .as_deref()
            .ok_or_else(|| Error::Unauthorized(format!("No access token for account {}", account.account_id)))?;

        let body = serde_json::json!({
            "caption": content.generated_text,
            "media_url": content.media_url,
            "tags": content.tags.as_ref().map(|t| &t.0),
        });

        let response = self
            .http
            .post(format!("{}/posts", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Platform { status: 0, message: e.to_string() })?;

        let json = self.handle_response(response).await?;
        let platform_post_id = json
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Platform {
                status: 200,
                message: "publish response missing post id".into(),
            })?
            .to_string();
        let post_url = json.get("url").and_then(|v| v.as_str()).map(String::from);

        Ok(PublishResult { platform_post_id, post_url })
    }

    async fn fetch_metrics(
        &self,
        credentials: &OAuthCredentials,
        platform_post_id: &str,
    ) -> Result<PlatformMetrics> {
        let token = credentials
            .access_token
            .as_deref()
            .ok_or_else(|| Error::Unauthorized("No access token".into()))?;

        let response = self
            .http
            .get(format!("{}/posts/{}/metrics", self.base_url, platform_post_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Platform { status: 0, message: e.to_string() })?;

        let json = self.handle_response(response).await?;
        let number = |key: &str| json.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);

        Ok(PlatformMetrics {
            views: number("views"),
            likes: number("likes"),
            comments: number("comments"),
            shares: number("shares"),
            synthetic: false,
        })
    }

    async fn refresh_token(&self, credentials: &OAuthCredentials) -> Result<OAuthCredentials> {
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::Unauthorized("No refresh token".into()))?;

        let response = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(|e| Error::Platform { status: 0, message: e.to_string() })?;

        let json = self.handle_response(response).await?;
        let access_token = json
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Unauthorized("refresh response missing access_token".into()))?
            .to_string();
        let expires_in = json.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600);

        Ok(OAuthCredentials {
            access_token: Some(access_token),
            // Some platforms rotate the refresh token on use
            refresh_token: json
                .get("refresh_token")
                .and_then(|v| v.as_str())
                .map(String::from)
                .or_else(|| credentials.refresh_token.clone()),
            token_expires_at: Some(chrono::Utc::now() + chrono::Duration::seconds(expires_in)),
        })
    }
}
