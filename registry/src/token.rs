//! OAuth2 client-credentials tokens for the registry API.
//!
//! The provider owns its refresh lifecycle: a token is cached together with
//! its expiry and handed out until shortly before it lapses. Refresh runs
//! under the cache lock, so concurrent callers wait on the in-flight refresh
//! instead of issuing duplicates.

use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);
/// Assumed lifetime when the token endpoint omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(thiserror::Error, Debug)]
pub enum TokenError {
    #[error("token request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl TokenError {
    /// Whether the failure points at bad credentials rather than a flaky
    /// endpoint.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, TokenError::Status { status: 401 | 403, .. })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct TokenProvider {
    client: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(
        client: reqwest::Client,
        token_url: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        TokenProvider {
            client,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid access token, refreshing it when the cached one is
    /// absent or about to expire.
    pub async fn access_token(&self) -> Result<String, TokenError> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref()
            && Instant::now() + EXPIRY_MARGIN < entry.expires_at
        {
            return Ok(entry.token.clone());
        }

        tracing::debug!(endpoint = %self.token_url, "Refreshing registry token");
        let fresh = self.refresh().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn refresh(&self) -> Result<CachedToken, TokenError> {
        let response = self
            .client
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TokenError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);

        Ok(CachedToken {
            token: body.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}
