//! Access-token acquisition and pre-expiry refresh.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::ProviderConfig;
use crate::ports::Scheduler;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("authorization request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("authorization endpoint returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("invalid authorization response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("token lifetime {expires_in:?} is shorter than the refresh margin {margin:?}")]
    NegativeRefreshDelay { expires_in: Duration, margin: Duration },
}

#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, TokenError>;
}

/// Fixed token, for tests and tooling.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, TokenError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct AuthorizationResponse {
    #[serde(alias = "accessToken")]
    access_token: String,
    #[serde(alias = "expiresIn", deserialize_with = "deserialize_seconds")]
    expires_in: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(u64),
    Text(String),
}

fn deserialize_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Seconds::deserialize(deserializer)? {
        Seconds::Number(value) => Ok(value),
        Seconds::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

struct TokenState {
    client: Client,
    auth_url: String,
    username: String,
    password: String,
    refresh_margin: Duration,
    token: ArcSwapOption<String>,
    /// Serializes acquisitions so concurrent cold starts share one request and one refresh.
    acquiring: Mutex<()>,
    scheduler: Arc<dyn Scheduler>,
}

/// Holds the process-wide access token. Reads are lock-free; the only writer is the
/// acquisition path, run on cold start and by the scheduled refresh.
#[derive(Clone)]
pub struct TokenService {
    inner: Arc<TokenState>,
}

impl TokenService {
    pub fn new(
        client: Client,
        auth_url: String,
        username: String,
        password: String,
        refresh_margin: Duration,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            inner: Arc::new(TokenState {
                client,
                auth_url,
                username,
                password,
                refresh_margin,
                token: ArcSwapOption::empty(),
                acquiring: Mutex::new(()),
                scheduler,
            }),
        }
    }

    pub fn from_config(client: Client, config: &ProviderConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self::new(
            client,
            config.auth_url.clone(),
            config.username.clone(),
            config.password.clone(),
            config.token_refresh_margin,
            scheduler,
        )
    }

    pub fn cached_token(&self) -> Option<String> {
        self.inner.token.load_full().map(|token| token.as_ref().clone())
    }

    /// Fetches a fresh token, caches it and schedules one refresh ahead of expiry.
    pub async fn acquire(&self) -> Result<String, TokenError> {
        let _guard = self.inner.acquiring.lock().await;
        self.fetch().await
    }

    async fn fetch(&self) -> Result<String, TokenError> {
        let state = &self.inner;
        let response = state
            .client
            .get(&state.auth_url)
            .basic_auth(&state.username, Some(&state.password))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(TokenError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AuthorizationResponse = serde_json::from_str(&body)?;
        let expires_in = Duration::from_secs(parsed.expires_in);
        let refresh_after = if parsed.expires_in > 0 {
            let delay = expires_in.checked_sub(state.refresh_margin).ok_or(
                TokenError::NegativeRefreshDelay {
                    expires_in,
                    margin: state.refresh_margin,
                },
            )?;
            Some(delay)
        } else {
            None
        };

        state.token.store(Some(Arc::new(parsed.access_token.clone())));
        info!(expires_in_secs = parsed.expires_in, "Provider access token acquired");

        if let Some(delay) = refresh_after {
            state.scheduler.schedule(delay, self.clone().refresh_task());
        }

        Ok(parsed.access_token)
    }

    fn refresh_task(self) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Err(e) = self.acquire().await {
                // Drop the stale token so the next request reacquires synchronously.
                error!("Failed to refresh provider access token: {}", e);
                self.inner.token.store(None);
            }
        })
    }
}

#[async_trait]
impl AccessTokenSource for TokenService {
    async fn access_token(&self) -> Result<String, TokenError> {
        if let Some(token) = self.inner.token.load_full() {
            return Ok(token.as_ref().clone());
        }

        let _guard = self.inner.acquiring.lock().await;
        // Another caller may have filled the cache while we waited.
        if let Some(token) = self.inner.token.load_full() {
            return Ok(token.as_ref().clone());
        }
        self.fetch().await
    }
}
