//! DingTalk access token: exchange app credentials for a token and cache it until shortly before expiry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::DingTalkConfig;

pub(crate) const DINGTALK_API_BASE: &str = "https://api.dingtalk.com";

/// Tokens are treated as expired this long before their real expiry.
pub const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(200);

/// Lifetime assumed when the token response omits `expireIn`.
const DEFAULT_EXPIRE_IN: u64 = 7200;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token api error: {0}")]
    Api(String),
    #[error("token response has no accessToken")]
    MissingToken,
    #[error("token lifetime of {ttl}s leaves less than the {margin}s safety margin")]
    TooShortLived { ttl: u64, margin: u64 },
}

/// Token as returned by the identity backend.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expire_in: u64,
}

/// Identity backend: trades the app's static credentials for an access token.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self) -> Result<IssuedToken, TokenError>;
}

/// A cached access token.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub issued_at: Instant,
    pub ttl: Duration,
}

impl Credential {
    pub fn expires_at(&self) -> Instant {
        self.issued_at + self.ttl
    }

    /// Time left until the backend stops accepting the token.
    pub fn remaining(&self) -> Duration {
        self.expires_at().saturating_duration_since(Instant::now())
    }

    fn usable(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at()
    }
}

/// Process-wide token cache. Cache hits only take the read lock; a miss exchanges without holding
/// any lock, so concurrent misses may each refresh (last write wins).
pub struct TokenCache {
    exchange: Arc<dyn TokenExchange>,
    margin: Duration,
    cached: RwLock<Option<Credential>>,
}

impl TokenCache {
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self::with_margin(exchange, TOKEN_SAFETY_MARGIN)
    }

    pub fn with_margin(exchange: Arc<dyn TokenExchange>, margin: Duration) -> Self {
        Self {
            exchange,
            margin,
            cached: RwLock::new(None),
        }
    }

    /// Token with at least the safety margin of validity left, refreshing first when needed.
    pub async fn get_token(&self) -> Result<String, TokenError> {
        self.get_credential().await.map(|c| c.token)
    }

    /// Like [`get_token`](Self::get_token) but returns the whole credential.
    pub async fn get_credential(&self) -> Result<Credential, TokenError> {
        if let Some(credential) = self.cached() {
            log::debug!("using cached access token");
            return Ok(credential);
        }

        log::info!("fetching new access token");
        let requested_at = Instant::now();
        let issued = match self.exchange.exchange().await {
            Ok(issued) => issued,
            Err(e) => {
                log::error!("access token exchange failed: {}", e);
                return Err(e);
            }
        };
        // Lifetime counts from before the request, so exchange latency eats into the margin.
        let credential = Credential {
            token: issued.access_token,
            issued_at: requested_at,
            ttl: Duration::from_secs(issued.expire_in),
        };
        if !credential.usable(self.margin) {
            let err = TokenError::TooShortLived {
                ttl: issued.expire_in,
                margin: self.margin.as_secs(),
            };
            log::error!(
                "rejecting access token: {} ({:?} left after exchange)",
                err,
                credential.remaining()
            );
            return Err(err);
        }
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        log::info!("access token refreshed, valid for {}s", issued.expire_in);
        Ok(credential)
    }

    /// Drop the cached token so the next call exchanges again.
    pub fn clear(&self) {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = None;
        log::info!("access token cache cleared");
    }

    fn cached(&self) -> Option<Credential> {
        let guard = self.cached.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().filter(|c| c.usable(self.margin)).cloned()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenRequest<'a> {
    app_key: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    #[serde(default, rename = "accessToken", alias = "access_token")]
    access_token: Option<String>,
    #[serde(default, rename = "expireIn", alias = "expire_in")]
    expire_in: Option<u64>,
}

/// DingTalk OAuth2 app access token (`POST /v1.0/oauth2/accessToken`).
pub struct DingTalkTokenExchange {
    base_url: String,
    app_key: String,
    app_secret: String,
    client: reqwest::Client,
}

impl DingTalkTokenExchange {
    pub fn new(
        client: reqwest::Client,
        base_url: Option<String>,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DINGTALK_API_BASE.to_string());
        Self {
            base_url,
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            client,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &DingTalkConfig) -> Self {
        Self::new(
            client,
            config.api_base.clone(),
            config.client_id.clone().unwrap_or_default(),
            config.client_secret.clone().unwrap_or_default(),
        )
    }
}

#[async_trait]
impl TokenExchange for DingTalkTokenExchange {
    async fn exchange(&self) -> Result<IssuedToken, TokenError> {
        let url = format!("{}/v1.0/oauth2/accessToken", self.base_url);
        let body = AccessTokenRequest {
            app_key: &self.app_key,
            app_secret: &self.app_secret,
        };
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TokenError::Api(format!("{} {}", status, body)));
        }
        let data: AccessTokenResponse = res.json().await?;
        let access_token = data
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(TokenError::MissingToken)?;
        Ok(IssuedToken {
            access_token,
            expire_in: data.expire_in.unwrap_or(DEFAULT_EXPIRE_IN),
        })
    }
}
