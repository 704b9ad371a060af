//! Generation webhook client (e.g. an n8n workflow ending in "Respond to Webhook").
//! One POST per question; the reply is normalized from whichever JSON shape the workflow returns.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::WebhookConfig;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reply fields probed in order; the first one holding a non-empty string wins.
const REPLY_FIELDS: &[&[&str]] = &[
    &["response"],
    &["data", "reply"],
    &["message"],
    &["output"],
    &["content"],
];

/// Webhook payload: `{ message, user_id, conversation_id, timestamp }`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    #[serde(rename = "message")]
    pub user_text: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl GenerationRequest {
    pub fn new(
        user_text: impl Into<String>,
        user_id: Option<String>,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            user_text: user_text.into(),
            user_id,
            conversation_id,
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation webhook timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation webhook returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("generation webhook request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl GenerationError {
    fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout(timeout)
        } else {
            GenerationError::Request(e)
        }
    }
}

/// A generation backend. `Ok(None)` means it answered but no reply text could be extracted.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>, GenerationError>;
}

/// HTTP webhook backend.
#[derive(Clone)]
pub struct WebhookClient {
    url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
            client,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &WebhookConfig) -> Self {
        Self::new(
            client,
            config.url.clone().unwrap_or_default(),
            config.api_key.clone(),
            Some(config.timeout()),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl GenerationBackend for WebhookClient {
    /// POST the request; only HTTP 200 counts as an answer.
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>, GenerationError> {
        log::info!("calling generation webhook: {}", self.url);
        log::debug!("webhook payload: {:?}", request);
        let mut req = self.client.post(&self.url).timeout(self.timeout).json(request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req
            .send()
            .await
            .map_err(|e| GenerationError::from_reqwest(e, self.timeout))?;
        let status = res.status();
        if status != reqwest::StatusCode::OK {
            let body = res.text().await.unwrap_or_default();
            log::error!("generation webhook failed: HTTP {}, {}", status, body);
            return Err(GenerationError::Status { status, body });
        }
        let body = res
            .text()
            .await
            .map_err(|e| GenerationError::from_reqwest(e, self.timeout))?;
        let value: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(_) => {
                log::warn!("generation webhook returned a non-JSON body: {}", body);
                return Ok(None);
            }
        };
        log::debug!("generation webhook raw response: {}", value);
        let reply = extract_reply(&value);
        if reply.is_none() {
            log::warn!("unrecognized generation webhook response: {}", value);
        }
        Ok(reply)
    }
}

/// Pull reply text out of a webhook response.
///
/// A non-empty array is replaced by its first element. An object is probed for `response`,
/// `data.reply`, `message`, `output`, `content` in that order; a bare string is the reply itself.
/// Anything else, including empty strings, yields `None`.
pub fn extract_reply(value: &Value) -> Option<String> {
    let value = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let reply = match value {
        Value::Object(_) => REPLY_FIELDS.iter().find_map(|path| {
            path.iter()
                .try_fold(value, |v, key| v.get(key))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        }),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    };
    reply.filter(|s| !s.is_empty()).map(str::to_string)
}
