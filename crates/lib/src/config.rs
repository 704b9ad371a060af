//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.dingbridge/config.json`), then environment
//! variables override individual fields. The binary also loads a `.env` file before this runs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Callback server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// DingTalk app credentials, robot and card settings.
    #[serde(default)]
    pub dingtalk: DingTalkConfig,

    /// Generation webhook (e.g. n8n) settings.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Reply presentation.
    #[serde(default)]
    pub bot: BotConfig,
}

/// Callback server bind, port and shutdown settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the HTTP callback endpoint (default 15151).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Seconds in-flight replies may keep running after a shutdown signal (default 10).
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_gateway_port() -> u16 {
    15151
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// DingTalk app config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DingTalkConfig {
    /// AppKey. Overridden by DINGTALK_CLIENT_ID.
    pub client_id: Option<String>,
    /// AppSecret. Overridden by DINGTALK_CLIENT_SECRET.
    pub client_secret: Option<String>,
    /// Robot code used for group sends and card delivery. Overridden by DINGTALK_ROBOT_CODE.
    pub robot_code: Option<String>,
    /// AI card template id. When set, replies stream into a card; otherwise a markdown message is sent.
    /// Overridden by DINGTALK_AI_CARD_TEMPLATE_ID.
    pub card_template_id: Option<String>,
    /// Card variable that receives the reply text (default "content").
    #[serde(default = "default_card_content_key")]
    pub card_content_key: String,
    /// OpenAPI base URL (default https://api.dingtalk.com). Only changed for tests or proxies.
    pub api_base: Option<String>,
}

fn default_card_content_key() -> String {
    "content".to_string()
}

impl Default for DingTalkConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            robot_code: None,
            card_template_id: None,
            card_content_key: default_card_content_key(),
            api_base: None,
        }
    }
}

/// Generation webhook config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Webhook URL. Overridden by N8N_WEBHOOK_URL.
    pub url: Option<String>,
    /// Optional bearer key. Overridden by N8N_API_KEY.
    pub api_key: Option<String>,
    /// Deadline for one generation call in seconds (default 30). Overridden by N8N_WEBHOOK_TIMEOUT.
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout_secs() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Reply presentation config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Name shown in markdown reply titles. Overridden by BOT_NAME.
    #[serde(default = "default_bot_name")]
    pub name: String,
    /// Maximum markdown content length in characters (default 2000). Overridden by MAX_MESSAGE_LENGTH.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

fn default_bot_name() -> String {
    "AI助手".to_string()
}

fn default_max_message_length() -> usize {
    2000
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            max_message_length: default_max_message_length(),
        }
    }
}

/// Required fields as (config key, env var).
const REQUIRED_FIELDS: [(&str, &str); 4] = [
    ("dingtalk.clientId", "DINGTALK_CLIENT_ID"),
    ("dingtalk.clientSecret", "DINGTALK_CLIENT_SECRET"),
    ("dingtalk.robotCode", "DINGTALK_ROBOT_CODE"),
    ("webhook.url", "N8N_WEBHOOK_URL"),
];

impl Config {
    /// Apply overrides from a variable lookup (the process environment in production).
    /// Empty values are ignored; unparsable numbers are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| {
            lookup(name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        if let Some(v) = get("DINGTALK_CLIENT_ID") {
            self.dingtalk.client_id = Some(v);
        }
        if let Some(v) = get("DINGTALK_CLIENT_SECRET") {
            self.dingtalk.client_secret = Some(v);
        }
        if let Some(v) = get("DINGTALK_ROBOT_CODE") {
            self.dingtalk.robot_code = Some(v);
        }
        if let Some(v) = get("DINGTALK_AI_CARD_TEMPLATE_ID") {
            self.dingtalk.card_template_id = Some(v);
        }
        if let Some(v) = get("N8N_WEBHOOK_URL") {
            self.webhook.url = Some(v);
        }
        if let Some(v) = get("N8N_API_KEY") {
            self.webhook.api_key = Some(v);
        }
        if let Some(v) = get("N8N_WEBHOOK_TIMEOUT") {
            match v.parse() {
                Ok(secs) => self.webhook.timeout_secs = secs,
                Err(_) => log::warn!("ignoring invalid N8N_WEBHOOK_TIMEOUT: {}", v),
            }
        }
        if let Some(v) = get("BOT_NAME") {
            self.bot.name = v;
        }
        if let Some(v) = get("MAX_MESSAGE_LENGTH") {
            match v.parse() {
                Ok(n) => self.bot.max_message_length = n,
                Err(_) => log::warn!("ignoring invalid MAX_MESSAGE_LENGTH: {}", v),
            }
        }
    }

    /// Check that every required field is set; the error lists all missing ones.
    pub fn validate(&self) -> Result<()> {
        let values = [
            &self.dingtalk.client_id,
            &self.dingtalk.client_secret,
            &self.dingtalk.robot_code,
            &self.webhook.url,
        ];
        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .zip(values)
            .filter(|(_, v)| v.as_deref().map(str::trim).unwrap_or("").is_empty())
            .map(|((key, env), _)| format!("{} ({})", key, env))
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("missing required configuration: {}", missing.join(", "));
        }
        Ok(())
    }

    /// Card template id when card delivery is enabled.
    pub fn card_template_id(&self) -> Option<&str> {
        self.dingtalk
            .card_template_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("DINGBRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".dingbridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or DINGBRIDGE_CONFIG_PATH / default) and apply environment overrides.
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config.apply_overrides(|name| std::env::var(name).ok());
    Ok((config, path))
}
