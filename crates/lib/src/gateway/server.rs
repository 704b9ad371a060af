//! Callback HTTP server: receives chatbot events and hands them to the dispatcher.

use crate::channels::{DingTalkClient, DingTalkTokenExchange, ReplyFormat, TokenCache};
use crate::config::Config;
use crate::gateway::dispatch::{DeliveryMode, Dispatcher};
use crate::gateway::protocol::Ack;
use crate::llm::{GenerationClient, WebhookClient};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub dispatcher: Dispatcher,
}

/// Wire the token cache, generation client and DingTalk delivery into a dispatcher.
/// Cards are used when a card template is configured; markdown otherwise.
pub fn build_dispatcher(config: &Config, client: reqwest::Client) -> Dispatcher {
    let exchange = DingTalkTokenExchange::from_config(client.clone(), &config.dingtalk);
    let tokens = Arc::new(TokenCache::new(Arc::new(exchange)));
    let webhook = WebhookClient::from_config(client.clone(), &config.webhook);
    let generation = GenerationClient::new(Arc::new(webhook), config.webhook.timeout());
    let outbound = Arc::new(DingTalkClient::from_config(client, &config.dingtalk));
    let mode = match config.card_template_id() {
        Some(template_id) => DeliveryMode::Card {
            template_id: template_id.to_string(),
            content_key: config.dingtalk.card_content_key.clone(),
        },
        None => DeliveryMode::Markdown,
    };
    Dispatcher::new(tokens, generation, outbound, ReplyFormat::from(&config.bot), mode)
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/dingtalk/callback", post(dingtalk_callback))
        .with_state(state)
}

/// Validate config, serve callbacks until SIGINT/SIGTERM, then give in-flight replies
/// `gateway.shutdownGraceSecs` to finish.
pub async fn run_gateway(config: Config) -> Result<()> {
    config.validate()?;
    let client = reqwest::Client::new();
    let dispatcher = build_dispatcher(&config, client);
    match config.card_template_id() {
        Some(t) => log::info!("replies stream into AI card template {}", t),
        None => log::info!("replies are sent as markdown messages"),
    }

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let grace = config.gateway.shutdown_grace();
    let state = GatewayState {
        config: Arc::new(config),
        dispatcher: dispatcher.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;

    if !dispatcher.drain(grace).await {
        log::warn!("{} replies abandoned at shutdown", dispatcher.in_flight());
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, no longer accepting callbacks");
}

/// POST /dingtalk/callback: chatbot event JSON in, OK ack out. A body that is not JSON is
/// still acknowledged so the platform does not redeliver it.
async fn dingtalk_callback(State(state): State<GatewayState>, body: Bytes) -> Json<Ack> {
    let data: serde_json::Value = serde_json::from_slice(&body).unwrap_or_else(|e| {
        log::warn!("callback body is not JSON: {}", e);
        serde_json::Value::Null
    });
    Json(state.dispatcher.handle(&data).await)
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "inFlight": state.dispatcher.in_flight(),
    }))
}
