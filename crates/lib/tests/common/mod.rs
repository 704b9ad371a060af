//! Local stand-ins for the DingTalk OpenAPI and the generation webhook.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{post, put},
    Json, Router,
};
use lib::config::Config;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// One request seen by a fake server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub token: Option<String>,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Default)]
pub struct Recorder {
    requests: Mutex<Vec<Recorded>>,
}

impl Recorder {
    fn record(&self, path: &str, headers: &HeaderMap, body: Value) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.requests.lock().unwrap().push(Recorded {
            path: path.to_string(),
            token: header("x-acs-dingtalk-access-token"),
            authorization: header("authorization"),
            body,
        });
    }

    pub fn all(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn on(&self, path: &str) -> Vec<Recorded> {
        self.all().into_iter().filter(|r| r.path == path).collect()
    }

    /// Poll until `done` holds for the recorded requests, or fail after 5s.
    pub async fn wait_for(&self, what: &str, done: impl Fn(&[Recorded]) -> bool) -> Vec<Recorded> {
        for _ in 0..100 {
            let all = self.all();
            if done(&all) {
                return all;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {}; recorded: {:#?}", what, self.all());
    }
}

pub const TOKEN_PATH: &str = "/v1.0/oauth2/accessToken";
pub const GROUP_SEND_PATH: &str = "/v1.0/robot/groupMessages/send";
pub const CARD_CREATE_PATH: &str = "/v1.0/card/instances/createAndDeliver";
pub const CARD_STREAM_PATH: &str = "/v1.0/card/streaming";
pub const HOOK_PATH: &str = "/hook";

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake server");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

/// Fake DingTalk OpenAPI issuing token `t-1`. Returns its base URL.
pub async fn fake_dingtalk(recorder: Arc<Recorder>) -> String {
    async fn token(
        State(rec): State<Arc<Recorder>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        rec.record(TOKEN_PATH, &headers, body);
        Json(json!({ "accessToken": "t-1", "expireIn": 7200 }))
    }
    async fn group_send(
        State(rec): State<Arc<Recorder>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        rec.record(GROUP_SEND_PATH, &headers, body);
        Json(json!({ "processQueryKey": "q-1" }))
    }
    async fn card_create(
        State(rec): State<Arc<Recorder>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        rec.record(CARD_CREATE_PATH, &headers, body);
        Json(json!({ "success": true }))
    }
    async fn card_stream(
        State(rec): State<Arc<Recorder>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        rec.record(CARD_STREAM_PATH, &headers, body);
        Json(json!({ "success": true }))
    }

    let app = Router::new()
        .route(TOKEN_PATH, post(token))
        .route(GROUP_SEND_PATH, post(group_send))
        .route(CARD_CREATE_PATH, post(card_create))
        .route(CARD_STREAM_PATH, put(card_stream))
        .with_state(recorder);
    serve(app).await
}

/// Fake generation webhook. Answers `{"response": "答：<message>。好的"}`; a message of
/// `"slow"` is answered after 3s and `"broken"` gets HTTP 500. Returns the webhook URL.
pub async fn fake_webhook(recorder: Arc<Recorder>) -> String {
    async fn hook(
        State(rec): State<Arc<Recorder>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (axum::http::StatusCode, Json<Value>) {
        let message = body["message"].as_str().unwrap_or_default().to_string();
        rec.record(HOOK_PATH, &headers, body);
        match message.as_str() {
            "broken" => (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "workflow failed" })),
            ),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(3)).await;
                (axum::http::StatusCode::OK, Json(json!({ "response": "终于。" })))
            }
            _ => (
                axum::http::StatusCode::OK,
                Json(json!({ "response": format!("答：{}。好的", message) })),
            ),
        }
    }

    let app = Router::new().route(HOOK_PATH, post(hook)).with_state(recorder);
    format!("{}{}", serve(app).await, HOOK_PATH)
}

/// Complete config pointing at the fakes, on a free gateway port.
pub fn config_for(dingtalk_base: &str, webhook_url: &str) -> Config {
    let mut config = Config::default();
    config.gateway.port = free_port();
    config.gateway.bind = "127.0.0.1".to_string();
    config.gateway.shutdown_grace_secs = 1;
    config.dingtalk.client_id = Some("app-key".to_string());
    config.dingtalk.client_secret = Some("app-secret".to_string());
    config.dingtalk.robot_code = Some("robot-1".to_string());
    config.dingtalk.api_base = Some(dingtalk_base.to_string());
    config.webhook.url = Some(webhook_url.to_string());
    config.webhook.api_key = Some("hook-key".to_string());
    config
}

/// Spawn the gateway and wait until GET / answers. Returns the gateway base URL.
/// The server task is left running when the test ends.
pub async fn start_gateway(config: Config) -> String {
    let base = format!("http://127.0.0.1:{}", config.gateway.port);
    tokio::spawn(async move {
        if let Err(e) = lib::gateway::run_gateway(config).await {
            panic!("gateway exited: {:#}", e);
        }
    });
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{}/", base)).send().await {
            if resp.status().is_success() {
                return base;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway at {} did not come up within 5s", base);
}

pub fn text_event(conversation_id: &str, conversation_type: &str, content: &str) -> Value {
    json!({
        "msgtype": "text",
        "text": { "content": content },
        "senderStaffId": "staff-1",
        "senderNick": "小王",
        "conversationId": conversation_id,
        "conversationType": conversation_type,
        "msgId": "msg-1",
        "robotCode": "robot-1",
    })
}
