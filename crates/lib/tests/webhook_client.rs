//! Integration tests: generation webhook client and token exchange over real HTTP.

mod common;

use common::*;
use lib::channels::{DingTalkTokenExchange, TokenCache};
use lib::llm::{GenerationBackend, GenerationError, GenerationRequest, WebhookClient};
use std::sync::Arc;
use std::time::Duration;

fn request(text: &str) -> GenerationRequest {
    GenerationRequest::new(text, Some("u-1".to_string()), Some("c-1".to_string()))
}

#[tokio::test]
async fn webhook_reply_is_extracted_and_key_sent() {
    let recorder = Arc::new(Recorder::default());
    let url = fake_webhook(recorder.clone()).await;
    let client = WebhookClient::new(reqwest::Client::new(), url, Some("k".to_string()), None);

    let reply = client.generate(&request("天气")).await.unwrap();
    assert_eq!(reply.as_deref(), Some("答：天气。好的"));

    let calls = recorder.on(HOOK_PATH);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].authorization.as_deref(), Some("Bearer k"));
    assert_eq!(calls[0].body["message"], "天气");
    assert_eq!(calls[0].body["user_id"], "u-1");
    assert_eq!(calls[0].body["conversation_id"], "c-1");
    assert!(calls[0].body["timestamp"].is_f64());
}

#[tokio::test]
async fn blank_api_key_sends_no_authorization() {
    let recorder = Arc::new(Recorder::default());
    let url = fake_webhook(recorder.clone()).await;
    let client = WebhookClient::new(reqwest::Client::new(), url, Some("  ".to_string()), None);
    client.generate(&request("hi")).await.unwrap();
    assert_eq!(recorder.on(HOOK_PATH)[0].authorization, None);
}

#[tokio::test]
async fn server_error_is_a_status_error() {
    let recorder = Arc::new(Recorder::default());
    let url = fake_webhook(recorder).await;
    let client = WebhookClient::new(reqwest::Client::new(), url, None, None);
    match client.generate(&request("broken")).await {
        Err(GenerationError::Status { status, body }) => {
            assert_eq!(status.as_u16(), 500);
            assert!(body.contains("workflow failed"));
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn slow_webhook_is_a_timeout() {
    let recorder = Arc::new(Recorder::default());
    let url = fake_webhook(recorder).await;
    let client = WebhookClient::new(
        reqwest::Client::new(),
        url,
        None,
        Some(Duration::from_millis(300)),
    );
    let err = client.generate(&request("slow")).await.unwrap_err();
    assert!(
        matches!(err, GenerationError::Timeout(d) if d == Duration::from_millis(300)),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn unreachable_webhook_is_a_request_error() {
    let url = format!("http://127.0.0.1:{}/hook", free_port());
    let client = WebhookClient::new(reqwest::Client::new(), url, None, None);
    let err = client.generate(&request("hi")).await.unwrap_err();
    assert!(matches!(err, GenerationError::Request(_)), "{:?}", err);
}

#[tokio::test]
async fn token_exchange_against_fake_openapi() {
    let recorder = Arc::new(Recorder::default());
    let base = fake_dingtalk(recorder.clone()).await;
    let exchange =
        DingTalkTokenExchange::new(reqwest::Client::new(), Some(format!("{}/", base)), "key", "secret");
    let cache = TokenCache::new(Arc::new(exchange));

    assert_eq!(cache.get_token().await.unwrap(), "t-1");
    assert_eq!(cache.get_token().await.unwrap(), "t-1");
    let calls = recorder.on(TOKEN_PATH);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body["appKey"], "key");
    assert_eq!(calls[0].body["appSecret"], "secret");
}
