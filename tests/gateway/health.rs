use ai_gateway_core::{Deployment, Endpoint, Error, ProviderKind};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::mock_server::{stalled_backend, MockServerFixture, CHAT_PATH, COMPLETION_BODY};

#[tokio::test]
async fn test_health_check_reports_500() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .mock_json_response(CHAT_PATH, 500, r#"{"error":"boom"}"#)
        .await;

    let bound = fx.gateway.bind(fx.gateway_deployment("openai:gpt-4")).unwrap();
    let err = bound.health_check(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::UpstreamStatus { status: 500, .. }));
    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_health_check_sends_minimal_request() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .server
        .mock("POST", CHAT_PATH)
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4",
            "max_tokens": 5,
            "stream": false
        })))
        .with_status(200)
        .with_body(COMPLETION_BODY)
        .create_async()
        .await;

    let bound = fx.gateway.bind(fx.gateway_deployment("openai:gpt-4")).unwrap();
    bound.health_check(&CancellationToken::new()).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_health_check_all_keeps_order_and_isolates_failures() {
    let mut fx = MockServerFixture::new().await;
    let _ok = fx.mock_json_response("/good", 200, COMPLETION_BODY).await;
    let _bad = fx.mock_json_response("/bad", 503, "unavailable").await;

    let deployments = vec![
        fx.direct_deployment("good", "/good"),
        fx.direct_deployment("bad", "/bad"),
    ];
    let reports = fx
        .gateway
        .health_check_all(&CancellationToken::new(), &deployments)
        .await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].deployment_id, "good");
    assert!(reports[0].is_healthy());
    assert_eq!(reports[1].deployment_id, "bad");
    assert_eq!(
        reports[1].result.as_ref().unwrap_err().status(),
        Some(503)
    );
}

#[tokio::test]
async fn test_health_check_honours_caller_cancellation() {
    let fx = MockServerFixture::new().await;
    let bound = fx.gateway.bind(fx.gateway_deployment("gpt-4")).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = bound.health_check(&cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn test_health_check_times_out_on_silent_backend() {
    let fx = MockServerFixture::new().await;
    let base_url = stalled_backend(b"").await;
    let dep = Arc::new(Deployment::new(
        "silent",
        ProviderKind::Direct,
        "llama3:8b",
        Endpoint::new(format!("{}/api/chat", base_url)),
    ));
    let bound = fx.gateway.bind(dep).unwrap();

    let started = Instant::now();
    let err = bound.health_check(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }), "unexpected error: {:?}", err);
    assert!(err.is_retryable());
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(30));
}
