use ai_gateway_core::types::{Message, UnifiedRequest};
use ai_gateway_core::Error;
use mockito::Matcher;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::mock_server::{MockServerFixture, CHAT_PATH, COMPLETION_BODY};

#[tokio::test]
async fn test_gateway_completion_round_trip() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .server
        .mock("POST", CHAT_PATH)
        .match_header("authorization", "Bearer sk-test")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(
            json!({ "model": "gpt-4", "stream": false }),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(COMPLETION_BODY)
        .create_async()
        .await;

    let bound = fx.gateway.bind(fx.gateway_deployment("openai:gpt-4")).unwrap();
    let req = UnifiedRequest::new("gpt-4", vec![Message::user("Hi there")])
        .with_metadata("conversation_id", json!("conv-42"))
        .with_metadata("provider", json!("caller-value"));

    let resp = bound.complete(&CancellationToken::new(), &req).await.unwrap();
    mock.assert_async().await;

    assert_eq!(resp.content(), Some("Hello"));
    assert_eq!(resp.usage.unwrap().total_tokens, 10);
    assert_eq!(resp.metadata["deployment_id"], "gw-test");
    assert_eq!(resp.metadata["gateway_routed"], true);
    assert_eq!(resp.metadata["upstream_provider"], "openai");
    // Caller-set keys win over adapter keys.
    assert_eq!(resp.metadata["provider"], "caller-value");

    let records = fx.audit.records_for_conversation("conv-42");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].input, "Hi there");
    assert_eq!(records[0].output, "Hello");
    assert_eq!(records[0].input_tokens, 9);
    assert_eq!(records[0].output_tokens, 1);
    assert_eq!(records[0].provider_name, "gateway");
    assert!(records[0].error.is_none());
}

#[tokio::test]
async fn test_unset_sampling_parameters_are_omitted_on_the_wire() {
    let mut fx = MockServerFixture::new().await;
    let path = "/api/chat";
    let mock = fx
        .server
        .mock("POST", path)
        .match_body(Matcher::Json(json!({
            "model": "llama3:8b",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        })))
        .with_status(200)
        .with_body(COMPLETION_BODY)
        .create_async()
        .await;

    let bound = fx.gateway.bind(fx.direct_deployment("local", path)).unwrap();
    let req = UnifiedRequest::new("ignored", vec![Message::user("hi")]);
    bound.complete(&CancellationToken::new(), &req).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_non_success_status_is_reported_with_code() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .mock_json_response(CHAT_PATH, 429, r#"{"error":{"message":"rate limited"}}"#)
        .await;

    let bound = fx.gateway.bind(fx.gateway_deployment("gpt-4")).unwrap();
    let req = UnifiedRequest::new("gpt-4", vec![Message::user("hi")]);
    let err = bound
        .complete(&CancellationToken::new(), &req)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(429));
    assert!(err.is_retryable());
    let records = fx.audit.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].error.as_deref().unwrap().contains("429"));
}

#[tokio::test]
async fn test_schema_mismatch_is_decoding_error() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx
        .mock_json_response(CHAT_PATH, 200, r#"{"unexpected": true}"#)
        .await;

    let bound = fx.gateway.bind(fx.gateway_deployment("gpt-4")).unwrap();
    let req = UnifiedRequest::new("gpt-4", vec![Message::user("hi")]);
    let err = bound
        .complete(&CancellationToken::new(), &req)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Decoding { .. }));
}

#[tokio::test]
async fn test_cancelled_before_send() {
    let fx = MockServerFixture::new().await;
    let bound = fx.gateway.bind(fx.gateway_deployment("gpt-4")).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let req = UnifiedRequest::new("gpt-4", vec![Message::user("hi")]);
    let err = bound.complete(&cancel, &req).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn test_connection_failure_is_transport_error() {
    let fx = MockServerFixture::new().await;
    let dep = std::sync::Arc::new(ai_gateway_core::Deployment::new(
        "unreachable",
        ai_gateway_core::ProviderKind::Direct,
        "m",
        ai_gateway_core::Endpoint::new("http://127.0.0.1:1/v1/chat/completions"),
    ));
    let bound = fx.gateway.bind(dep).unwrap();
    let req = UnifiedRequest::new("m", vec![Message::user("hi")]);
    let err = bound
        .complete(&CancellationToken::new(), &req)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}
