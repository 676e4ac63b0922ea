use ai_gateway_core::types::{Message, StreamChunk, UnifiedRequest};
use ai_gateway_core::{Error, StreamError};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::mock_server::{stalled_backend, MockServerFixture, CHAT_PATH};

async fn collect(rx: mpsc::Receiver<StreamChunk>) -> Vec<StreamChunk> {
    ReceiverStream::new(rx).collect().await
}

fn request() -> UnifiedRequest {
    UnifiedRequest::new("gpt-4", vec![Message::user("Say hello")])
        .with_metadata("conversation_id", serde_json::json!("conv-stream"))
}

#[tokio::test]
async fn test_gateway_sse_stream_end_to_end() {
    let mut fx = MockServerFixture::new().await;
    let mock = fx
        .mock_sse_stream(
            CHAT_PATH,
            &[
                r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
                r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
                "not-json",
                r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
                "[DONE]",
            ],
        )
        .await;

    let bound = fx.gateway.bind(fx.gateway_deployment("openai:gpt-4")).unwrap();
    let rx = bound.stream(&CancellationToken::new(), &request()).await.unwrap();
    let chunks = collect(rx).await;
    mock.assert_async().await;

    let texts: Vec<_> = chunks.iter().filter_map(|c| c.as_data()).collect();
    assert_eq!(texts, ["Hel", "lo"]);
    assert_eq!(chunks.len(), 3);
    assert!(matches!(chunks[2], StreamChunk::Done));

    let records = fx.audit.records_for_conversation("conv-stream");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].output, "Hello");
    assert!(records[0].error.is_none());
}

#[tokio::test]
async fn test_direct_raw_json_stream_forwards_values() {
    let mut fx = MockServerFixture::new().await;
    let path = "/api/chat";
    let _mock = fx
        .mock_ndjson_stream(
            path,
            &[
                r#"{"message":{"content":"a"},"done":false}"#,
                r#"{"message":{"content":"b"},"done":true}"#,
            ],
        )
        .await;

    let bound = fx.gateway.bind(fx.direct_deployment("local", path)).unwrap();
    let rx = bound.stream(&CancellationToken::new(), &request()).await.unwrap();
    let chunks = collect(rx).await;

    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks[0].as_data(),
        Some(r#"{"message":{"content":"a"},"done":false}"#)
    );
    assert_eq!(
        chunks[1].as_data(),
        Some(r#"{"message":{"content":"b"},"done":true}"#)
    );
    assert!(matches!(chunks[2], StreamChunk::Done));
}

#[tokio::test]
async fn test_stream_non_success_status_is_single_terminal_chunk() {
    let mut fx = MockServerFixture::new().await;
    let _mock = fx.mock_json_response(CHAT_PATH, 503, "overloaded").await;

    let bound = fx.gateway.bind(fx.gateway_deployment("gpt-4")).unwrap();
    let rx = bound.stream(&CancellationToken::new(), &request()).await.unwrap();
    let chunks = collect(rx).await;

    assert_eq!(chunks.len(), 1);
    match &chunks[0] {
        StreamChunk::Error(StreamError::UpstreamStatus { status, body }) => {
            assert_eq!(*status, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("unexpected chunk: {:?}", other),
    }
    assert_eq!(fx.audit.records().len(), 1);
}

#[tokio::test]
async fn test_stream_fails_before_first_byte_on_connect_error() {
    let fx = MockServerFixture::new().await;
    let dep = std::sync::Arc::new(ai_gateway_core::Deployment::new(
        "unreachable",
        ai_gateway_core::ProviderKind::Direct,
        "m",
        ai_gateway_core::Endpoint::new("http://127.0.0.1:1/api/chat"),
    ));
    let bound = fx.gateway.bind(dep).unwrap();
    let err = bound
        .stream(&CancellationToken::new(), &request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    let records = fx.audit.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].error.is_some());
}

#[tokio::test]
async fn test_cancel_mid_stream_with_audit_relay() {
    let fx = MockServerFixture::new().await;
    let base_url = stalled_backend(
        b"HTTP/1.1 200 OK\r\n\
content-type: text/event-stream\r\n\
transfer-encoding: chunked\r\n\
\r\n\
35\r\n\
data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n\r\n",
    )
    .await;
    let dep = std::sync::Arc::new(ai_gateway_core::Deployment::new(
        "stalling",
        ai_gateway_core::ProviderKind::Gateway,
        "openai:gpt-4",
        ai_gateway_core::Endpoint::new(base_url),
    ));
    let bound = fx.gateway.bind(dep).unwrap();
    let cancel = CancellationToken::new();
    let mut rx = bound.stream(&cancel, &request()).await.unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.as_data(), Some("partial"));

    cancel.cancel();
    let terminal = rx.recv().await;
    assert!(
        matches!(terminal, Some(StreamChunk::Error(StreamError::Cancelled))),
        "unexpected terminal chunk: {:?}",
        terminal
    );
    assert!(rx.recv().await.is_none());

    let records = fx.audit.records_for_conversation("conv-stream");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].output, "partial");
    assert!(records[0].error.is_some());
}
