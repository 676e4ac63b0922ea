//! Mock HTTP server setup for integration tests

use ai_gateway_core::audit::InMemoryAuditSink;
use ai_gateway_core::client::Gateway;
use ai_gateway_core::deployment::{Auth, Deployment, Endpoint, ProviderKind};
use ai_gateway_core::transport::TransportConfig;
use mockito::{Matcher, Mock, Server, ServerGuard};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const CHAT_PATH: &str = "/v1/chat/completions";

pub const COMPLETION_BODY: &str = r#"{
  "id": "chatcmpl-1",
  "created": 1700000000,
  "model": "gpt-4",
  "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello"}, "finish_reason": "stop"}],
  "usage": {"prompt_tokens": 9, "completion_tokens": 1, "total_tokens": 10}
}"#;

/// Test fixture that owns a mock server and a gateway with an in-memory audit sink.
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
    pub audit: Arc<InMemoryAuditSink>,
    pub gateway: Gateway,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        let audit = Arc::new(InMemoryAuditSink::new(64));
        let gateway = Gateway::builder()
            .transport_config(TransportConfig::default())
            .audit_sink(audit.clone())
            .build()
            .expect("gateway builds");
        Self {
            server,
            base_url,
            audit,
            gateway,
        }
    }

    /// Gateway-style deployment rooted at the mock server.
    pub fn gateway_deployment(&self, model: &str) -> Arc<Deployment> {
        Arc::new(
            Deployment::new(
                "gw-test",
                ProviderKind::Gateway,
                model,
                Endpoint::new(self.base_url.clone()).with_auth(Auth::bearer("sk-test")),
            )
            .with_family("gpt-4"),
        )
    }

    /// Direct deployment pointing at `path` on the mock server.
    pub fn direct_deployment(&self, id: &str, path: &str) -> Arc<Deployment> {
        Arc::new(Deployment::new(
            id,
            ProviderKind::Direct,
            "llama3:8b",
            Endpoint::new(format!("{}{}", self.base_url, path)),
        ))
    }

    /// JSON response on `path`.
    pub async fn mock_json_response(&mut self, path: &str, status: usize, body: &str) -> Mock {
        self.server
            .mock("POST", path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    /// SSE body built from `data: ` payloads, one event per payload.
    pub async fn mock_sse_stream(&mut self, path: &str, payloads: &[&str]) -> Mock {
        let body: String = payloads
            .iter()
            .map(|p| format!("data: {}\n\n", p))
            .collect();
        self.server
            .mock("POST", path)
            .match_header("accept", "text/event-stream")
            .match_body(Matcher::PartialJson(serde_json::json!({ "stream": true })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await
    }

    /// Line-delimited raw JSON body.
    pub async fn mock_ndjson_stream(&mut self, path: &str, lines: &[&str]) -> Mock {
        let body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        self.server
            .mock("POST", path)
            .match_header("accept", "application/x-ndjson")
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body(body)
            .create_async()
            .await
    }
}

/// Backend that accepts connections, writes `preamble` once and then never
/// answers again. Returns its `http://host:port` base URL.
pub async fn stalled_backend(preamble: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stalled backend");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            if !preamble.is_empty() {
                let _ = socket.write_all(preamble).await;
                let _ = socket.flush().await;
            }
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}
