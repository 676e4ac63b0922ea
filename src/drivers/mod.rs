//! Provider 驱动抽象层：通过 trait 实现多后端适配的动态分发
//!
//! Provider driver abstraction layer. Every backend adapter implements
//! [`ProviderDriver`]; the concrete driver is chosen once, when a deployment is
//! bound (see [`create_driver`]), and never re-evaluated per field.
//!
//! | Driver | Base URL | Wire model | Stream framing |
//! |--------|----------|------------|----------------|
//! | [`GatewayDriver`] | host root + `/v1/chat/completions` | strip `provider:` prefix | SSE + `[DONE]` |
//! | [`DirectDriver`] | complete endpoint, verbatim | unchanged | raw JSON values |

pub mod direct;
pub mod gateway;
pub(crate) mod wire;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deployment::{Deployment, ProviderKind};
use crate::pipeline::{self, ChunkEmitter, Framing, StreamError};
use crate::transport::{HttpTransport, TransportError};
use crate::types::{Message, StreamChunk, UnifiedRequest, UnifiedResponse};
use crate::{BoxStream, Error, ErrorContext, Result};

pub use direct::DirectDriver;
pub use gateway::GatewayDriver;

/// Fixed prompt used by health checks.
pub const HEALTH_CHECK_PROMPT: &str = "ping";
/// Completion budget for health checks.
pub const HEALTH_CHECK_MAX_TOKENS: u32 = 5;
/// Deadline for one health check, nested inside the caller's cancellation.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Fully resolved wire-level request. Scoped to one call.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    /// Structured JSON body; encoded at execution time.
    pub body: serde_json::Value,
    pub timeout: Option<Duration>,
    pub stream: bool,
}

/// Raw backend response. Scoped to one call.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProviderResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Advisory rate-limit hints published by a driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitHint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_minute: Option<u32>,
}

/// Static capability descriptor; construction-time metadata only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub supports_streaming: bool,
    pub requires_auth: bool,
    pub max_request_bytes: usize,
    pub rate_limit: RateLimitHint,
}

/// Core trait for backend adaptation.
///
/// Implementations hold nothing mutable beyond their transport client, so a
/// single driver serves any number of concurrent calls.
#[async_trait]
pub trait ProviderDriver: Send + Sync + std::fmt::Debug {
    /// Adapter kind this driver implements.
    fn kind(&self) -> ProviderKind;

    /// Static capability descriptor.
    fn info(&self) -> ProviderInfo;

    /// Build the wire request. Unset optional fields are omitted from the body.
    fn translate_request(
        &self,
        req: &UnifiedRequest,
        deployment: &Deployment,
    ) -> Result<ProviderRequest>;

    /// Send the request and read the full body.
    ///
    /// A non-2xx status is not an error here; it is returned in
    /// [`ProviderResponse::status`].
    async fn execute(
        &self,
        cancel: &CancellationToken,
        req: &ProviderRequest,
    ) -> Result<ProviderResponse>;

    /// Decode a backend body into the canonical response.
    fn translate_response(
        &self,
        resp: &ProviderResponse,
        deployment: &Deployment,
    ) -> Result<UnifiedResponse>;

    /// Start streaming into `output`.
    ///
    /// Fails only before the first byte is read; after that every problem is a
    /// terminal [`StreamChunk::Error`]. `output` is always dropped (the channel
    /// closed) by the time the stream ends, on every path.
    async fn stream(
        &self,
        cancel: &CancellationToken,
        req: &ProviderRequest,
        output: mpsc::Sender<StreamChunk>,
    ) -> Result<()>;

    /// Reject a deployment this driver cannot serve, naming the first bad field.
    fn validate_config(&self, deployment: &Deployment) -> Result<()>;

    /// Send a minimal synthetic request through the normal translate/execute path.
    async fn health_check(
        &self,
        cancel: &CancellationToken,
        deployment: &Deployment,
    ) -> Result<()> {
        let request = UnifiedRequest::new(
            deployment.model.clone(),
            vec![Message::user(HEALTH_CHECK_PROMPT)],
        )
        .with_temperature(0.0)
        .with_max_tokens(HEALTH_CHECK_MAX_TOKENS);
        let provider_request = self.translate_request(&request, deployment)?;

        let scoped = cancel.child_token();
        let started = Instant::now();
        let outcome =
            tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.execute(&scoped, &provider_request))
                .await;
        scoped.cancel();

        let response = match outcome {
            Ok(res) => res?,
            Err(_) => {
                warn!(deployment = %deployment.id, "health check timed out");
                return Err(Error::Timeout {
                    operation: "health check",
                    after: HEALTH_CHECK_TIMEOUT,
                });
            }
        };

        if response.status != 200 {
            warn!(deployment = %deployment.id, status = response.status, "health check failed");
            return Err(Error::UpstreamStatus {
                status: response.status,
                body: wire::body_excerpt(&response.body),
            });
        }

        info!(
            deployment = %deployment.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "health check passed"
        );
        Ok(())
    }
}

/// Factory: resolve the driver for an adapter kind.
pub fn create_driver(kind: ProviderKind, transport: Arc<HttpTransport>) -> Arc<dyn ProviderDriver> {
    match kind {
        ProviderKind::Gateway => Arc::new(GatewayDriver::new(transport)),
        ProviderKind::Direct => Arc::new(DirectDriver::new(transport)),
    }
}

/// Shared request assembly: validation, headers and the omission-aware body.
pub(crate) fn build_provider_request(
    req: &UnifiedRequest,
    deployment: &Deployment,
    wire_model: &str,
    url: String,
    framing: Framing,
    source: &'static str,
) -> Result<ProviderRequest> {
    req.validate()?;
    if wire_model.trim().is_empty() {
        return Err(Error::validation_with_context(
            "deployment model is required",
            ErrorContext::new()
                .with_field_path("deployment.model")
                .with_source(source),
        ));
    }
    if deployment.endpoint.base_url.trim().is_empty() {
        return Err(Error::validation_with_context(
            "deployment base URL is required",
            ErrorContext::new()
                .with_field_path("endpoint.base_url")
                .with_source(source),
        ));
    }

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let accept = if req.stream {
        framing.accept()
    } else {
        "application/json"
    };
    headers.insert(ACCEPT, HeaderValue::from_static(accept));

    if let Some(key) = deployment.endpoint.auth.bearer_key() {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|_| {
            Error::validation_with_context(
                "bearer key contains characters not allowed in a header",
                ErrorContext::new()
                    .with_field_path("endpoint.auth.key")
                    .with_source(source),
            )
        })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    for (name, value) in parse_custom_headers(deployment, source)? {
        if name == CONTENT_TYPE || name == AUTHORIZATION {
            debug!(header = %name, "custom header does not override translated value");
            continue;
        }
        headers.insert(name, value);
    }

    let body = serde_json::to_value(wire::ChatCompletionBody::new(req, wire_model))
        .map_err(Error::Encoding)?;

    Ok(ProviderRequest {
        url,
        method: Method::POST,
        headers,
        body,
        timeout: deployment.endpoint.request_timeout(),
        stream: req.stream,
    })
}

/// Parse per-deployment headers, in name order for deterministic errors.
pub(crate) fn parse_custom_headers(
    deployment: &Deployment,
    source: &'static str,
) -> Result<Vec<(HeaderName, HeaderValue)>> {
    let mut names: Vec<&String> = deployment.endpoint.headers.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| {
            let field = || format!("endpoint.headers.{}", name);
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                Error::validation_with_context(
                    "invalid header name",
                    ErrorContext::new().with_field_path(field()).with_source(source),
                )
            })?;
            let value = HeaderValue::from_str(&deployment.endpoint.headers[name]).map_err(|_| {
                Error::validation_with_context(
                    "invalid header value",
                    ErrorContext::new().with_field_path(field()).with_source(source),
                )
            })?;
            Ok((header, value))
        })
        .collect()
}

/// Encode the body, enforcing the driver's request-size limit.
pub(crate) fn encode_body(req: &ProviderRequest, max_bytes: usize) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(&req.body).map_err(Error::Encoding)?;
    if body.len() > max_bytes {
        return Err(Error::validation_with_context(
            format!(
                "encoded request is {} bytes, limit is {}",
                body.len(),
                max_bytes
            ),
            ErrorContext::new().with_field_path("request"),
        ));
    }
    Ok(body)
}

/// Shared stream implementation: send, then hand the body to the normalizer task.
pub(crate) async fn stream_with_framing(
    transport: &HttpTransport,
    framing: Framing,
    max_request_bytes: usize,
    cancel: &CancellationToken,
    req: &ProviderRequest,
    output: mpsc::Sender<StreamChunk>,
) -> Result<()> {
    if !req.stream {
        return Err(Error::validation_with_context(
            "request was not translated for streaming",
            ErrorContext::new().with_field_path("request.stream"),
        ));
    }
    let body = encode_body(req, max_request_bytes)?;
    let response = transport.send(cancel, req, body).await?;
    let cancel = cancel.clone();
    let status = response.status();

    if !status.is_success() {
        // The call has started; the status becomes the terminal chunk.
        tokio::spawn(async move {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => Bytes::new(),
                b = response.bytes() => b.unwrap_or_default(),
            };
            ChunkEmitter::new(output, cancel)
                .finish(StreamChunk::Error(StreamError::UpstreamStatus {
                    status: status.as_u16(),
                    body: wire::body_excerpt(&body),
                }))
                .await;
        });
        return Ok(());
    }

    let input: BoxStream<'static, Bytes> = Box::pin(
        response
            .bytes_stream()
            .map_err(|e| Error::Transport(TransportError::from_reqwest(e))),
    );
    pipeline::spawn_normalizer(framing, input, cancel, output);
    Ok(())
}

/// Shared config checks.
pub(crate) fn config_error(msg: impl Into<String>, field: &str, source: &'static str) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new().with_field_path(field).with_source(source),
    )
}

pub(crate) fn check_kind(
    deployment: &Deployment,
    expected: ProviderKind,
    source: &'static str,
) -> Result<()> {
    if deployment.provider != expected {
        return Err(config_error(
            format!(
                "deployment targets the {} adapter, not {}",
                deployment.provider, expected
            ),
            "provider",
            source,
        ));
    }
    Ok(())
}

pub(crate) fn check_model(deployment: &Deployment, source: &'static str) -> Result<()> {
    if deployment.model.trim().is_empty() {
        return Err(config_error("model is required", "model", source));
    }
    Ok(())
}

/// Parse the base URL as an absolute http(s) URL with a host.
pub(crate) fn check_base_url(base_url: &str, source: &'static str) -> Result<url::Url> {
    if base_url.trim().is_empty() {
        return Err(config_error("base URL is required", "endpoint.base_url", source));
    }
    let parsed = url::Url::parse(base_url).map_err(|e| {
        config_error(
            format!("base URL is not a valid URL: {}", e),
            "endpoint.base_url",
            source,
        )
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(config_error(
            format!("unsupported URL scheme '{}'", parsed.scheme()),
            "endpoint.base_url",
            source,
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(config_error(
            "base URL has no host",
            "endpoint.base_url",
            source,
        ));
    }
    Ok(parsed)
}

pub(crate) fn check_headers(deployment: &Deployment, source: &'static str) -> Result<()> {
    parse_custom_headers(deployment, source).map(|_| ()).map_err(|e| match e {
        Error::Validation { message, context } => Error::Configuration { message, context },
        other => other,
    })
}
