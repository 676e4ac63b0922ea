//! Gateway-style adapter.
//!
//! Talks to an OpenAI-compatible gateway that routes compound `provider:model`
//! identifiers itself. The deployment base URL is the host root; the adapter
//! owns the `/v1/chat/completions` path and strips the provider prefix from the
//! model before it goes on the wire.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    build_provider_request, check_base_url, check_headers, check_kind, check_model, config_error,
    encode_body, stream_with_framing, wire, ProviderDriver, ProviderInfo, ProviderRequest,
    ProviderResponse, RateLimitHint,
};
use crate::deployment::{Auth, Deployment, ProviderKind};
use crate::pipeline::Framing;
use crate::transport::HttpTransport;
use crate::types::{StreamChunk, UnifiedRequest, UnifiedResponse};
use crate::Result;

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

const SOURCE: &str = "gateway_driver";
const FRAMING: Framing = Framing::Sse;
const MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct GatewayDriver {
    transport: Arc<HttpTransport>,
    rate_limit: RateLimitHint,
}

impl GatewayDriver {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self {
            transport,
            rate_limit: RateLimitHint::default(),
        }
    }

    /// Publish rate-limit hints through [`ProviderDriver::info`].
    pub fn with_rate_limit(mut self, rate_limit: RateLimitHint) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Model identifier as the gateway expects it: everything after the first `:`.
    pub fn wire_model(model: &str) -> &str {
        model.split_once(':').map_or(model, |(_, rest)| rest)
    }

    /// Chat-completions URL for a host-root base URL.
    pub fn endpoint_url(base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), CHAT_COMPLETIONS_PATH)
    }
}

#[async_trait]
impl ProviderDriver for GatewayDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gateway
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "gateway",
            version: "v1",
            supports_streaming: true,
            requires_auth: true,
            max_request_bytes: MAX_REQUEST_BYTES,
            rate_limit: self.rate_limit,
        }
    }

    fn translate_request(
        &self,
        req: &UnifiedRequest,
        deployment: &Deployment,
    ) -> Result<ProviderRequest> {
        let wire_model = Self::wire_model(&deployment.model);
        let url = Self::endpoint_url(&deployment.endpoint.base_url);
        debug!(deployment = %deployment.id, model = wire_model, %url, "translating gateway request");
        build_provider_request(req, deployment, wire_model, url, FRAMING, SOURCE)
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        req: &ProviderRequest,
    ) -> Result<ProviderResponse> {
        let body = encode_body(req, MAX_REQUEST_BYTES)?;
        self.transport.execute(cancel, req, body).await
    }

    fn translate_response(
        &self,
        resp: &ProviderResponse,
        deployment: &Deployment,
    ) -> Result<UnifiedResponse> {
        let mut out = wire::decode_response(resp, deployment, SOURCE)?;
        out.append_metadata("provider", serde_json::json!(self.info().name));
        out.append_metadata("gateway_routed", serde_json::json!(true));
        if let Some(upstream) = deployment.model_provider_prefix() {
            out.append_metadata("upstream_provider", serde_json::json!(upstream));
        }
        Ok(out)
    }

    async fn stream(
        &self,
        cancel: &CancellationToken,
        req: &ProviderRequest,
        output: mpsc::Sender<StreamChunk>,
    ) -> Result<()> {
        stream_with_framing(&self.transport, FRAMING, MAX_REQUEST_BYTES, cancel, req, output).await
    }

    fn validate_config(&self, deployment: &Deployment) -> Result<()> {
        check_kind(deployment, ProviderKind::Gateway, SOURCE)?;
        check_model(deployment, SOURCE)?;
        if Self::wire_model(&deployment.model).trim().is_empty() {
            return Err(config_error(
                "model has a provider prefix but no model name",
                "model",
                SOURCE,
            ));
        }
        // A bare host is fine here; the path is appended per request.
        check_base_url(&deployment.endpoint.base_url, SOURCE)?;
        if let Auth::Bearer { key } = &deployment.endpoint.auth {
            if key.trim().is_empty() {
                return Err(config_error(
                    "bearer auth requires a non-empty key",
                    "endpoint.auth.key",
                    SOURCE,
                ));
            }
        }
        check_headers(deployment, SOURCE)
    }
}
