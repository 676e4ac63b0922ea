//! Direct-style adapter.
//!
//! Talks to a single model server. The base URL is the complete endpoint and is
//! used verbatim; the model identifier is passed through unchanged. Streaming
//! bodies are line-delimited raw JSON values with no sentinel.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

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

const SOURCE: &str = "direct_driver";
const FRAMING: Framing = Framing::RawJson;
const MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct DirectDriver {
    transport: Arc<HttpTransport>,
    rate_limit: RateLimitHint,
}

impl DirectDriver {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self {
            transport,
            rate_limit: RateLimitHint::default(),
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitHint) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

#[async_trait]
impl ProviderDriver for DirectDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Direct
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "direct",
            version: "v1",
            supports_streaming: true,
            requires_auth: false,
            max_request_bytes: MAX_REQUEST_BYTES,
            rate_limit: self.rate_limit,
        }
    }

    fn translate_request(
        &self,
        req: &UnifiedRequest,
        deployment: &Deployment,
    ) -> Result<ProviderRequest> {
        let url = deployment.endpoint.base_url.clone();
        debug!(deployment = %deployment.id, model = %deployment.model, %url, "translating direct request");
        build_provider_request(req, deployment, &deployment.model, url, FRAMING, SOURCE)
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
        out.append_metadata("direct_endpoint", serde_json::json!(true));
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
        check_kind(deployment, ProviderKind::Direct, SOURCE)?;
        check_model(deployment, SOURCE)?;

        let base_url = deployment.endpoint.base_url.as_str();
        let Some((_, rest)) = base_url.split_once("://") else {
            return Err(config_error(
                "base URL must include a scheme",
                "endpoint.base_url",
                SOURCE,
            ));
        };
        if rest.is_empty() {
            return Err(config_error(
                "base URL has a scheme but no host",
                "endpoint.base_url",
                SOURCE,
            ));
        }
        if !rest.contains('/') {
            return Err(config_error(
                "base URL must be the full endpoint path",
                "endpoint.base_url",
                SOURCE,
            ));
        }
        check_base_url(base_url, SOURCE)?;

        if let Auth::Bearer { key } = &deployment.endpoint.auth {
            if key.trim().is_empty() {
                warn!(deployment = %deployment.id, "bearer auth configured with an empty key; requests will be sent without credentials");
            }
        }
        check_headers(deployment, SOURCE)
    }
}
