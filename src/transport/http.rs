use crate::drivers::{ProviderRequest, ProviderResponse};
use crate::{Error, Result};
use reqwest::Proxy;
use std::env;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Transport knobs. Defaults are production-friendly and env-overridable.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Default total timeout for non-streaming requests without a per-endpoint timeout.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub proxy_url: Option<String>,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            proxy_url: None,
            user_agent: concat!("ai-gateway-core/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TransportConfig {
    /// Defaults overlaid with `GATEWAY_HTTP_*` / `GATEWAY_PROXY_URL` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(secs) = env_parse::<u64>("GATEWAY_HTTP_TIMEOUT_SECS") {
            cfg.request_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env_parse::<u64>("GATEWAY_HTTP_CONNECT_TIMEOUT_SECS") {
            cfg.connect_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = env_parse::<usize>("GATEWAY_HTTP_POOL_MAX_IDLE_PER_HOST") {
            cfg.pool_max_idle_per_host = n;
        }
        if let Some(secs) = env_parse::<u64>("GATEWAY_HTTP_POOL_IDLE_TIMEOUT_SECS") {
            cfg.pool_idle_timeout = Duration::from_secs(secs);
        }
        if let Ok(proxy) = env::var("GATEWAY_PROXY_URL") {
            if !proxy.trim().is_empty() {
                cfg.proxy_url = Some(proxy);
            }
        }
        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

/// Immutable HTTP client shared by all calls on an adapter.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        // No client-wide total timeout: it would also cut long-lived streams.
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Some(config.pool_idle_timeout))
            .user_agent(config.user_agent.clone())
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(TransportConfig::from_env())
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Send the request and wait for the response head.
    ///
    /// The send races `cancel`; cancellation drops the in-flight request.
    /// Streaming requests get no total timeout so the body can outlive it.
    pub async fn send(
        &self,
        cancel: &CancellationToken,
        req: &ProviderRequest,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .request(req.method.clone(), &req.url)
            .headers(req.headers.clone())
            .body(body);

        if !req.stream {
            builder = builder.timeout(req.timeout.unwrap_or(self.config.request_timeout));
        }

        debug!(url = %req.url, method = %req.method, stream = req.stream, "sending provider request");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = builder.send() => res.map_err(|e| Error::Transport(TransportError::from_reqwest(e))),
        }
    }

    /// Send the request and read the whole body.
    ///
    /// Non-2xx statuses are returned as-is for the caller to interpret.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        req: &ProviderRequest,
        body: Vec<u8>,
    ) -> Result<ProviderResponse> {
        let response = self.send(cancel, req, body).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            b = response.bytes() => b.map_err(|e| Error::Transport(TransportError::from_reqwest(e)))?,
        };

        debug!(status, bytes = body.len(), "provider response received");
        Ok(ProviderResponse {
            status,
            headers,
            body,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e)
        } else if e.is_connect() {
            TransportError::Connect(e)
        } else {
            TransportError::Http(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = TransportConfig::default();
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
        assert!(cfg.proxy_url.is_none());
        assert!(cfg.user_agent.starts_with("ai-gateway-core/"));
    }

    #[test]
    fn test_transport_builds_with_defaults() {
        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        assert_eq!(transport.config().pool_max_idle_per_host, 32);
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let cfg = TransportConfig {
            proxy_url: Some("not a url".into()),
            ..TransportConfig::default()
        };
        assert!(matches!(
            HttpTransport::new(cfg),
            Err(Error::Transport(TransportError::Other(_)))
        ));
    }
}
