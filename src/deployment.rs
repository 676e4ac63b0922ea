//! 部署描述：适配器调用所消费的只读配置。
//!
//! Deployment descriptors: read-only configuration consumed by adapter calls.
//!
//! A [`Deployment`] is immutable once constructed and is shared between many
//! concurrent calls behind an `Arc`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Known adapter kinds. The kind fixes base-URL semantics and stream framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Base URL is a host root; the adapter appends the chat-completions path
    /// and strips the `provider:` prefix from model identifiers.
    Gateway,
    /// Base URL is the complete endpoint; model identifiers pass through.
    Direct,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gateway => "gateway",
            ProviderKind::Direct => "direct",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication descriptor.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Auth {
    #[default]
    None,
    Bearer {
        #[serde(default)]
        key: String,
    },
}

impl Auth {
    pub fn bearer(key: impl Into<String>) -> Self {
        Auth::Bearer { key: key.into() }
    }

    /// Bearer key, only when one is configured and non-empty.
    pub fn bearer_key(&self) -> Option<&str> {
        match self {
            Auth::Bearer { key } if !key.trim().is_empty() => Some(key),
            _ => None,
        }
    }
}

// Keys never show up in logs.
impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Bearer { key } if key.is_empty() => f.write_str("Bearer(<empty>)"),
            Auth::Bearer { .. } => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// Where and how to reach a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub base_url: String,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout. Zero falls back to the transport default.
    #[serde(
        default,
        rename = "timeout_secs",
        with = "duration_secs",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub timeout: Duration,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth: Auth::None,
            headers: HashMap::new(),
            timeout: Duration::ZERO,
        }
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timeout to apply to a single request, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}

/// A concrete, network-addressable model instance behind one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    /// Model family used by routing lookups (e.g. "gpt-4").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    pub provider: ProviderKind,
    /// Provider-specific model identifier, possibly compound (`openai:gpt-4`).
    pub model: String,
    pub endpoint: Endpoint,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl Deployment {
    pub fn new(
        id: impl Into<String>,
        provider: ProviderKind,
        model: impl Into<String>,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            id: id.into(),
            family: None,
            provider,
            model: model.into(),
            endpoint,
            available: true,
        }
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Provider prefix of a compound model identifier (`openai` in `openai:gpt-4`).
    pub fn model_provider_prefix(&self) -> Option<&str> {
        self.model
            .split_once(':')
            .map(|(prefix, _)| prefix)
            .filter(|p| !p.is_empty())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(
                "timeout_secs must be a non-negative number",
            ));
        }
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
