//! Canonical, provider-agnostic chat request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::message::Message;
use super::tool::{FunctionDefinition, ResponseFormat};
use crate::{Error, ErrorContext, Result};

/// The request every adapter translates from.
///
/// Sampling parameters use their zero value to mean "unset": a zero
/// `temperature`, `max_tokens` or `top_p` and an empty `stop` list are
/// omitted from wire payloads rather than sent as explicit defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub top_p: f32,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl UnifiedRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_stop(mut self, stop: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_functions(mut self, functions: Vec<FunctionDefinition>) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Conversation identifier carried in metadata, if the caller set one.
    pub fn conversation_id(&self) -> Option<&str> {
        self.metadata.get("conversation_id").and_then(|v| v.as_str())
    }

    /// Reject requests no backend could accept.
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(invalid("messages must not be empty", "request.messages"));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(invalid(
                "temperature must be a non-negative number",
                "request.temperature",
            ));
        }
        if !self.top_p.is_finite() || !(0.0..=1.0).contains(&self.top_p) {
            return Err(invalid("top_p must be within [0, 1]", "request.top_p"));
        }
        if let Some(functions) = &self.functions {
            if let Some(idx) = functions.iter().position(|f| f.name.trim().is_empty()) {
                return Err(invalid(
                    "function name must not be empty",
                    format!("request.functions[{}].name", idx),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(msg: &str, field: impl Into<String>) -> Error {
    Error::validation_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("request_validator"),
    )
}
