//! OpenAI-compatible wire shapes shared by every adapter.
//!
//! Optional fields are omitted (not zero-filled) through `skip_serializing_if`.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use uuid::Uuid;

use super::ProviderResponse;
use crate::deployment::Deployment;
use crate::types::{
    Choice, FunctionDefinition, Message, MessageRole, ResponseFormat, UnifiedRequest,
    UnifiedResponse, Usage,
};
use crate::{Error, ErrorContext, Result};

/// Longest upstream body excerpt carried in error messages.
const BODY_EXCERPT_LIMIT: usize = 512;

/// Chat-completions request body.
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionBody<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub top_p: f32,
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub stop: &'a [String],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<&'a [FunctionDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<&'a ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<&'a str>,
}

impl<'a> ChatCompletionBody<'a> {
    pub fn new(req: &'a UnifiedRequest, wire_model: &'a str) -> Self {
        Self {
            model: wire_model,
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            top_p: req.top_p,
            stop: &req.stop,
            stream: req.stream,
            functions: req.functions.as_deref().filter(|f| !f.is_empty()),
            response_format: req.response_format.as_ref(),
            user: req.user.as_deref().filter(|u| !u.is_empty()),
        }
    }
}

fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_empty_slice<T>(v: &&[T]) -> bool {
    v.is_empty()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    delta: Option<WireMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl WireMessage {
    fn into_message(self) -> Message {
        Message {
            role: parse_role(self.role.as_deref()),
            content: self.content.unwrap_or_default(),
            name: self.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        match (self.prompt_tokens, self.completion_tokens) {
            (Some(prompt), Some(completion)) => {
                let usage = Usage::new(prompt, completion);
                if let Some(total) = self.total_tokens {
                    if total != usage.total_tokens {
                        debug!(reported = total, computed = usage.total_tokens, "usage total mismatch; using prompt + completion");
                    }
                }
                usage
            }
            (prompt, completion) => Usage {
                prompt_tokens: prompt.unwrap_or(0),
                completion_tokens: completion.unwrap_or(0),
                total_tokens: self
                    .total_tokens
                    .unwrap_or_else(|| prompt.unwrap_or(0).saturating_add(completion.unwrap_or(0))),
            },
        }
    }
}

fn parse_role(role: Option<&str>) -> MessageRole {
    match role {
        Some("system") => MessageRole::System,
        Some("user") => MessageRole::User,
        Some("tool") => MessageRole::Tool,
        Some("function") => MessageRole::Function,
        _ => MessageRole::Assistant,
    }
}

/// Decode a chat-completions body into the canonical response.
///
/// Non-2xx statuses are reported as [`Error::UpstreamStatus`] before any
/// decoding is attempted.
pub(crate) fn decode_response(
    resp: &ProviderResponse,
    deployment: &Deployment,
    source: &'static str,
) -> Result<UnifiedResponse> {
    if !resp.is_success() {
        return Err(Error::UpstreamStatus {
            status: resp.status,
            body: body_excerpt(&resp.body),
        });
    }
    if resp.body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(Error::decoding_with_context(
            "response body is empty",
            ErrorContext::new().with_field_path("body").with_source(source),
        ));
    }

    let wire: ChatCompletionResponse = serde_json::from_slice(&resp.body).map_err(|e| {
        Error::decoding_with_context(
            "response body does not match the chat-completions schema",
            ErrorContext::new()
                .with_field_path("body")
                .with_details(e.to_string())
                .with_source(source),
        )
    })?;

    let choices = wire
        .choices
        .into_iter()
        .enumerate()
        .map(|(pos, c)| Choice {
            index: c.index.unwrap_or(pos as u32),
            message: c.message.map(WireMessage::into_message).unwrap_or_default(),
            finish_reason: c.finish_reason,
            delta: c.delta.map(WireMessage::into_message),
        })
        .collect();

    let mut out = UnifiedResponse {
        id: if wire.id.is_empty() {
            format!("chatcmpl-{}", Uuid::new_v4().simple())
        } else {
            wire.id
        },
        created: if wire.created > 0 {
            wire.created
        } else {
            unix_now()
        },
        model: if wire.model.is_empty() {
            deployment.model.clone()
        } else {
            wire.model
        },
        choices,
        usage: wire.usage.map(WireUsage::into_usage),
        metadata: Default::default(),
    };
    out.append_metadata("deployment_id", serde_json::json!(deployment.id));
    Ok(out)
}

/// Bounded, lossy text rendering of an upstream body for error messages.
pub(crate) fn body_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.chars().count() <= BODY_EXCERPT_LIMIT {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(BODY_EXCERPT_LIMIT).collect();
    cut.push('…');
    cut
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
