//! # ai-gateway-core
//!
//! LLM 网关的提供方抽象与流式归一化层：一个规范化请求/响应契约，多个 OpenAI 兼容后端。
//!
//! Provider-abstraction and streaming-normalization layer of an LLM gateway.
//! One canonical request/response contract is served by several
//! OpenAI-compatible backends, each with its own URL composition, model naming
//! and streaming wire framing.
//!
//! ## Core Ideas
//!
//! - **Translate once, omit the unset**: zero sampling parameters and empty
//!   optional fields never reach the wire
//! - **Dispatch resolved at bind time**: a deployment is paired with its driver
//!   once, not re-inspected per field
//! - **Streams end exactly once**: any number of `Data` chunks, then one
//!   `Done` or `Error`, then the channel closes
//! - **Cancellation everywhere**: every network wait races a
//!   [`tokio_util::sync::CancellationToken`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_gateway_core::client::Gateway;
//! use ai_gateway_core::deployment::{Auth, Deployment, Endpoint, ProviderKind};
//! use ai_gateway_core::types::{Message, StreamChunk, UnifiedRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> ai_gateway_core::Result<()> {
//!     let gateway = Gateway::from_env()?;
//!     let deployment = Deployment::new(
//!         "gw-gpt4",
//!         ProviderKind::Gateway,
//!         "openai:gpt-4",
//!         Endpoint::new("https://gw.example.com").with_auth(Auth::bearer("sk-...")),
//!     );
//!     let bound = gateway.bind(deployment.into())?;
//!
//!     let req = UnifiedRequest::new("gpt-4", vec![Message::user("Hello")]);
//!     let mut rx = bound.stream(&CancellationToken::new(), &req).await?;
//!     while let Some(chunk) = rx.recv().await {
//!         match chunk {
//!             StreamChunk::Data(text) => print!("{}", text),
//!             StreamChunk::Done => break,
//!             StreamChunk::Error(e) => return Err(e.into()),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Canonical request, response and stream chunk types |
//! | [`deployment`] | Deployment and endpoint descriptors |
//! | [`drivers`] | Provider capability trait plus gateway-style and direct adapters |
//! | [`pipeline`] | Streaming normalizer (SSE and raw JSON framings) |
//! | [`transport`] | Shared HTTP client with cancellation-aware sends |
//! | [`client`] | Facade binding deployments to drivers, with audit reporting |
//! | [`audit`] | Write-only audit sinks |
//! | [`registry`] | Read-mostly deployment lookup |
//! | [`logging`] | `tracing` subscriber bootstrap |

pub mod audit;
pub mod client;
pub mod deployment;
pub mod drivers;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::{BoundDeployment, Gateway, GatewayBuilder};
pub use deployment::{Auth, Deployment, Endpoint, ProviderKind};
pub use drivers::{ProviderDriver, ProviderInfo, ProviderRequest, ProviderResponse};
pub use pipeline::StreamError;
pub use types::{Message, MessageRole, StreamChunk, UnifiedRequest, UnifiedResponse, Usage};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
