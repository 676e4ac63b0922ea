//! 类型系统模块：网关的规范化请求/响应/流式类型。
//!
//! # Types Module
//!
//! The canonical schema every adapter translates to and from.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`UnifiedRequest`] | Provider-agnostic chat request |
//! | [`UnifiedResponse`] | Provider-agnostic chat response |
//! | [`Message`] | Chat message with role, content and optional name |
//! | [`StreamChunk`] | One normalized streaming unit (data, done or error) |
//! | [`FunctionDefinition`] | Function definition for function-calling backends |
//!
//! ## Example
//!
//! ```rust
//! use ai_gateway_core::types::{Message, UnifiedRequest};
//!
//! let req = UnifiedRequest::new(
//!     "gpt-4",
//!     vec![Message::system("Be brief."), Message::user("Hello")],
//! )
//! .with_temperature(0.2)
//! .with_max_tokens(64);
//! assert!(req.validate().is_ok());
//! ```

pub mod events;
pub mod message;
pub mod request;
pub mod response;
pub mod tool;

pub use events::StreamChunk;
pub use message::{Message, MessageRole};
pub use request::UnifiedRequest;
pub use response::{Choice, UnifiedResponse, Usage};
pub use tool::{FunctionDefinition, ResponseFormat};
