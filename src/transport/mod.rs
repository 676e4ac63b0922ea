//! 传输层：基于 reqwest 的 HTTP 执行。
//!
//! HTTP transport shared by every adapter.

pub mod http;

pub use http::{HttpTransport, TransportConfig, TransportError};
