//! 调用方门面：部署绑定一次，随后完成/流式/健康检查都走同一个驱动。
//!
//! Caller facade.
//!
//! [`Gateway`] owns the shared transport, one driver per adapter kind and the
//! audit sink. [`Gateway::bind`] validates a deployment and pairs it with its
//! driver; the resulting [`BoundDeployment`] runs
//! translate → execute → translate (or translate → stream) and reports each
//! interaction to the audit sink.
//!
//! ```no_run
//! use ai_gateway_core::client::Gateway;
//! use ai_gateway_core::deployment::{Deployment, Endpoint, ProviderKind};
//! use ai_gateway_core::types::{Message, UnifiedRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> ai_gateway_core::Result<()> {
//! let gateway = Gateway::builder().build()?;
//! let deployment = Deployment::new(
//!     "gw-gpt4",
//!     ProviderKind::Gateway,
//!     "openai:gpt-4",
//!     Endpoint::new("https://gw.example.com"),
//! );
//! let bound = gateway.bind(deployment.into())?;
//! let request = UnifiedRequest::new("gpt-4", vec![Message::user("Hello")]);
//! let response = bound.complete(&CancellationToken::new(), &request).await?;
//! println!("{:?}", response.content());
//! # Ok(())
//! # }
//! ```

mod bound;
mod builder;
mod core;

pub use bound::BoundDeployment;
pub use builder::GatewayBuilder;
pub use core::{Gateway, HealthReport};
