use std::collections::HashMap;
use std::sync::Arc;

use crate::audit::{self, AuditSink};
use crate::client::core::Gateway;
use crate::deployment::ProviderKind;
use crate::drivers::{self, ProviderDriver};
use crate::transport::{HttpTransport, TransportConfig};
use crate::Result;

/// Builder for [`Gateway`].
///
/// Keep this surface area small: a transport, an audit sink, and driver
/// overrides for tests or custom rate-limit hints.
pub struct GatewayBuilder {
    transport_config: Option<TransportConfig>,
    transport: Option<Arc<HttpTransport>>,
    audit: Arc<dyn AuditSink>,
    drivers: HashMap<ProviderKind, Arc<dyn ProviderDriver>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            transport_config: None,
            transport: None,
            audit: audit::noop_sink(),
            drivers: HashMap::new(),
        }
    }

    /// Transport settings. Default is [`TransportConfig::from_env`].
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = Some(config);
        self
    }

    /// Share an existing transport. Takes precedence over `transport_config`.
    pub fn transport(mut self, transport: Arc<HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Inject an audit sink. Default is a no-op sink.
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Replace the driver used for the kind it reports.
    pub fn driver(mut self, driver: Arc<dyn ProviderDriver>) -> Self {
        self.drivers.insert(driver.kind(), driver);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(
                self.transport_config.unwrap_or_else(TransportConfig::from_env),
            )?),
        };

        let mut resolved = self.drivers;
        for kind in [ProviderKind::Gateway, ProviderKind::Direct] {
            resolved
                .entry(kind)
                .or_insert_with(|| drivers::create_driver(kind, Arc::clone(&transport)));
        }

        Ok(Gateway::from_parts(transport, resolved, self.audit))
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
