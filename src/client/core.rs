use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audit::AuditSink;
use crate::client::bound::BoundDeployment;
use crate::client::builder::GatewayBuilder;
use crate::deployment::{Deployment, ProviderKind};
use crate::drivers::ProviderDriver;
use crate::registry::Registry;
use crate::transport::HttpTransport;
use crate::{Error, ErrorContext, Result};

/// Entry point: shared transport, one driver per adapter kind, audit sink.
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<HttpTransport>,
    drivers: HashMap<ProviderKind, Arc<dyn ProviderDriver>>,
    audit: Arc<dyn AuditSink>,
}

/// Outcome of one deployment's health check.
#[derive(Debug)]
pub struct HealthReport {
    pub deployment_id: String,
    pub result: Result<()>,
    pub elapsed: Duration,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.result.is_ok()
    }
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Gateway with env-derived transport settings and no audit sink.
    pub fn from_env() -> Result<Self> {
        GatewayBuilder::new().build()
    }

    pub(crate) fn from_parts(
        transport: Arc<HttpTransport>,
        drivers: HashMap<ProviderKind, Arc<dyn ProviderDriver>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            transport,
            drivers,
            audit,
        }
    }

    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Driver for an adapter kind.
    pub fn driver(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderDriver>> {
        self.drivers.get(&kind).cloned().ok_or_else(|| {
            Error::configuration_with_context(
                format!("no driver registered for '{}'", kind),
                ErrorContext::new()
                    .with_field_path("provider")
                    .with_source("gateway"),
            )
        })
    }

    /// Validate a deployment and pair it with its driver.
    ///
    /// Availability is not checked here; that flag belongs to whatever selects
    /// the deployment.
    pub fn bind(&self, deployment: Arc<Deployment>) -> Result<BoundDeployment> {
        let driver = self.driver(deployment.provider)?;
        driver.validate_config(&deployment)?;
        debug!(deployment = %deployment.id, provider = %deployment.provider, "deployment bound");
        Ok(BoundDeployment::new(
            deployment,
            driver,
            Arc::clone(&self.audit),
        ))
    }

    /// Look a deployment up in `registry` and bind it.
    pub fn bind_from(&self, registry: &dyn Registry, id: &str) -> Result<BoundDeployment> {
        let deployment = registry.get(id).ok_or_else(|| {
            Error::configuration_with_context(
                format!("unknown deployment '{}'", id),
                ErrorContext::new()
                    .with_field_path("deployment.id")
                    .with_source("registry"),
            )
        })?;
        self.bind(deployment)
    }

    /// Check every deployment concurrently. Each check has its own deadline,
    /// so one slow backend cannot stall the batch. Reports keep input order.
    pub async fn health_check_all(
        &self,
        cancel: &CancellationToken,
        deployments: &[Arc<Deployment>],
    ) -> Vec<HealthReport> {
        let checks = deployments.iter().map(|dep| async move {
            let started = Instant::now();
            let result = match self.driver(dep.provider) {
                Ok(driver) => driver.health_check(cancel, dep).await,
                Err(e) => Err(e),
            };
            HealthReport {
                deployment_id: dep.id.clone(),
                result,
                elapsed: started.elapsed(),
            }
        });
        let reports = join_all(checks).await;
        let healthy = reports.iter().filter(|r| r.is_healthy()).count();
        info!(total = reports.len(), healthy, "health check batch finished");
        reports
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.drivers.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("Gateway")
            .field("drivers", &kinds)
            .field("audit", &self.audit)
            .finish()
    }
}
