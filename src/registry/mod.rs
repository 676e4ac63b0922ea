//! 部署注册表：读多写少的部署查找，支持原子快照替换
//!
//! Deployment registry. Lookups read an immutable snapshot; updates build a new
//! snapshot and swap it in atomically, so readers never block on writers.

use arc_swap::ArcSwap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::deployment::Deployment;
use crate::{Error, ErrorContext, Result};

/// Read-mostly deployment lookup consumed by whatever selects a deployment.
pub trait Registry: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<Deployment>>;

    /// All deployments in declaration order.
    fn list(&self) -> Vec<Arc<Deployment>>;

    /// Deployments serving a model family, in declaration order.
    fn get_by_family(&self, family: &str) -> Vec<Arc<Deployment>>;
}

#[derive(Debug, Default)]
struct Snapshot {
    ordered: Vec<Arc<Deployment>>,
    by_id: HashMap<String, Arc<Deployment>>,
}

impl Snapshot {
    fn build(deployments: Vec<Deployment>) -> Result<Self> {
        let mut snapshot = Snapshot::default();
        for (idx, dep) in deployments.into_iter().enumerate() {
            if dep.id.trim().is_empty() {
                return Err(Error::configuration_with_context(
                    "deployment id is required",
                    ErrorContext::new()
                        .with_field_path(format!("deployments[{}].id", idx))
                        .with_source("registry"),
                ));
            }
            if snapshot.by_id.contains_key(&dep.id) {
                return Err(Error::configuration_with_context(
                    format!("duplicate deployment id '{}'", dep.id),
                    ErrorContext::new()
                        .with_field_path(format!("deployments[{}].id", idx))
                        .with_source("registry"),
                ));
            }
            let dep = Arc::new(dep);
            snapshot.by_id.insert(dep.id.clone(), Arc::clone(&dep));
            snapshot.ordered.push(dep);
        }
        Ok(snapshot)
    }
}

#[derive(Debug, Deserialize)]
struct DeploymentFile {
    #[serde(default)]
    deployments: Vec<Deployment>,
}

/// Snapshot-swapping registry backed by [`ArcSwap`].
#[derive(Debug, Default)]
pub struct DeploymentRegistry {
    snapshot: ArcSwap<Snapshot>,
}

impl DeploymentRegistry {
    pub fn new(deployments: Vec<Deployment>) -> Result<Self> {
        Ok(Self {
            snapshot: ArcSwap::from_pointee(Snapshot::build(deployments)?),
        })
    }

    /// Parse a `deployments:` document (YAML, or JSON as a YAML subset).
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Self::new(parse_deployments(content)?)
    }

    pub async fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::configuration_with_context(
                "cannot read deployment file",
                ErrorContext::new()
                    .with_field_path(path.display().to_string())
                    .with_details(e.to_string())
                    .with_source("registry"),
            )
        })?;
        let registry = Self::from_yaml_str(&content)?;
        debug!(path = %path.display(), count = registry.len(), "deployments loaded");
        Ok(registry)
    }

    /// Atomically replace every deployment. On error the current snapshot is kept.
    pub fn replace(&self, deployments: Vec<Deployment>) -> Result<()> {
        let next = Snapshot::build(deployments)?;
        self.snapshot.store(Arc::new(next));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Registry for DeploymentRegistry {
    fn get(&self, id: &str) -> Option<Arc<Deployment>> {
        self.snapshot.load().by_id.get(id).cloned()
    }

    fn list(&self) -> Vec<Arc<Deployment>> {
        self.snapshot.load().ordered.clone()
    }

    fn get_by_family(&self, family: &str) -> Vec<Arc<Deployment>> {
        self.snapshot
            .load()
            .ordered
            .iter()
            .filter(|d| d.family.as_deref() == Some(family))
            .cloned()
            .collect()
    }
}

fn parse_deployments(content: &str) -> Result<Vec<Deployment>> {
    let file: DeploymentFile = serde_yaml::from_str(content).map_err(|e| {
        Error::configuration_with_context(
            "invalid deployment document",
            ErrorContext::new()
                .with_details(e.to_string())
                .with_source("registry"),
        )
    })?;
    Ok(file.deployments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{Endpoint, ProviderKind};

    const DOC: &str = r#"
deployments:
  - id: gw-gpt4
    family: gpt-4
    provider: gateway
    model: openai:gpt-4
    endpoint:
      base_url: https://gw.example.com
      auth: { type: bearer, key: sk-test }
      timeout_secs: 30
  - id: local-llama
    family: llama3
    provider: direct
    model: llama3:8b
    endpoint:
      base_url: http://localhost:11434/api/chat
  - id: gw-gpt4-eu
    family: gpt-4
    provider: gateway
    model: azure:gpt-4
    available: false
    endpoint:
      base_url: https://gw-eu.example.com
"#;

    #[test]
    fn test_lookups() {
        let reg = DeploymentRegistry::from_yaml_str(DOC).unwrap();
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.get("local-llama").unwrap().provider, ProviderKind::Direct);
        assert!(reg.get("missing").is_none());

        let ids: Vec<_> = reg.list().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, ["gw-gpt4", "local-llama", "gw-gpt4-eu"]);

        let family = reg.get_by_family("gpt-4");
        assert_eq!(family.len(), 2);
        assert!(!family[1].available);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dep = Deployment::new("d", ProviderKind::Direct, "m", Endpoint::new("http://h/x"));
        let err = DeploymentRegistry::new(vec![dep.clone(), dep]).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_replace_keeps_snapshot_on_error() {
        let reg = DeploymentRegistry::from_yaml_str(DOC).unwrap();
        let before = reg.list();
        let dep = Deployment::new("", ProviderKind::Direct, "m", Endpoint::new("http://h/x"));
        assert!(reg.replace(vec![dep]).is_err());
        assert_eq!(reg.len(), 3);

        reg.replace(vec![]).unwrap();
        assert!(reg.is_empty());
        // Readers holding the old snapshot are unaffected.
        assert_eq!(before.len(), 3);
    }

    #[test]
    fn test_invalid_document() {
        let err = DeploymentRegistry::from_yaml_str("deployments: [{ id: x }]").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_out_of_range_timeout_is_configuration_error() {
        let doc = r#"
deployments:
  - id: slow
    provider: direct
    model: m
    endpoint:
      base_url: http://localhost:11434/api/chat
      timeout_secs: 1.0e30
"#;
        let err = DeploymentRegistry::from_yaml_str(doc).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
