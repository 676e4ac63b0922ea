//! Deployment files, registry lookups and binding.

use ai_gateway_core::audit::{AuditRecord, AuditSink, JsonlAuditLog};
use ai_gateway_core::registry::{DeploymentRegistry, Registry};
use ai_gateway_core::transport::TransportConfig;
use ai_gateway_core::{Error, Gateway, ProviderKind};
use std::sync::Arc;

const DEPLOYMENTS: &str = r#"
deployments:
  - id: gw-gpt4
    family: gpt-4
    provider: gateway
    model: openai:gpt-4
    endpoint:
      base_url: https://gw.example.com
      auth: { type: bearer, key: sk-test }
      headers:
        X-Team: core
      timeout_secs: 20
  - id: local-llama
    family: llama3
    provider: direct
    model: llama3:8b
    endpoint:
      base_url: http://localhost:11434/api/chat
  - id: broken-direct
    provider: direct
    model: llama3:8b
    endpoint:
      base_url: "https://"
"#;

fn gateway() -> Gateway {
    Gateway::builder()
        .transport_config(TransportConfig::default())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_load_file_and_bind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deployments.yaml");
    tokio::fs::write(&path, DEPLOYMENTS).await.unwrap();

    let registry = DeploymentRegistry::load_file(&path).await.unwrap();
    assert_eq!(registry.list().len(), 3);

    let gpt4 = registry.get_by_family("gpt-4");
    assert_eq!(gpt4.len(), 1);
    assert_eq!(gpt4[0].endpoint.timeout.as_secs(), 20);
    assert_eq!(gpt4[0].endpoint.headers["X-Team"], "core");

    let gw = gateway();
    let bound = tokio_test::assert_ok!(gw.bind_from(&registry, "local-llama"));
    assert_eq!(bound.driver().kind(), ProviderKind::Direct);

    // Invalid deployments are rejected before any traffic is routed to them.
    let err = tokio_test::assert_err!(gw.bind_from(&registry, "broken-direct"));
    assert!(matches!(err, Error::Configuration { .. }));
}

#[tokio::test]
async fn test_load_missing_file_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = DeploymentRegistry::load_file(dir.path().join("nope.yaml"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[tokio::test]
async fn test_jsonl_audit_log_shared_with_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let log = Arc::new(JsonlAuditLog::open(&path).await.unwrap());

    let gw = Gateway::builder()
        .transport_config(TransportConfig::default())
        .audit_sink(log.clone())
        .build()
        .unwrap();
    gw.audit().record(AuditRecord::new("gpt-4", "gw-gpt4", "gateway").with_input("hi"));
    log.close().await.unwrap();

    let text = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(text.lines().count(), 1);
    assert!(text.contains("\"deployment_id\":\"gw-gpt4\""));
}
