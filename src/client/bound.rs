use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::audit::{AuditRecord, AuditSink};
use crate::deployment::Deployment;
use crate::drivers::ProviderDriver;
use crate::pipeline::chunk_channel;
use crate::types::{MessageRole, StreamChunk, UnifiedRequest, UnifiedResponse};
use crate::Result;

/// A deployment paired with the driver that serves it.
///
/// Cheap to clone; every clone shares the same deployment, driver and sink.
#[derive(Debug, Clone)]
pub struct BoundDeployment {
    deployment: Arc<Deployment>,
    driver: Arc<dyn ProviderDriver>,
    audit: Arc<dyn AuditSink>,
}

impl BoundDeployment {
    pub(crate) fn new(
        deployment: Arc<Deployment>,
        driver: Arc<dyn ProviderDriver>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            deployment,
            driver,
            audit,
        }
    }

    pub fn deployment(&self) -> &Arc<Deployment> {
        &self.deployment
    }

    pub fn driver(&self) -> &Arc<dyn ProviderDriver> {
        &self.driver
    }

    /// Non-streaming call: translate, execute, translate back.
    ///
    /// A non-2xx backend status surfaces as [`crate::Error::UpstreamStatus`].
    /// Caller metadata is copied onto the response and wins over adapter keys.
    pub async fn complete(
        &self,
        cancel: &CancellationToken,
        req: &UnifiedRequest,
    ) -> Result<UnifiedResponse> {
        let span = info_span!("complete", deployment = %self.deployment.id, provider = %self.deployment.provider);
        let started = Instant::now();
        let outcome = self.run_complete(cancel, req).instrument(span).await;

        if self.audit.enabled() {
            let mut record = self.audit_record(req);
            match &outcome {
                Ok(resp) => {
                    let usage = resp.usage.unwrap_or_default();
                    record = record
                        .with_output(resp.content().unwrap_or_default())
                        .with_tokens(usage.prompt_tokens, usage.completion_tokens);
                }
                Err(e) => record = record.with_error(e),
            }
            self.audit.record(record);
        }

        debug!(
            deployment = %self.deployment.id,
            ok = outcome.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion finished"
        );
        outcome
    }

    async fn run_complete(
        &self,
        cancel: &CancellationToken,
        req: &UnifiedRequest,
    ) -> Result<UnifiedResponse> {
        let provider_request = if req.stream {
            let mut req = req.clone();
            req.stream = false;
            self.driver.translate_request(&req, &self.deployment)?
        } else {
            self.driver.translate_request(req, &self.deployment)?
        };
        let provider_response = self.driver.execute(cancel, &provider_request).await?;
        let mut response = self
            .driver
            .translate_response(&provider_response, &self.deployment)?;
        response
            .metadata
            .extend(req.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(response)
    }

    /// Streaming call.
    ///
    /// Returns once the backend has answered with a response head; from then
    /// on the receiver yields `Data` chunks and exactly one terminal chunk,
    /// then closes. Dropping the receiver stops the producer.
    pub async fn stream(
        &self,
        cancel: &CancellationToken,
        req: &UnifiedRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let provider_request = if req.stream {
            self.driver.translate_request(req, &self.deployment)?
        } else {
            let mut req = req.clone();
            req.stream = true;
            self.driver.translate_request(&req, &self.deployment)?
        };

        let (tx, rx) = chunk_channel();
        let span = info_span!("stream", deployment = %self.deployment.id, provider = %self.deployment.provider);
        if let Err(e) = self
            .driver
            .stream(cancel, &provider_request, tx)
            .instrument(span)
            .await
        {
            if self.audit.enabled() {
                self.audit.record(self.audit_record(req).with_error(&e));
            }
            return Err(e);
        }

        if !self.audit.enabled() {
            return Ok(rx);
        }

        let (out_tx, out_rx) = chunk_channel();
        tokio::spawn(relay(
            rx,
            out_tx,
            cancel.clone(),
            Arc::clone(&self.audit),
            self.audit_record(req),
        ));
        Ok(out_rx)
    }

    /// Minimal synthetic request against this deployment.
    pub async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        self.driver.health_check(cancel, &self.deployment).await
    }

    fn audit_record(&self, req: &UnifiedRequest) -> AuditRecord {
        let input = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        AuditRecord::new(
            self.deployment.model.clone(),
            self.deployment.id.clone(),
            self.driver.info().name,
        )
        .with_conversation_id(req.conversation_id())
        .with_input(input)
    }
}

/// Forward chunks to the caller while collecting output for the audit record.
///
/// Data already in flight when `cancel` fires is discarded; the producer's own
/// terminal chunk still goes through.
async fn relay(
    mut rx: mpsc::Receiver<StreamChunk>,
    tx: mpsc::Sender<StreamChunk>,
    cancel: CancellationToken,
    audit: Arc<dyn AuditSink>,
    record: AuditRecord,
) {
    let mut output = String::new();
    while let Some(chunk) = rx.recv().await {
        match chunk {
            StreamChunk::Data(text) => {
                if cancel.is_cancelled() {
                    continue;
                }
                output.push_str(&text);
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => continue,
                    res = tx.send(StreamChunk::Data(text)) => res,
                };
                if sent.is_err() {
                    audit.record(
                        record
                            .with_output(output)
                            .with_error("stream receiver dropped before completion"),
                    );
                    return;
                }
            }
            terminal => {
                let record = record.with_output(output);
                let record = match &terminal {
                    StreamChunk::Error(e) => record.with_error(e),
                    _ => record,
                };
                audit.record(record);
                let _ = tx.send(terminal).await;
                return;
            }
        }
    }
    warn!("stream producer stopped without a terminal chunk");
    audit.record(
        record
            .with_output(output)
            .with_error("stream ended without a terminal chunk"),
    );
}
