//! 审计模块：只写的交互审计接收器，永不阻塞或影响调用路径。
//!
//! Audit collaborator.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`AuditRecord`] | One completed (or failed) interaction |
//! | [`AuditSink`] | Write-only, fire-and-forget destination |
//! | [`NoopAuditSink`] | Default sink (no collection) |
//! | [`InMemoryAuditSink`] | Bounded in-memory sink for tests |
//! | [`JsonlAuditLog`] | Append-only JSON Lines file with an explicit open/close lifecycle |
//!
//! `record` is synchronous and infallible from the caller's point of view.
//! Sinks that do I/O hand records to their own writer task.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{Error, ErrorContext, Result};

/// Records queued for the file writer before new ones are dropped.
pub const DEFAULT_AUDIT_QUEUE: usize = 1024;

fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// One interaction as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub model_id: String,
    pub deployment_id: String,
    pub provider_name: String,
    pub input: String,
    pub output: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: f64,
}

impl AuditRecord {
    pub fn new(
        model_id: impl Into<String>,
        deployment_id: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: None,
            model_id: model_id.into(),
            deployment_id: deployment_id.into(),
            provider_name: provider_name.into(),
            input: String::new(),
            output: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            error: None,
            timestamp: timestamp(),
        }
    }

    pub fn with_conversation_id(mut self, id: Option<impl Into<String>>) -> Self {
        self.conversation_id = id.map(Into::into);
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_tokens(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Write-only audit destination.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Hand off one record. Must not block and must not fail the caller.
    fn record(&self, record: AuditRecord);

    /// `false` lets callers skip building records nobody keeps.
    fn enabled(&self) -> bool {
        true
    }
}

/// No-op sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _: AuditRecord) {}

    fn enabled(&self) -> bool {
        false
    }
}

/// Returns a no-op audit sink.
pub fn noop_sink() -> Arc<dyn AuditSink> {
    Arc::new(NoopAuditSink)
}

/// Bounded in-memory sink; the oldest record is evicted once full.
#[derive(Debug)]
pub struct InMemoryAuditSink {
    records: Mutex<VecDeque<AuditRecord>>,
    max_records: usize,
}

impl InMemoryAuditSink {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            max_records: max_records.max(1),
        }
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn records_for_conversation(&self, conversation_id: &str) -> Vec<AuditRecord> {
        self.lock()
            .iter()
            .filter(|r| r.conversation_id.as_deref() == Some(conversation_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditRecord>> {
        // A panicked writer cannot leave a VecDeque half-updated.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        let mut records = self.lock();
        records.push_back(record);
        while records.len() > self.max_records {
            records.pop_front();
        }
    }
}

/// Append-only JSON Lines audit log.
///
/// Opened once at startup and closed at shutdown; there is no global handle.
/// Writes are serialized by a single writer task. When the queue is full the
/// record is dropped with a warning rather than blocking the caller.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    tx: mpsc::Sender<AuditRecord>,
    shutdown: CancellationToken,
    writer: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl JsonlAuditLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_capacity(path, DEFAULT_AUDIT_QUEUE).await
    }

    pub async fn open_with_capacity(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                Error::configuration_with_context(
                    "cannot open audit log",
                    ErrorContext::new()
                        .with_field_path(path.display().to_string())
                        .with_details(e.to_string())
                        .with_source("audit"),
                )
            })?;

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();
        let writer = tokio::spawn(write_records(file, rx, shutdown.clone()));
        debug!(path = %path.display(), "audit log opened");

        Ok(Self {
            path,
            tx,
            shutdown,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush queued records and stop the writer. Later records are dropped.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(writer) = writer else {
            return Ok(());
        };
        let res = writer.await.map_err(|e| {
            Error::configuration_with_context(
                "audit writer task failed",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("audit"),
            )
        })?;
        debug!(path = %self.path.display(), "audit log closed");
        res
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, record: AuditRecord) {
        if self.shutdown.is_cancelled() {
            warn!(deployment = %record.deployment_id, "audit log is closed; record dropped");
            return;
        }
        if let Err(e) = self.tx.try_send(record) {
            warn!(error = %e, "audit queue unavailable; record dropped");
        }
    }
}

async fn write_records(
    file: tokio::fs::File,
    mut rx: mpsc::Receiver<AuditRecord>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut out = tokio::io::BufWriter::new(file);
    loop {
        let record = tokio::select! {
            r = rx.recv() => r,
            _ = shutdown.cancelled() => {
                rx.close();
                // Drain what was queued before shutdown.
                while let Some(record) = rx.recv().await {
                    write_line(&mut out, &record).await;
                }
                break;
            }
        };
        match record {
            Some(record) => {
                write_line(&mut out, &record).await;
                flush(&mut out).await;
            }
            None => break,
        }
    }
    flush(&mut out).await;
    Ok(())
}

async fn write_line(out: &mut tokio::io::BufWriter<tokio::fs::File>, record: &AuditRecord) {
    let mut line = match serde_json::to_vec(record) {
        Ok(line) => line,
        Err(e) => {
            error!(error = %e, "failed to encode audit record");
            return;
        }
    };
    line.push(b'\n');
    if let Err(e) = out.write_all(&line).await {
        error!(error = %e, "failed to write audit record");
    }
}

async fn flush(out: &mut tokio::io::BufWriter<tokio::fs::File>) {
    if let Err(e) = out.flush().await {
        error!(error = %e, "failed to flush audit log");
    }
}
