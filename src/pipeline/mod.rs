//! 流式归一化模块：把后端增量字节流转换为规范化的 StreamChunk 序列。
//!
//! # Streaming Normalizer
//!
//! Converts an incremental backend byte stream into a strictly ordered
//! [`StreamChunk`] sequence: any number of `Data` chunks followed by exactly
//! one terminal `Done` or `Error` chunk, after which the channel is closed.
//!
//! ```text
//! HTTP body bytes → FrameDecoder (SSE | raw JSON) → ChunkEmitter → mpsc::Receiver
//!                          ▲                              ▲
//!                   cancellation races           capacity-1 backpressure
//!                   every read                   (producer waits on consumer)
//! ```
//!
//! Framing is a fixed property of each adapter; it is never auto-detected.

pub mod decode;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::StreamChunk;
use crate::BoxStream;

pub use decode::{DeltaChunk, Frame, FrameDecoder, JsonValueDecoder, SseDecoder};

/// The producer may run at most one chunk ahead of the consumer.
pub const CHUNK_CHANNEL_CAPACITY: usize = 1;

/// Create the output channel a stream call writes into.
pub fn chunk_channel() -> (mpsc::Sender<StreamChunk>, mpsc::Receiver<StreamChunk>) {
    mpsc::channel(CHUNK_CHANNEL_CAPACITY)
}

/// Failures delivered inside a terminal [`StreamChunk::Error`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream read failed: {0}")]
    Read(#[source] Box<crate::Error>),

    #[error("stream decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("upstream returned HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Read(_) => true,
            StreamError::UpstreamStatus { status, .. } => *status == 429 || *status >= 500,
            StreamError::Decode(_) | StreamError::Cancelled => false,
        }
    }
}

/// Wire framing of a streaming response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `data: ` lines with a `[DONE]` sentinel; content at `choices[0].delta.content`.
    Sse,
    /// Line-delimited raw JSON values, no sentinel; each value is forwarded verbatim.
    RawJson,
}

impl Framing {
    pub fn decoder(&self) -> Box<dyn FrameDecoder> {
        match self {
            Framing::Sse => Box::new(SseDecoder::new()),
            Framing::RawJson => Box::new(JsonValueDecoder::new()),
        }
    }

    /// `Accept` header value matching the framing.
    pub fn accept(&self) -> &'static str {
        match self {
            Framing::Sse => "text/event-stream",
            Framing::RawJson => "application/x-ndjson",
        }
    }
}

/// Why a data send did not complete.
enum Halt {
    Cancelled,
    ReceiverGone,
}

/// Sole owner of the output sender.
///
/// Terminal chunks consume the emitter, so nothing can be sent after one and
/// the channel closes exactly once when it is dropped.
pub(crate) struct ChunkEmitter {
    tx: mpsc::Sender<StreamChunk>,
    cancel: CancellationToken,
    sent: usize,
}

impl ChunkEmitter {
    pub(crate) fn new(tx: mpsc::Sender<StreamChunk>, cancel: CancellationToken) -> Self {
        Self { tx, cancel, sent: 0 }
    }

    async fn data(&mut self, text: String) -> Result<(), Halt> {
        let res = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Halt::Cancelled),
            res = self.tx.send(StreamChunk::Data(text)) => res,
        };
        res.map_err(|_| Halt::ReceiverGone)?;
        self.sent += 1;
        Ok(())
    }

    /// Deliver the terminal chunk and close the channel.
    pub(crate) async fn finish(self, terminal: StreamChunk) {
        debug_assert!(terminal.is_terminal());
        match &terminal {
            StreamChunk::Error(e) => {
                warn!(error = %e, data_chunks = self.sent, "stream ended with error")
            }
            _ => debug!(data_chunks = self.sent, "stream completed"),
        }
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(terminal).await;
    }
}

/// Drive `input` through the decoder for `framing` until a terminal chunk.
///
/// Never returns an error: every failure after this point becomes the
/// terminal chunk. Reads race `cancel`, so a cancelled caller unblocks a
/// stalled backend read.
pub async fn normalize(
    framing: Framing,
    mut input: BoxStream<'static, Bytes>,
    cancel: CancellationToken,
    tx: mpsc::Sender<StreamChunk>,
) {
    let mut decoder = framing.decoder();
    let mut emitter = ChunkEmitter::new(tx, cancel.clone());
    let mut eof = false;

    loop {
        loop {
            match decoder.next_frame(eof) {
                Ok(Some(Frame::Data(text))) => match emitter.data(text).await {
                    Ok(()) => {}
                    Err(Halt::Cancelled) => {
                        return emitter.finish(StreamChunk::Error(StreamError::Cancelled)).await;
                    }
                    Err(Halt::ReceiverGone) => {
                        debug!("stream receiver dropped; stopping");
                        return;
                    }
                },
                Ok(Some(Frame::Done)) => return emitter.finish(StreamChunk::Done).await,
                Ok(None) => break,
                Err(e) => return emitter.finish(StreamChunk::Error(e)).await,
            }
        }

        if eof {
            // Input closed without a sentinel: a clean, implicit end.
            return emitter.finish(StreamChunk::Done).await;
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return emitter.finish(StreamChunk::Error(StreamError::Cancelled)).await;
            }
            next = input.next() => next,
        };

        match next {
            Some(Ok(bytes)) => decoder.feed(&bytes),
            Some(Err(e)) => {
                return emitter
                    .finish(StreamChunk::Error(StreamError::Read(Box::new(e))))
                    .await;
            }
            None => eof = true,
        }
    }
}

/// Run [`normalize`] on its own task. The task owns the sender.
pub fn spawn_normalizer(
    framing: Framing,
    input: BoxStream<'static, Bytes>,
    cancel: CancellationToken,
    tx: mpsc::Sender<StreamChunk>,
) -> JoinHandle<()> {
    tokio::spawn(normalize(framing, input, cancel, tx))
}
