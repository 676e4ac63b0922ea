//! Frame decoders (Bytes -> canonical frames)
//!
//! Decoders are synchronous and incremental: bytes are fed as they arrive and
//! complete frames are pulled out. All I/O, cancellation and channel handling
//! lives in the normalizer loop, which keeps these easy to test in isolation.

use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::debug;

use super::StreamError;

/// SSE data-line prefix.
pub const SSE_DATA_PREFIX: &str = "data: ";
/// Literal completion sentinel carried on a data line.
pub const SSE_DONE_SIGNAL: &str = "[DONE]";

/// A decoded unit, before it becomes a [`crate::types::StreamChunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(String),
    Done,
}

/// Incremental decoder for one wire framing.
pub trait FrameDecoder: Send {
    /// Append raw bytes read from the body.
    fn feed(&mut self, bytes: &[u8]);

    /// Pull the next complete frame from buffered input.
    ///
    /// `Ok(None)` means more input is needed. With `eof` set, buffered input
    /// is final and partial frames are resolved one way or the other.
    fn next_frame(&mut self, eof: bool) -> Result<Option<Frame>, StreamError>;
}

/// Byte-level line splitter.
///
/// Works on bytes rather than `str` so that a multi-byte UTF-8 sequence split
/// across two reads is reassembled before decoding.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator (`\n` or `\r\n`).
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let idx = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=idx).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left once the input has ended.
    pub(crate) fn take_rest(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        let rest = String::from_utf8_lossy(&rest);
        Some(rest.trim_end_matches('\r').to_string())
    }
}

/// Typed view of an OpenAI-style streaming chunk: `choices[0].delta.content`.
#[derive(Debug, Deserialize)]
pub struct DeltaChunk {
    #[serde(default)]
    choices: Vec<DeltaChoice>,
}

#[derive(Debug, Deserialize)]
struct DeltaChoice {
    #[serde(default)]
    delta: Option<DeltaContent>,
}

#[derive(Debug, Deserialize)]
struct DeltaContent {
    #[serde(default)]
    content: Option<String>,
}

impl DeltaChunk {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Text of the first choice's delta, if present.
    pub fn into_content(self) -> Option<String> {
        self.choices.into_iter().next()?.delta?.content
    }
}

/// Server-Sent Events decoder with a `[DONE]` sentinel.
///
/// - only `data: ` lines are significant
/// - the sentinel is checked before any JSON parsing
/// - a line that fails to parse is skipped, not fatal
/// - empty deltas are never emitted
#[derive(Debug, Default)]
pub struct SseDecoder {
    lines: LineBuffer,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one SSE line. `None` means the line produces nothing.
    pub fn parse_line(line: &str) -> Option<Frame> {
        let payload = line.strip_prefix(SSE_DATA_PREFIX)?;
        if payload.trim() == SSE_DONE_SIGNAL {
            return Some(Frame::Done);
        }
        match DeltaChunk::parse(payload) {
            Ok(chunk) => chunk
                .into_content()
                .filter(|c| !c.is_empty())
                .map(Frame::Data),
            Err(e) => {
                debug!(error = %e, "skipping malformed SSE data line");
                None
            }
        }
    }
}

impl FrameDecoder for SseDecoder {
    fn feed(&mut self, bytes: &[u8]) {
        self.lines.push(bytes);
    }

    fn next_frame(&mut self, eof: bool) -> Result<Option<Frame>, StreamError> {
        loop {
            let line = match self.lines.next_line() {
                Some(line) => line,
                None if eof => match self.lines.take_rest() {
                    Some(rest) => rest,
                    None => return Ok(None),
                },
                None => return Ok(None),
            };
            if let Some(frame) = Self::parse_line(&line) {
                return Ok(Some(frame));
            }
        }
    }
}

/// Raw JSON decoder: one top-level JSON value at a time, no sentinel.
///
/// Values may be newline-delimited, concatenated, or split across reads.
/// Each value is emitted verbatim as its source text.
#[derive(Debug, Default)]
pub struct JsonValueDecoder {
    buf: Vec<u8>,
}

impl JsonValueDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameDecoder for JsonValueDecoder {
    fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next_frame(&mut self, eof: bool) -> Result<Option<Frame>, StreamError> {
        let Some(start) = self.buf.iter().position(|b| !b.is_ascii_whitespace()) else {
            self.buf.clear();
            return Ok(None);
        };

        let end = {
            let mut values =
                serde_json::Deserializer::from_slice(&self.buf[start..]).into_iter::<IgnoredAny>();
            match values.next() {
                Some(Ok(_)) => start + values.byte_offset(),
                Some(Err(e)) if e.is_eof() && !eof => return Ok(None),
                Some(Err(e)) => return Err(StreamError::Decode(e)),
                None => return Ok(None),
            }
        };

        // A number that runs to the end of the buffer may continue in the next read.
        let is_number = matches!(self.buf[start], b'-' | b'0'..=b'9');
        if is_number && end == self.buf.len() && !eof {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&self.buf[start..end]).into_owned();
        self.buf.drain(..end);
        Ok(Some(Frame::Data(text)))
    }
}
