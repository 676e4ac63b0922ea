//! Canonical streaming chunks.

use crate::pipeline::StreamError;

/// One unit of a normalized stream.
///
/// A stream yields any number of `Data` chunks followed by exactly one
/// terminal chunk (`Done` or `Error`); nothing follows the terminal chunk.
#[derive(Debug)]
pub enum StreamChunk {
    /// Incremental text (SSE framing) or one verbatim JSON value (raw-JSON framing).
    Data(String),
    /// Clean end of stream, with or without an explicit sentinel.
    Done,
    /// Terminal failure after streaming began.
    Error(StreamError),
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamChunk::Data(_))
    }

    pub fn as_data(&self) -> Option<&str> {
        match self {
            StreamChunk::Data(s) => Some(s),
            _ => None,
        }
    }
}
