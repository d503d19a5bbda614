use crate::message::ToolCall;
use crate::request::Operation;
use crate::response::Usage;
use bytes::Bytes;
use meridian_common::ErrorKind;

#[derive(Debug, Clone)]
pub enum ChunkDelta {
    Text(String),
    ToolCallDelta(ToolCall),
    Audio(Bytes),
    Transcript(String),
}

#[derive(Debug, Clone)]
pub struct ChunkExtra {
    pub provider: String,
    /// Latency from request start to this chunk's arrival. Non-decreasing
    /// across a single stream's chunks (§5 ordering guarantee).
    pub latency_ms: u64,
}

/// One element of a lazy, bounded chunk sequence. The final element of every
/// stream is always present and carries either `finish_reason`+`usage`
/// (normal completion) or `error` (terminal failure) — never neither.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub operation: Operation,
    pub delta: Option<ChunkDelta>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    pub error: Option<ErrorKind>,
    pub extra: ChunkExtra,
}

impl StreamChunk {
    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some() || self.error.is_some()
    }
}
