use crate::message::{Message, ToolCall};
use crate::request::AudioFormat;
use bytes::Bytes;
use meridian_common::RequestId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Fields present on every response regardless of operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraFields {
    pub provider: String,
    pub requested_model: String,
    pub used_model: String,
    pub request_id: RequestId,
    pub latency_ms: u64,
    /// Set by the pipeline when the response was served from cache rather
    /// than dispatched fresh; compared by cache-hit-replay tests.
    pub from_cache: bool,
}

/// Serializable so the semantic cache (C7) can persist a response as the
/// `CacheRecord` payload and reconstruct it byte-for-byte on a hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub payload: ResponsePayload,
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ResponsePayload {
    ChatCompletion(ChatCompletionResponse),
    TextCompletion(TextCompletionResponse),
    Embedding(EmbeddingResponse),
    Speech(SpeechResponse),
    Transcription(TranscriptionResponse),
    ListModels(ListModelsResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub message: Message,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCompletionResponse {
    pub text: String,
    pub finish_reason: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub vectors: Vec<Vec<f32>>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechResponse {
    pub audio: Bytes,
    pub format: AudioFormat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    pub text: String,
    pub language: Option<String>,
    pub duration_ms: Option<u64>,
    pub segments: Vec<TranscriptionSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListModelsResponse {
    pub models: Vec<ModelInfo>,
    pub next_page_token: Option<String>,
}
