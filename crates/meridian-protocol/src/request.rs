use crate::fallback::FallbackTarget;
use crate::message::Message;
use bytes::Bytes;
use meridian_common::RequestId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ChatCompletion,
    TextCompletion,
    Embedding,
    Speech,
    Transcription,
    ListModels,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::ChatCompletion,
        Operation::TextCompletion,
        Operation::Embedding,
        Operation::Speech,
        Operation::Transcription,
        Operation::ListModels,
    ];
}

/// Provider-specific extension parameters the core treats opaquely. Kept as
/// a `BTreeMap` (rather than `serde_json::Map`, which is insertion-ordered)
/// so that iteration order is always sorted, which is what the fingerprint
/// canonicalizer requires without having to re-sort itself.
pub type ParamMap = BTreeMap<String, serde_json::Value>;

/// Fields that are present on every request but are *not* part of its
/// semantic identity: caller-supplied trace tags, not wall-clock timestamps
/// (the pipeline stamps those itself). Excluded from the fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub trace_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub operation: Operation,
    pub provider: String,
    pub model: String,
    pub fallbacks: Vec<FallbackTarget>,
    pub payload: RequestPayload,
    pub params: ParamMap,
    pub metadata: RequestMetadata,
}

impl Request {
    pub fn targets(&self) -> impl Iterator<Item = FallbackTarget> + '_ {
        std::iter::once(FallbackTarget::new(self.provider.clone(), self.model.clone()))
            .chain(self.fallbacks.iter().cloned())
    }

    pub fn is_streaming(&self) -> bool {
        match &self.payload {
            RequestPayload::ChatCompletion(r) => r.stream,
            RequestPayload::TextCompletion(r) => r.stream,
            RequestPayload::Speech(r) => r.stream,
            RequestPayload::Transcription(r) => r.stream,
            RequestPayload::Embedding(_) | RequestPayload::ListModels(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RequestPayload {
    ChatCompletion(ChatCompletionRequest),
    TextCompletion(TextCompletionRequest),
    Embedding(EmbeddingRequest),
    Speech(SpeechRequest),
    Transcription(TranscriptionRequest),
    ListModels(ListModelsRequest),
}

#[derive(Debug, Clone, Default)]
pub struct ChatCompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub tools: Vec<crate::message::ToolDefinition>,
    pub stream: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TextCompletionRequest {
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub stream: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingRequest {
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Flac,
    Opus,
    Pcm,
}

#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub input: String,
    pub voice: String,
    pub format: AudioFormat,
    pub stream: bool,
}

#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio: Bytes,
    pub format: AudioFormat,
    pub language: Option<String>,
    pub stream: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListModelsRequest {
    pub page_token: Option<String>,
    pub page_size: Option<u32>,
}
