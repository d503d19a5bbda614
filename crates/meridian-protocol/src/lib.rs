//! Canonical, wire-neutral data model shared by every layer of the gateway:
//! the request/response shapes the pipeline, the fallback machine, and every
//! provider adapter agree on. Adapters translate their own wire format into
//! and out of these types; nothing above the adapter boundary ever sees a
//! provider-specific JSON shape.

pub mod fallback;
pub mod message;
pub mod request;
pub mod response;
pub mod sse;
pub mod stream;

pub use fallback::FallbackTarget;
pub use message::{ContentBlock, Message, Role, ToolCall, ToolDefinition};
pub use request::{
    ChatCompletionRequest, EmbeddingRequest, ListModelsRequest, Operation, ParamMap, Request,
    RequestMetadata, RequestPayload, SpeechRequest, TextCompletionRequest, TranscriptionRequest,
};
pub use response::{
    ChatCompletionResponse, EmbeddingResponse, ExtraFields, ListModelsResponse, Response,
    ResponsePayload, SpeechResponse, TextCompletionResponse, TranscriptionResponse, Usage,
};
pub use stream::{ChunkDelta, ChunkExtra, StreamChunk};
