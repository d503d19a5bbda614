//! HTTP surface: one route per operation kind (§6 "Public API"), each a
//! thin JSON-in/JSON-out (or JSON-in/SSE-out) translation between the wire
//! body and [`meridian_core::Pipeline`]. No downstream authentication or
//! request/response audit logging lives here — those belong to the
//! administrative UI and the persistent configuration store, both named as
//! external collaborators the core doesn't implement (§1).

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::stream;
use meridian_cache::VectorStore;
use meridian_common::{ErrorKind, GatewayError};
use meridian_core::Pipeline;
use meridian_protocol::{
    AudioFormat, ChatCompletionRequest, EmbeddingRequest, FallbackTarget, ListModelsRequest, Message,
    Operation, Request, RequestMetadata, RequestPayload, SpeechRequest, StreamChunk, TextCompletionRequest,
    ToolDefinition, TranscriptionRequest,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Clone)]
struct RouterState {
    pipeline: Arc<Pipeline<dyn VectorStore>>,
}

pub fn build_router(pipeline: Arc<Pipeline<dyn VectorStore>>) -> Router {
    let state = RouterState { pipeline };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(text_completions))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/audio/speech", post(speech))
        .route("/v1/audio/transcriptions", post(transcription))
        .route("/v1/models", get(list_models))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Fields common to every operation body: the gateway routes by
/// `(provider, model)` rather than by URL prefix, since one instance fronts
/// many providers at once (§2), and every request may name its own
/// `fallbacks` chain (§4.5) independent of any other in flight.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    provider: String,
    model: String,
    #[serde(default)]
    fallbacks: Vec<FallbackTarget>,
    #[serde(default)]
    trace_tags: BTreeMap<String, String>,
    #[serde(flatten)]
    body: T,
}

/// Wraps a [`GatewayError`] so its `kind` maps onto an HTTP-like status, per
/// §6 "Error surface to callers".
struct ApiError(GatewayError);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = status_for(&self.0.kind);
        if status.is_server_error() {
            tracing::warn!(kind = ?self.0.kind, request_id = %self.0.request_id, "request failed");
        }
        (status, Json(self.0)).into_response()
    }
}

fn status_for(kind: &ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest(_) | ErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
        ErrorKind::AuthError(_) => StatusCode::UNAUTHORIZED,
        ErrorKind::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::TransportError(_) | ErrorKind::ProviderInternal(_) | ErrorKind::CacheError(_) => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::Canceled => StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        ErrorKind::NoKeyAvailable(_) | ErrorKind::FallbackExhausted => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionBody {
    messages: Vec<Message>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    stop: Vec<String>,
    #[serde(default)]
    tools: Vec<ToolDefinition>,
    #[serde(default)]
    stream: bool,
}

async fn chat_completions(
    State(state): State<RouterState>,
    Json(envelope): Json<Envelope<ChatCompletionBody>>,
) -> axum::response::Response {
    let stream = envelope.body.stream;
    let body = ChatCompletionRequest {
        messages: envelope.body.messages,
        max_tokens: envelope.body.max_tokens,
        temperature: envelope.body.temperature,
        top_p: envelope.body.top_p,
        stop: envelope.body.stop,
        tools: envelope.body.tools,
        stream,
    };
    let request = build_request(&envelope.provider, &envelope.model, &envelope.fallbacks, &envelope.trace_tags, Operation::ChatCompletion, RequestPayload::ChatCompletion(body));
    dispatch_or_stream(state, request, stream).await
}

#[derive(Debug, Deserialize)]
struct TextCompletionBody {
    prompt: String,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    stop: Vec<String>,
    #[serde(default)]
    stream: bool,
}

async fn text_completions(
    State(state): State<RouterState>,
    Json(envelope): Json<Envelope<TextCompletionBody>>,
) -> axum::response::Response {
    let stream = envelope.body.stream;
    let body = TextCompletionRequest {
        prompt: envelope.body.prompt,
        max_tokens: envelope.body.max_tokens,
        temperature: envelope.body.temperature,
        top_p: envelope.body.top_p,
        stop: envelope.body.stop,
        stream,
    };
    let request = build_request(&envelope.provider, &envelope.model, &envelope.fallbacks, &envelope.trace_tags, Operation::TextCompletion, RequestPayload::TextCompletion(body));
    dispatch_or_stream(state, request, stream).await
}

#[derive(Debug, Deserialize)]
struct EmbeddingBody {
    inputs: Vec<String>,
}

async fn embeddings(
    State(state): State<RouterState>,
    Json(envelope): Json<Envelope<EmbeddingBody>>,
) -> axum::response::Response {
    let body = EmbeddingRequest { inputs: envelope.body.inputs };
    let request = build_request(&envelope.provider, &envelope.model, &envelope.fallbacks, &envelope.trace_tags, Operation::Embedding, RequestPayload::Embedding(body));
    dispatch(state, request).await
}

#[derive(Debug, Deserialize)]
struct SpeechBody {
    input: String,
    voice: String,
    format: AudioFormat,
    #[serde(default)]
    stream: bool,
}

async fn speech(
    State(state): State<RouterState>,
    Json(envelope): Json<Envelope<SpeechBody>>,
) -> axum::response::Response {
    let stream = envelope.body.stream;
    let body = SpeechRequest { input: envelope.body.input, voice: envelope.body.voice, format: envelope.body.format, stream };
    let request = build_request(&envelope.provider, &envelope.model, &envelope.fallbacks, &envelope.trace_tags, Operation::Speech, RequestPayload::Speech(body));
    dispatch_or_stream(state, request, stream).await
}

#[derive(Debug, Deserialize)]
struct TranscriptionBody {
    /// Base64-encoded audio bytes; the wire-neutral spec leaves transport
    /// encoding to the ambient stack, and this gateway is a JSON API.
    audio_base64: String,
    format: AudioFormat,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    stream: bool,
}

async fn transcription(
    State(state): State<RouterState>,
    Json(envelope): Json<Envelope<TranscriptionBody>>,
) -> axum::response::Response {
    let audio = match BASE64.decode(&envelope.body.audio_base64) {
        Ok(bytes) => bytes,
        Err(err) => {
            let message = format!("invalid base64 in audio_base64: {err}");
            return ApiError(GatewayError::new(ErrorKind::InvalidRequest(message), "unassigned")).into_response();
        }
    };
    let stream = envelope.body.stream;
    let body = TranscriptionRequest { audio: audio.into(), format: envelope.body.format, language: envelope.body.language, stream };
    let request = build_request(&envelope.provider, &envelope.model, &envelope.fallbacks, &envelope.trace_tags, Operation::Transcription, RequestPayload::Transcription(body));
    dispatch_or_stream(state, request, stream).await
}

#[derive(Debug, Deserialize)]
struct ListModelsQuery {
    provider: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    page_size: Option<u32>,
}

async fn list_models(State(state): State<RouterState>, Query(query): Query<ListModelsQuery>) -> axum::response::Response {
    let body = ListModelsRequest { page_token: query.page_token, page_size: query.page_size };
    let model = query.model.unwrap_or_default();
    let request = build_request(&query.provider, &model, &[], &BTreeMap::new(), Operation::ListModels, RequestPayload::ListModels(body));
    dispatch(state, request).await
}

#[allow(clippy::too_many_arguments)]
fn build_request(
    provider: &str,
    model: &str,
    fallbacks: &[FallbackTarget],
    trace_tags: &BTreeMap<String, String>,
    operation: Operation,
    payload: RequestPayload,
) -> Request {
    Request {
        id: Default::default(),
        operation,
        provider: provider.to_string(),
        model: model.to_string(),
        fallbacks: fallbacks.to_vec(),
        payload,
        params: Default::default(),
        metadata: RequestMetadata { trace_tags: trace_tags.clone() },
    }
}

async fn dispatch(state: RouterState, request: Request) -> axum::response::Response {
    match state.pipeline.dispatch(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

async fn dispatch_or_stream(state: RouterState, request: Request, stream_requested: bool) -> axum::response::Response {
    if !stream_requested {
        return dispatch(state, request).await;
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    match state.pipeline.dispatch_stream(request, cancel_rx).await {
        Ok(transport) => sse_response(transport, cancel_tx),
        Err(err) => ApiError(err).into_response(),
    }
}

/// Mirrors [`StreamChunk`] into a JSON-serializable wire shape for SSE
/// frames; the domain type itself stays serde-free since it also carries
/// `ErrorKind`, which already has its own tagged wire representation.
#[derive(Debug, Serialize)]
struct StreamChunkWire {
    operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<ChunkDeltaWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<meridian_protocol::Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorKind>,
    provider: String,
    latency_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChunkDeltaWire {
    Text { text: String },
    ToolCallDelta { tool_call: meridian_protocol::ToolCall },
    Audio { audio_base64: String },
    Transcript { text: String },
}

impl From<&StreamChunk> for StreamChunkWire {
    fn from(chunk: &StreamChunk) -> Self {
        let delta = chunk.delta.as_ref().map(|delta| match delta {
            meridian_protocol::ChunkDelta::Text(text) => ChunkDeltaWire::Text { text: text.clone() },
            meridian_protocol::ChunkDelta::ToolCallDelta(tool_call) => {
                ChunkDeltaWire::ToolCallDelta { tool_call: tool_call.clone() }
            }
            meridian_protocol::ChunkDelta::Audio(bytes) => {
                ChunkDeltaWire::Audio { audio_base64: BASE64.encode(bytes) }
            }
            meridian_protocol::ChunkDelta::Transcript(text) => ChunkDeltaWire::Transcript { text: text.clone() },
        });
        StreamChunkWire {
            operation: chunk.operation,
            delta,
            finish_reason: chunk.finish_reason.clone(),
            usage: chunk.usage.clone(),
            error: chunk.error.clone(),
            provider: chunk.extra.provider.clone(),
            latency_ms: chunk.extra.latency_ms,
        }
    }
}

fn sse_frame(chunk: &StreamChunk) -> Bytes {
    let wire = StreamChunkWire::from(chunk);
    let data = serde_json::to_string(&wire).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("data: {data}\n\n"))
}

use bytes::Bytes;

/// Holds the cancel sender alongside the transport so dropping one drops the
/// other: when the caller disconnects mid-stream, `Body::from_stream`'s
/// consumer drops this state, closing the watch channel, which `changed()`
/// on the relay task's receiver observes as an error and treats as a
/// cancellation request (§5 "Cancellation propagates to ... any stream
/// producer loop").
struct StreamState {
    transport: meridian_core::StreamTransport,
    _cancel_tx: watch::Sender<bool>,
}

fn sse_response(transport: meridian_core::StreamTransport, cancel_tx: watch::Sender<bool>) -> axum::response::Response {
    let state = StreamState { transport, _cancel_tx: cancel_tx };
    let body_stream = stream::unfold(state, |mut state| async move {
        let chunk = state.transport.recv().await?;
        let frame = sse_frame(&chunk);
        Some((Ok::<_, std::convert::Infallible>(frame), state))
    });
    let mut response = axum::response::Response::new(Body::from_stream(body_stream));
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("text/event-stream"),
    );
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        axum::http::HeaderValue::from_static("no-cache"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_for_maps_rate_limited_to_429() {
        assert_eq!(status_for(&ErrorKind::RateLimited("slow down".into())), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn status_for_maps_fallback_exhausted_to_503() {
        assert_eq!(status_for(&ErrorKind::FallbackExhausted), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn base64_round_trips_arbitrary_bytes() {
        let original = b"the quick brown fox jumps over the lazy dog";
        let encoded = BASE64.encode(original);
        let decoded = BASE64.decode(encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn base64_decode_rejects_invalid_characters() {
        assert!(BASE64.decode("not valid base64!!").is_err());
    }
}
