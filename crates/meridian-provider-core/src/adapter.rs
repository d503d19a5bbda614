use async_trait::async_trait;
use meridian_common::ErrorKind;
use meridian_protocol::{
    ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse,
    ListModelsRequest, ListModelsResponse, SpeechRequest, SpeechResponse, StreamChunk,
    TextCompletionRequest, TextCompletionResponse, TranscriptionRequest, TranscriptionResponse,
};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::headers::Headers;

pub type ProviderResult<T> = Result<T, ErrorKind>;

/// Per-call context threaded through every adapter method: identifies the
/// request for logging and carries the deadline every adapter call must
/// honor (§5 timeouts). Cancellation is observed by the streaming transport
/// layer above the adapter boundary, not by the adapter itself.
#[derive(Debug, Clone)]
pub struct AdapterCtx {
    pub request_id: String,
    pub attempt_no: u32,
    pub deadline: std::time::Instant,
}

/// The HTTP-shaped failure an adapter observed, used by `decide_unavailable`
/// to classify it into a credential cooldown decision. Adapters construct
/// this from whatever transport error or non-2xx response they received;
/// the core never constructs one itself.
#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    Http {
        status: u16,
        headers: Headers,
        body_snippet: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Dns,
    Tls,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnavailableDecision {
    pub duration: Duration,
    pub reason: crate::UnavailableReason,
}

const RATE_LIMIT_FALLBACK_SECS: u64 = 30;
const SHORT_COOLDOWN_SECS: u64 = 10;
const AUTH_INVALID_YEARS: u64 = 9_999;

/// Default HTTP-status-to-cooldown mapping, reused by every adapter unless
/// it has provider-specific error semantics to apply instead.
pub fn default_decide_unavailable(failure: &UpstreamFailure) -> Option<UnavailableDecision> {
    match failure {
        UpstreamFailure::Http { status, headers, .. } => match *status {
            404 => None,
            429 => Some(UnavailableDecision {
                duration: parse_retry_after(headers)
                    .unwrap_or_else(|| Duration::from_secs(RATE_LIMIT_FALLBACK_SECS)),
                reason: crate::UnavailableReason::RateLimit,
            }),
            401 | 403 => Some(UnavailableDecision {
                duration: auth_invalid_duration(),
                reason: crate::UnavailableReason::AuthInvalid,
            }),
            500..=599 => Some(UnavailableDecision {
                duration: Duration::from_secs(SHORT_COOLDOWN_SECS),
                reason: crate::UnavailableReason::Upstream5xx,
            }),
            _ => None,
        },
        UpstreamFailure::Transport { .. } => Some(UnavailableDecision {
            duration: Duration::from_secs(SHORT_COOLDOWN_SECS),
            reason: crate::UnavailableReason::Timeout,
        }),
    }
}

fn parse_retry_after(headers: &Headers) -> Option<Duration> {
    let value = crate::headers::header_get(headers, "retry-after")?;
    let secs: u64 = value.trim().parse().ok()?;
    Some(Duration::from_secs(secs))
}

fn auth_invalid_duration() -> Duration {
    Duration::from_secs(AUTH_INVALID_YEARS * 365 * 24 * 60 * 60)
}

/// Maps a raw transport failure (timeout, connection refused, DNS, TLS) or
/// an HTTP status code into the closed error taxonomy callers observe.
pub fn classify_failure(failure: &UpstreamFailure) -> ErrorKind {
    match failure {
        UpstreamFailure::Transport { kind, message } => match kind {
            TransportErrorKind::Timeout => ErrorKind::Timeout(message.clone()),
            _ => ErrorKind::TransportError(message.clone()),
        },
        UpstreamFailure::Http { status, body_snippet, .. } => match *status {
            429 => ErrorKind::RateLimited(body_snippet.clone()),
            401 | 403 => ErrorKind::AuthError(body_snippet.clone()),
            400 | 404 | 409 | 422 => ErrorKind::BadRequest(body_snippet.clone()),
            500..=599 => ErrorKind::ProviderInternal(body_snippet.clone()),
            _ => ErrorKind::ProviderInternal(body_snippet.clone()),
        },
    }
}

/// A streamed response body: each element already translated into the
/// canonical `StreamChunk` shape. The adapter produces the final chunk
/// (§4.6); the pipeline's streaming transport re-wraps this receiver with
/// bounding, deep-copy, and cancellation semantics.
pub type ChunkReceiver = mpsc::Receiver<StreamChunk>;

/// Uniform capability surface every upstream adapter implements (§4.3). Each
/// method takes the credential secret selected by the key pool rather than
/// reaching into the pool itself — adapters have no knowledge of pooling.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn chat_completion(
        &self,
        ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChatCompletionResponse> {
        let _ = (ctx, secret, model, request);
        Err(ErrorKind::Unsupported(format!(
            "{} does not implement chat_completion",
            self.name()
        )))
    }

    async fn chat_completion_stream(
        &self,
        ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChunkReceiver> {
        let _ = (ctx, secret, model, request);
        Err(ErrorKind::Unsupported(format!(
            "{} does not implement streaming chat_completion",
            self.name()
        )))
    }

    async fn text_completion(
        &self,
        ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &TextCompletionRequest,
    ) -> ProviderResult<TextCompletionResponse> {
        let _ = (ctx, secret, model, request);
        Err(ErrorKind::Unsupported(format!(
            "{} does not implement text_completion",
            self.name()
        )))
    }

    async fn text_completion_stream(
        &self,
        ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &TextCompletionRequest,
    ) -> ProviderResult<ChunkReceiver> {
        let _ = (ctx, secret, model, request);
        Err(ErrorKind::Unsupported(format!(
            "{} does not implement streaming text_completion",
            self.name()
        )))
    }

    async fn embedding(
        &self,
        ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &EmbeddingRequest,
    ) -> ProviderResult<EmbeddingResponse> {
        let _ = (ctx, secret, model, request);
        Err(ErrorKind::Unsupported(format!(
            "{} does not implement embedding",
            self.name()
        )))
    }

    async fn speech(
        &self,
        ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &SpeechRequest,
    ) -> ProviderResult<SpeechResponse> {
        let _ = (ctx, secret, model, request);
        Err(ErrorKind::Unsupported(format!(
            "{} does not implement speech",
            self.name()
        )))
    }

    async fn speech_stream(
        &self,
        ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &SpeechRequest,
    ) -> ProviderResult<ChunkReceiver> {
        let _ = (ctx, secret, model, request);
        Err(ErrorKind::Unsupported(format!(
            "{} does not implement streaming speech",
            self.name()
        )))
    }

    async fn transcription(
        &self,
        ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &TranscriptionRequest,
    ) -> ProviderResult<TranscriptionResponse> {
        let _ = (ctx, secret, model, request);
        Err(ErrorKind::Unsupported(format!(
            "{} does not implement transcription",
            self.name()
        )))
    }

    async fn list_models(
        &self,
        ctx: &AdapterCtx,
        secret: &str,
        request: &ListModelsRequest,
    ) -> ProviderResult<ListModelsResponse> {
        let _ = (ctx, secret, request);
        Err(ErrorKind::Unsupported(format!(
            "{} does not implement list_models",
            self.name()
        )))
    }

    /// Classifies an upstream failure into a credential cooldown decision.
    /// Overridden by adapters whose upstream has non-standard status-code
    /// semantics; defaults to the generic HTTP mapping.
    fn decide_unavailable(&self, failure: &UpstreamFailure) -> Option<UnavailableDecision> {
        default_decide_unavailable(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Mute;

    #[async_trait]
    impl ProviderAdapter for Mute {
        fn name(&self) -> &'static str {
            "mute"
        }
    }

    #[tokio::test]
    async fn default_methods_report_unsupported() {
        let adapter = Mute;
        let ctx = AdapterCtx {
            request_id: "r1".into(),
            attempt_no: 1,
            deadline: std::time::Instant::now() + Duration::from_secs(1),
        };
        let result = adapter
            .embedding(&ctx, "secret", "m", &EmbeddingRequest { inputs: vec!["hi".into()] })
            .await;
        assert!(matches!(result, Err(ErrorKind::Unsupported(_))));
    }

    #[test]
    fn rate_limit_maps_to_retryable_kind() {
        let failure = UpstreamFailure::Http {
            status: 429,
            headers: vec![],
            body_snippet: "slow down".into(),
        };
        assert!(matches!(classify_failure(&failure), ErrorKind::RateLimited(_)));
        let decision = default_decide_unavailable(&failure).unwrap();
        assert_eq!(decision.reason, crate::UnavailableReason::RateLimit);
    }
}
