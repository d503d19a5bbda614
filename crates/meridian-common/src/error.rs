use serde::Serialize;
use std::time::Duration;

/// Closed error taxonomy surfaced to callers. Every fallible operation in the
/// workspace eventually maps its failure onto one of these variants.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("authentication rejected: {0}")]
    AuthError(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("provider internal error: {0}")]
    ProviderInternal(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("canceled")]
    Canceled,
    #[error("cache error: {0}")]
    CacheError(String),
    #[error("no key available: {0}")]
    NoKeyAvailable(String),
    #[error("fallback exhausted")]
    FallbackExhausted,
}

impl ErrorKind {
    /// Whether an attempt that failed with this kind should be retried
    /// against the *same* target before moving to the next fallback.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransportError(_)
                | ErrorKind::RateLimited(_)
                | ErrorKind::Timeout(_)
                | ErrorKind::ProviderInternal(_)
        )
    }

    /// Whether the fallback state machine should try the next target at all
    /// (as opposed to aborting outright, e.g. on `Canceled`).
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, ErrorKind::Canceled)
    }
}

/// One attempt's outcome, recorded in the fallback attempt log and surfaced
/// to the caller as part of `GatewayError::FallbackExhausted`.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptOutcome {
    pub provider: String,
    pub model: String,
    pub attempt: u32,
    pub kind: ErrorKindTag,
    pub message: String,
    pub latency: Duration,
}

/// A serializable tag mirroring `ErrorKind`'s variants without payload, used
/// so `AttemptOutcome` logs stay compact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKindTag {
    InvalidRequest,
    AuthError,
    Unsupported,
    RateLimited,
    TransportError,
    Timeout,
    ProviderInternal,
    BadRequest,
    Canceled,
    CacheError,
    NoKeyAvailable,
    FallbackExhausted,
}

impl From<&ErrorKind> for ErrorKindTag {
    fn from(value: &ErrorKind) -> Self {
        match value {
            ErrorKind::InvalidRequest(_) => ErrorKindTag::InvalidRequest,
            ErrorKind::AuthError(_) => ErrorKindTag::AuthError,
            ErrorKind::Unsupported(_) => ErrorKindTag::Unsupported,
            ErrorKind::RateLimited(_) => ErrorKindTag::RateLimited,
            ErrorKind::TransportError(_) => ErrorKindTag::TransportError,
            ErrorKind::Timeout(_) => ErrorKindTag::Timeout,
            ErrorKind::ProviderInternal(_) => ErrorKindTag::ProviderInternal,
            ErrorKind::BadRequest(_) => ErrorKindTag::BadRequest,
            ErrorKind::Canceled => ErrorKindTag::Canceled,
            ErrorKind::CacheError(_) => ErrorKindTag::CacheError,
            ErrorKind::NoKeyAvailable(_) => ErrorKindTag::NoKeyAvailable,
            ErrorKind::FallbackExhausted => ErrorKindTag::FallbackExhausted,
        }
    }
}

/// The error value returned to an external caller: a kind plus the attempt
/// log that produced it and the request id it happened under.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{kind}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub request_id: String,
    pub attempts: Vec<AttemptOutcome>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, request_id: impl Into<String>) -> Self {
        Self {
            kind,
            request_id: request_id.into(),
            attempts: Vec::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<AttemptOutcome>) -> Self {
        self.attempts = attempts;
        self
    }
}
