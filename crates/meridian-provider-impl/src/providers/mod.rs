pub mod anthropic;
pub mod bedrock;
pub mod google;
pub mod ollama;
pub mod openai;

use meridian_common::ErrorKind;
use meridian_provider_core::{UpstreamFailure, classify_failure};

/// Maps a non-2xx HTTP response into the closed error taxonomy, reusing the
/// generic status-code rules every adapter shares unless it has
/// provider-specific semantics to apply instead.
fn http_error(status: u16, body: &str) -> ErrorKind {
    let kind = classify_failure(&UpstreamFailure::Http {
        status,
        headers: Vec::new(),
        body_snippet: body.chars().take(512).collect(),
    });
    tracing::warn!(status, retryable = kind.is_retryable(), "upstream returned an error response");
    kind
}
