//! Implements `meridian_cache::EmbeddingProvider` (the seam documented in
//! that crate: routing the semantic tier's own embedding calls back through
//! this crate's adapters/fallback machinery rather than through the cache
//! lookup path itself, which would recurse). Grounded directly on
//! [`crate::fallback::run`] and [`AdapterCtx`] — an embedding call is
//! dispatched exactly like any other single-attempt provider call, just
//! without a cache lookup around it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meridian_cache::EmbeddingProvider;
use meridian_common::ErrorKind;
use meridian_protocol::{EmbeddingRequest, FallbackTarget};
use meridian_provider_core::AdapterCtx;

use crate::config::CacheConfig;
use crate::fallback::{self, AttemptResult};
use crate::state::AppState;

/// Dispatches `embed()` calls to the `(provider, model)` pair configured
/// under `cache.embedding_provider`/`cache.embedding_model`. Absent that
/// configuration, every call fails fast with `Unsupported` rather than
/// guessing a default embedding model.
pub struct PipelineEmbedder {
    state: Arc<AppState>,
    target: Option<FallbackTarget>,
    attempt_timeout: Duration,
}

impl PipelineEmbedder {
    pub fn new(state: Arc<AppState>, cache_config: &CacheConfig, attempt_timeout: Duration) -> Self {
        let target = match (&cache_config.embedding_provider, &cache_config.embedding_model) {
            (Some(provider), Some(model)) => Some(FallbackTarget::new(provider.clone(), model.clone())),
            _ => None,
        };
        Self { state, target, attempt_timeout }
    }
}

#[async_trait]
impl EmbeddingProvider for PipelineEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ErrorKind> {
        let Some(target) = &self.target else {
            return Err(ErrorKind::Unsupported(
                "cache.embedding_provider/cache.embedding_model are not configured".to_string(),
            ));
        };

        let runtime = self
            .state
            .provider(&target.provider)
            .ok_or_else(|| ErrorKind::InvalidRequest(format!("unknown provider {}", target.provider)))?;

        let deadline = tokio::time::Instant::now() + self.attempt_timeout;
        let acquisition = runtime.pool.acquire(&target.provider, &target.model, deadline).await?;

        let ctx = AdapterCtx {
            request_id: "cache-embedding".to_string(),
            attempt_no: 0,
            deadline: deadline.into_std(),
        };
        let request = EmbeddingRequest { inputs: vec![text.to_string()] };
        let response = runtime
            .adapter
            .embedding(&ctx, acquisition.secret(), &target.model, &request)
            .await?;
        response
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| ErrorKind::ProviderInternal("embedding response carried no vector".to_string()))
    }
}

/// Retries the embedding call against the configured target using the same
/// retry budget as any other pipeline dispatch, since a transient embedding
/// failure should not be treated differently from any other transient
/// provider failure.
pub async fn embed_with_retry(
    embedder: &PipelineEmbedder,
    text: &str,
    pipeline: &crate::config::PipelineConfig,
) -> Result<Vec<f32>, ErrorKind> {
    let Some(target) = embedder.target.clone() else {
        return embedder.embed(text).await;
    };
    fallback::run(&[target], pipeline, |_target, _attempt_no| async move {
        match embedder.embed(text).await {
            Ok(vector) => AttemptResult::Success(vector),
            Err(kind) => AttemptResult::Failure(kind),
        }
    })
    .await
    .map_err(|mut log| log.pop().map(|o| reconstruct_kind(&o)).unwrap_or(ErrorKind::ProviderInternal("embedding failed".into())))
}

fn reconstruct_kind(outcome: &meridian_common::AttemptOutcome) -> ErrorKind {
    use meridian_common::ErrorKindTag::*;
    match outcome.kind {
        InvalidRequest => ErrorKind::InvalidRequest(outcome.message.clone()),
        AuthError => ErrorKind::AuthError(outcome.message.clone()),
        Unsupported => ErrorKind::Unsupported(outcome.message.clone()),
        RateLimited => ErrorKind::RateLimited(outcome.message.clone()),
        TransportError => ErrorKind::TransportError(outcome.message.clone()),
        Timeout => ErrorKind::Timeout(outcome.message.clone()),
        ProviderInternal => ErrorKind::ProviderInternal(outcome.message.clone()),
        BadRequest => ErrorKind::BadRequest(outcome.message.clone()),
        Canceled => ErrorKind::Canceled,
        CacheError => ErrorKind::CacheError(outcome.message.clone()),
        NoKeyAvailable => ErrorKind::NoKeyAvailable(outcome.message.clone()),
        FallbackExhausted => ErrorKind::FallbackExhausted,
    }
}
