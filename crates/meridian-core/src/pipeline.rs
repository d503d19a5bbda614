//! Request Pipeline (C4, §4.4): the ordered protocol every request passes
//! through — `Normalize -> Cache lookup -> Pre-hooks -> Capability check ->
//! Dispatch -> Post-hooks -> Cache store -> Return`. Non-streaming and
//! streaming requests share steps 1-4; streaming hands the established
//! connection off to [`crate::streaming`] instead of awaiting a single
//! response, and is never cached as a whole (§4.6/§4.7 scope).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meridian_cache::{CacheRecord, LeaseOutcome, TieredCache, VectorStore};
use meridian_common::{ErrorKind, GatewayError};
use meridian_fingerprint::{fingerprint, semantic_projection, FingerprintPolicy};
use meridian_protocol::{
    ExtraFields, FallbackTarget, Request, RequestPayload, Response, ResponsePayload,
};
use meridian_provider_core::{AdapterCtx, ProviderAdapter, UnavailableReason};
use tokio::sync::watch;

use crate::config::PipelineConfig;
use crate::embedding::{self, PipelineEmbedder};
use crate::fallback::{self, AttemptResult};
use crate::hooks::{HookChain, HookContext};
use crate::state::AppState;
use crate::streaming::{self, StreamTransport};

pub struct Pipeline<V> {
    state: Arc<AppState>,
    cache: Arc<TieredCache<PipelineEmbedder, V>>,
    embedder: PipelineEmbedder,
    hooks: HookChain,
}

impl<V: VectorStore + ?Sized> Pipeline<V> {
    pub fn new(
        state: Arc<AppState>,
        cache: Arc<TieredCache<PipelineEmbedder, V>>,
        embedder: PipelineEmbedder,
        hooks: HookChain,
    ) -> Self {
        Self { state, cache, embedder, hooks }
    }

    /// Runs the full non-streaming protocol (§4.4).
    pub async fn dispatch(&self, mut request: Request) -> Result<Response, GatewayError> {
        let pipeline_cfg = self.state.config.load().pipeline.clone();
        let cache_cfg = self.state.config.load().cache.clone();
        let request_id = request.id.to_string();

        // Step 1: Normalize.
        let policy = FingerprintPolicy::default_for(request.operation);
        let fp = fingerprint(&request, &policy).map_err(|kind| GatewayError::new(kind, request_id.clone()))?;
        let projection = semantic_projection(&request, policy.semantic_turns);

        let mut tags: HashMap<String, String> = request.metadata.trace_tags.clone().into_iter().collect();

        // Step 2: Cache lookup. A hit still runs post-hooks before returning,
        // tagged as cache-origin, same as a live dispatch.
        let mut is_cache_builder = false;
        if cache_cfg.enabled {
            let hit = self.cache.lookup(&fp, projection.as_deref()).await;
            if let Some(response) = decode_hit(&hit) {
                return self.respond_from_cache(&mut request, &mut tags, response).await;
            }
            match self.cache.acquire_build_lease(&fp).await {
                LeaseOutcome::Build => is_cache_builder = true,
                LeaseOutcome::Waited => {
                    // The builder we waited on has already released the
                    // lease, either by publishing a record or by failing.
                    // Re-check the direct tier once rather than dispatching
                    // a second upstream call ourselves.
                    let hit = self.cache.lookup(&fp, projection.as_deref()).await;
                    if let Some(response) = decode_hit(&hit) {
                        return self.respond_from_cache(&mut request, &mut tags, response).await;
                    }
                }
            }
        }

        // Step 3: Pre-hooks.
        {
            let mut ctx = HookContext { request: &mut request, tags: &mut tags, short_circuit: None };
            self.hooks.on_request(&mut ctx).await;
            if let Some(mut response) = ctx.short_circuit.take() {
                self.hooks.on_response(&mut ctx, &mut response).await;
                if is_cache_builder {
                    self.cache.abandon_build_lease(&fp).await;
                }
                return Ok(response);
            }
        }

        let targets: Vec<FallbackTarget> = request.targets().collect();

        // Steps 4-5: per-target capability check + dispatch, driven by C5.
        let state = &self.state;
        let hooks = &self.hooks;
        let outcome = {
            let request = &mut request;
            let tags = &mut tags;
            fallback::run(&targets, &pipeline_cfg, move |target, attempt_no| {
                let request = &mut *request;
                let tags = &mut *tags;
                async move {
                    let mut ctx = HookContext { request, tags, short_circuit: None };
                    match attempt_once(state, hooks, &mut ctx, &target, attempt_no, &pipeline_cfg).await {
                        Ok(response) => AttemptResult::Success(response),
                        Err(kind) => AttemptResult::Failure(kind),
                    }
                }
            })
            .await
        };

        let mut response = match outcome {
            Ok(response) => response,
            Err(log) => {
                if is_cache_builder {
                    self.cache.abandon_build_lease(&fp).await;
                }
                return Err(GatewayError::new(ErrorKind::FallbackExhausted, request_id).with_attempts(log));
            }
        };

        // Step 6: Post-hooks.
        {
            let mut ctx = HookContext { request: &mut request, tags: &mut tags, short_circuit: None };
            self.hooks.on_response(&mut ctx, &mut response).await;
        }

        // Step 7: Cache store (a hit would already have returned in step 2).
        // Only the caller holding the build lease publishes a record; a
        // caller that fell through after waiting on someone else's lease
        // dispatched uncached rather than racing a second store/release.
        if cache_cfg.enabled && is_cache_builder {
            self.store_in_cache(&fp, projection.as_deref(), &response, &request, &pipeline_cfg, &cache_cfg.direct_ttl_secs)
                .await;
        }

        // Step 8: Return.
        Ok(response)
    }

    /// Runs a cache-origin response through post-hooks before returning it,
    /// the same as a live dispatch reaches step 6.
    async fn respond_from_cache(
        &self,
        request: &mut Request,
        tags: &mut HashMap<String, String>,
        mut response: Response,
    ) -> Result<Response, GatewayError> {
        let mut ctx = HookContext { request, tags, short_circuit: None };
        self.hooks.on_response(&mut ctx, &mut response).await;
        Ok(response)
    }

    async fn store_in_cache(
        &self,
        fp: &meridian_fingerprint::Fingerprint,
        projection: Option<&str>,
        response: &Response,
        request: &Request,
        pipeline_cfg: &PipelineConfig,
        direct_ttl_secs: &u64,
    ) {
        let Ok(payload) = serde_json::to_vec(response) else {
            tracing::warn!("failed to serialize response for the semantic cache");
            return;
        };
        let tags: Vec<String> = request.metadata.trace_tags.keys().cloned().collect();
        let record = CacheRecord::new(*fp, "application/json", payload, Duration::from_secs(*direct_ttl_secs)).with_tags(tags);

        let embedding = match projection {
            Some(text) => embedding::embed_with_retry(&self.embedder, text, pipeline_cfg).await.ok(),
            None => None,
        };
        self.cache.store(record, embedding).await;
    }

    /// Runs steps 1, 3, 4-5 for a streaming request and hands the
    /// established connection to the bounded relay (§4.6). Streaming
    /// responses are never read from or written to the semantic cache.
    pub async fn dispatch_stream(
        &self,
        mut request: Request,
        cancel: watch::Receiver<bool>,
    ) -> Result<StreamTransport, GatewayError> {
        let pipeline_cfg = self.state.config.load().pipeline.clone();
        let request_id = request.id.to_string();
        let mut tags: HashMap<String, String> = request.metadata.trace_tags.clone().into_iter().collect();

        {
            let mut ctx = HookContext { request: &mut request, tags: &mut tags, short_circuit: None };
            self.hooks.on_request(&mut ctx).await;
            if ctx.short_circuit.is_some() {
                return Err(GatewayError::new(
                    ErrorKind::InvalidRequest(
                        "a hook short-circuited a streaming request with a synthetic response".to_string(),
                    ),
                    request_id,
                ));
            }
        }

        let targets: Vec<FallbackTarget> = request.targets().collect();
        let state = &self.state;
        let hooks = &self.hooks;
        let request_ref = &request;
        let outcome = fallback::run(&targets, &pipeline_cfg, move |target, attempt_no| async move {
            match establish_stream(state, hooks, request_ref, &target, attempt_no, &pipeline_cfg).await {
                Ok(receiver) => AttemptResult::Success(receiver),
                Err(kind) => AttemptResult::Failure(kind),
            }
        })
        .await;

        match outcome {
            Ok(receiver) => Ok(streaming::spawn(receiver, streaming::DEFAULT_CAPACITY, cancel, request.operation)),
            Err(log) => Err(GatewayError::new(ErrorKind::FallbackExhausted, request_id).with_attempts(log)),
        }
    }
}

async fn attempt_once(
    state: &AppState,
    hooks: &HookChain,
    ctx: &mut HookContext<'_>,
    target: &FallbackTarget,
    attempt_no: u32,
    pipeline_cfg: &PipelineConfig,
) -> Result<Response, ErrorKind> {
    hooks.on_before_attempt(ctx).await;
    if let Some(response) = ctx.short_circuit.take() {
        return Ok(response);
    }

    let Some(runtime) = state.provider(&target.provider) else {
        let kind = ErrorKind::InvalidRequest(format!("unknown provider {}", target.provider));
        hooks.on_after_attempt(ctx, Some(&kind)).await;
        return Err(kind);
    };

    if !state.capabilities.supports(&target.provider, &target.model, ctx.request.operation) {
        let kind = ErrorKind::Unsupported(format!(
            "{}/{} does not support {:?}",
            target.provider, target.model, ctx.request.operation
        ));
        hooks.on_after_attempt(ctx, Some(&kind)).await;
        return Err(kind);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(pipeline_cfg.attempt_timeout_secs);
    let acquisition = match runtime.pool.acquire(&target.provider, &target.model, deadline).await {
        Ok(acquisition) => acquisition,
        Err(kind) => {
            hooks.on_after_attempt(ctx, Some(&kind)).await;
            return Err(kind);
        }
    };

    let adapter_ctx = AdapterCtx {
        request_id: ctx.request.id.to_string(),
        attempt_no,
        deadline: deadline.into_std(),
    };
    let result = dispatch_operation(&*runtime.adapter, &adapter_ctx, acquisition.secret(), &target.model, ctx.request).await;

    match result {
        Ok(response) => {
            if let ResponsePayload::ListModels(ref list) = response.payload {
                refresh_capabilities(state, &target.provider, list);
            }
            hooks.on_after_attempt(ctx, None).await;
            Ok(response)
        }
        Err(kind) => {
            if let Some((duration, reason)) = cooldown_for(&kind) {
                runtime.pool.mark_unavailable(acquisition.credential_id(), duration, reason).await;
            }
            hooks.on_after_attempt(ctx, Some(&kind)).await;
            Err(kind)
        }
    }
}

/// Refreshes the capability catalog on every successful `ListModels`
/// response (§4.9). `ListModelsResponse` only names which models exist, not
/// which operations each supports, so a discovered model is upserted with
/// every operation kind enabled rather than narrowing a capability the
/// response gave no evidence against.
fn refresh_capabilities(state: &AppState, provider: &str, list: &meridian_protocol::ListModelsResponse) {
    for model in &list.models {
        let record = meridian_provider_core::CapabilityRecord {
            operations: meridian_protocol::Operation::ALL.into_iter().collect(),
            flags: meridian_provider_core::CapabilityFlags::default(),
        };
        state.capabilities.upsert(provider.to_string(), model.id.clone(), record);
    }
}

async fn dispatch_operation(
    adapter: &dyn ProviderAdapter,
    ctx: &AdapterCtx,
    secret: &str,
    model: &str,
    request: &Request,
) -> Result<Response, ErrorKind> {
    let start = std::time::Instant::now();
    let payload = match &request.payload {
        RequestPayload::ChatCompletion(r) => {
            ResponsePayload::ChatCompletion(adapter.chat_completion(ctx, secret, model, r).await?)
        }
        RequestPayload::TextCompletion(r) => {
            ResponsePayload::TextCompletion(adapter.text_completion(ctx, secret, model, r).await?)
        }
        RequestPayload::Embedding(r) => ResponsePayload::Embedding(adapter.embedding(ctx, secret, model, r).await?),
        RequestPayload::Speech(r) => ResponsePayload::Speech(adapter.speech(ctx, secret, model, r).await?),
        RequestPayload::Transcription(r) => {
            ResponsePayload::Transcription(adapter.transcription(ctx, secret, model, r).await?)
        }
        RequestPayload::ListModels(r) => ResponsePayload::ListModels(adapter.list_models(ctx, secret, r).await?),
    };
    Ok(Response {
        payload,
        extra: ExtraFields {
            provider: adapter.name().to_string(),
            requested_model: request.model.clone(),
            used_model: model.to_string(),
            request_id: request.id,
            latency_ms: start.elapsed().as_millis() as u64,
            from_cache: false,
        },
    })
}

async fn establish_stream(
    state: &AppState,
    hooks: &HookChain,
    request: &Request,
    target: &FallbackTarget,
    attempt_no: u32,
    pipeline_cfg: &PipelineConfig,
) -> Result<meridian_provider_core::ChunkReceiver, ErrorKind> {
    // Hooks need a mutable view; a streaming attempt clones the request so
    // per-attempt hook mutations don't have to survive across attempts that
    // run on genuinely different connections anyway.
    let mut req_copy = request.clone();
    let mut tags_copy = HashMap::new();
    let mut ctx = HookContext { request: &mut req_copy, tags: &mut tags_copy, short_circuit: None };
    hooks.on_before_attempt(&mut ctx).await;

    let Some(runtime) = state.provider(&target.provider) else {
        let kind = ErrorKind::InvalidRequest(format!("unknown provider {}", target.provider));
        hooks.on_after_attempt(&mut ctx, Some(&kind)).await;
        return Err(kind);
    };
    if !state.capabilities.supports(&target.provider, &target.model, request.operation) {
        let kind = ErrorKind::Unsupported(format!(
            "{}/{} does not support streaming {:?}",
            target.provider, target.model, request.operation
        ));
        hooks.on_after_attempt(&mut ctx, Some(&kind)).await;
        return Err(kind);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(pipeline_cfg.attempt_timeout_secs);
    let acquisition = match runtime.pool.acquire(&target.provider, &target.model, deadline).await {
        Ok(acquisition) => acquisition,
        Err(kind) => {
            hooks.on_after_attempt(&mut ctx, Some(&kind)).await;
            return Err(kind);
        }
    };

    let adapter_ctx = AdapterCtx { request_id: request.id.to_string(), attempt_no, deadline: deadline.into_std() };
    let result = match &request.payload {
        RequestPayload::ChatCompletion(r) => {
            runtime.adapter.chat_completion_stream(&adapter_ctx, acquisition.secret(), &target.model, r).await
        }
        RequestPayload::TextCompletion(r) => {
            runtime.adapter.text_completion_stream(&adapter_ctx, acquisition.secret(), &target.model, r).await
        }
        RequestPayload::Speech(r) => {
            runtime.adapter.speech_stream(&adapter_ctx, acquisition.secret(), &target.model, r).await
        }
        _ => Err(ErrorKind::Unsupported("operation has no streaming variant".to_string())),
    };

    match result {
        Ok(receiver) => {
            hooks.on_after_attempt(&mut ctx, None).await;
            Ok(receiver)
        }
        Err(kind) => {
            if let Some((duration, reason)) = cooldown_for(&kind) {
                runtime.pool.mark_unavailable(acquisition.credential_id(), duration, reason).await;
            }
            hooks.on_after_attempt(&mut ctx, Some(&kind)).await;
            Err(kind)
        }
    }
}

/// Maps a classified failure onto a credential cooldown. Adapters only
/// surface the closed [`ErrorKind`] taxonomy at this boundary (not the raw
/// `UpstreamFailure` `ProviderAdapter::decide_unavailable` consults), so the
/// pipeline re-derives the same duration/reason pairing from the kind
/// itself rather than from the original HTTP status.
fn cooldown_for(kind: &ErrorKind) -> Option<(Duration, UnavailableReason)> {
    match kind {
        ErrorKind::RateLimited(_) => Some((Duration::from_secs(30), UnavailableReason::RateLimit)),
        ErrorKind::AuthError(_) => Some((Duration::from_secs(9_999 * 365 * 24 * 60 * 60), UnavailableReason::AuthInvalid)),
        ErrorKind::ProviderInternal(_) => Some((Duration::from_secs(10), UnavailableReason::Upstream5xx)),
        ErrorKind::Timeout(_) | ErrorKind::TransportError(_) => Some((Duration::from_secs(10), UnavailableReason::Timeout)),
        _ => None,
    }
}

fn decode_response(record: &Arc<CacheRecord>) -> Result<Response, ErrorKind> {
    serde_json::from_slice(&record.payload).map_err(|err| ErrorKind::CacheError(err.to_string()))
}

/// Decodes a [`meridian_cache::LookupResult`] hit into a response tagged as
/// cache-origin, or `None` on a miss or an undecodable record.
fn decode_hit(hit: &meridian_cache::LookupResult) -> Option<Response> {
    let record = hit.record()?;
    let mut response = decode_response(record).ok()?;
    response.extra.from_cache = true;
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, GatewayConfig, PipelineConfig as PCfg, ProviderConfig};
    use crate::hooks::HookChain;
    use crate::state::AppState;
    use meridian_cache::vectorstore::memory::InMemoryVectorStore;
    use meridian_cache::CachePolicy;
    use meridian_common::ServerConfig;
    use meridian_protocol::{ChatCompletionRequest, Message, Operation, RequestMetadata, Role};

    fn gateway_config() -> GatewayConfig {
        GatewayConfig {
            providers: vec![ProviderConfig {
                name: "ollama".into(),
                keys: vec![],
                endpoint: Some("http://localhost:11434".into()),
            }],
            cache: CacheConfig { enabled: false, ..CacheConfig::default() },
            pipeline: PCfg::default(),
            hooks: vec![],
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
                log_level: "info".into(),
                log_format: meridian_common::LogFormat::Pretty,
            },
        }
    }

    fn chat_request() -> Request {
        Request {
            id: Default::default(),
            operation: Operation::ChatCompletion,
            provider: "ollama".into(),
            model: "llama3".into(),
            fallbacks: vec![],
            payload: RequestPayload::ChatCompletion(ChatCompletionRequest {
                messages: vec![Message::text(Role::User, "ping")],
                ..Default::default()
            }),
            params: Default::default(),
            metadata: RequestMetadata::default(),
        }
    }

    fn chat_response(provider: &str) -> Response {
        Response {
            payload: ResponsePayload::ChatCompletion(meridian_protocol::ChatCompletionResponse {
                message: Message::text(Role::Assistant, "pong"),
                tool_calls: vec![],
                finish_reason: "stop".into(),
                usage: meridian_protocol::Usage::default(),
            }),
            extra: ExtraFields {
                provider: provider.to_string(),
                requested_model: "llama3".into(),
                used_model: "llama3".into(),
                request_id: Default::default(),
                latency_ms: 0,
                from_cache: false,
            },
        }
    }

    struct Recorder(Arc<std::sync::atomic::AtomicBool>);

    #[async_trait::async_trait]
    impl crate::hooks::Hook for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        async fn on_response(&self, _ctx: &mut HookContext<'_>, _response: &mut Response) {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    struct ShortCircuiter;

    #[async_trait::async_trait]
    impl crate::hooks::Hook for ShortCircuiter {
        fn name(&self) -> &str {
            "short-circuit"
        }

        async fn on_request(&self, ctx: &mut HookContext<'_>) {
            ctx.short_circuit = Some(chat_response("hook"));
        }
    }

    #[tokio::test]
    async fn pre_hook_short_circuit_still_runs_post_hooks() {
        let state = Arc::new(AppState::new(gateway_config()).await.unwrap());
        let cache = Arc::new(
            TieredCache::new(
                PipelineEmbedder::new(state.clone(), &CacheConfig::default(), Duration::from_secs(1)),
                Arc::new(InMemoryVectorStore::new()),
                CachePolicy::default(),
            )
            .await
            .unwrap(),
        );
        let embedder = PipelineEmbedder::new(state.clone(), &CacheConfig::default(), Duration::from_secs(1));
        let observed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let hooks = HookChain::new(vec![Arc::new(ShortCircuiter), Arc::new(Recorder(observed.clone()))]);
        let pipeline = Pipeline::new(state, cache, embedder, hooks);

        let response = pipeline.dispatch(chat_request()).await.unwrap();
        assert_eq!(response.extra.provider, "hook");
        assert!(observed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cache_hit_runs_post_hooks_before_returning() {
        let mut config = gateway_config();
        config.cache.enabled = true;
        let state = Arc::new(AppState::new(config).await.unwrap());

        let cache_embedder = PipelineEmbedder::new(state.clone(), &CacheConfig::default(), Duration::from_secs(1));
        let cache = Arc::new(
            TieredCache::new(cache_embedder, Arc::new(InMemoryVectorStore::new()), CachePolicy::default())
                .await
                .unwrap(),
        );

        let request = chat_request();
        let policy = FingerprintPolicy::default_for(request.operation);
        let fp = fingerprint(&request, &policy).unwrap();
        let payload = serde_json::to_vec(&chat_response("ollama")).unwrap();
        cache.store(CacheRecord::new(fp, "application/json", payload, Duration::from_secs(60)), None).await;

        let observed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let hooks = HookChain::new(vec![Arc::new(Recorder(observed.clone()))]);
        let embedder = PipelineEmbedder::new(state.clone(), &CacheConfig::default(), Duration::from_secs(1));
        let pipeline = Pipeline::new(state, cache, embedder, hooks);

        let response = pipeline.dispatch(request).await.unwrap();
        assert!(response.extra.from_cache);
        assert!(observed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unsupported_operation_surfaces_as_fallback_exhausted() {
        let state = Arc::new(AppState::new(gateway_config()).await.unwrap());
        state.capabilities.seed([(
            ("ollama".to_string(), "llama3".to_string()),
            meridian_provider_core::CapabilityRecord::default(),
        )]);
        let cache = Arc::new(
            TieredCache::new(
                PipelineEmbedder::new(state.clone(), &CacheConfig::default(), Duration::from_secs(1)),
                Arc::new(InMemoryVectorStore::new()),
                CachePolicy::default(),
            )
            .await
            .unwrap(),
        );
        let embedder = PipelineEmbedder::new(state.clone(), &CacheConfig::default(), Duration::from_secs(1));
        let pipeline = Pipeline::new(state, cache, embedder, HookChain::new(vec![]));

        let result = pipeline.dispatch(chat_request()).await;
        assert!(result.is_err());
        let error = result.unwrap_err();
        assert!(matches!(error.kind, ErrorKind::FallbackExhausted));
        assert_eq!(error.attempts.len(), 1);
    }
}
