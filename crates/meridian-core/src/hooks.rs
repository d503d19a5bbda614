//! Hook/Plugin Chain (C8, §4.8, §9). A hook never owns the pipeline: it is
//! invoked with a narrow [`HookContext`] carrying only the mutable request
//! view, a tag map, and a short-circuit sink, so the chain's teardown is a
//! plain `Vec` drop with no ownership cycle back into the pipeline.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use meridian_common::ErrorKind;
use meridian_protocol::{Request, Response};

/// Context threaded through one lifecycle callback. `tags` persists across
/// every stage of one request's lifecycle so later hooks (or the cache
/// invalidation hook) can observe what an earlier hook attached.
pub struct HookContext<'a> {
    pub request: &'a mut Request,
    pub tags: &'a mut HashMap<String, String>,
    pub short_circuit: Option<Response>,
}

#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_request(&self, _ctx: &mut HookContext<'_>) {}
    async fn on_before_attempt(&self, _ctx: &mut HookContext<'_>) {}
    async fn on_after_attempt(&self, _ctx: &mut HookContext<'_>, _error: Option<&ErrorKind>) {}
    async fn on_response(&self, _ctx: &mut HookContext<'_>, _response: &mut Response) {}
    async fn on_stream_chunk(&self, _ctx: &mut HookContext<'_>) {}
    async fn on_error(&self, _ctx: &mut HookContext<'_>, _error: &ErrorKind) {}
}

/// Registered hooks in install order. `on_request`/`on_before_attempt` run
/// forward; `on_after_attempt`/`on_response`/`on_error` run in reverse (§4.8).
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookChain {
    pub fn new(hooks: Vec<Arc<dyn Hook>>) -> Self {
        Self { hooks }
    }

    pub async fn on_request(&self, ctx: &mut HookContext<'_>) {
        for hook in &self.hooks {
            if ctx.short_circuit.is_some() {
                break;
            }
            run_guarded(hook.name(), hook.on_request(ctx)).await;
        }
    }

    pub async fn on_before_attempt(&self, ctx: &mut HookContext<'_>) {
        for hook in &self.hooks {
            run_guarded(hook.name(), hook.on_before_attempt(ctx)).await;
        }
    }

    pub async fn on_after_attempt(&self, ctx: &mut HookContext<'_>, error: Option<&ErrorKind>) {
        for hook in self.hooks.iter().rev() {
            run_guarded(hook.name(), hook.on_after_attempt(ctx, error)).await;
        }
    }

    pub async fn on_response(&self, ctx: &mut HookContext<'_>, response: &mut Response) {
        for hook in self.hooks.iter().rev() {
            run_guarded(hook.name(), hook.on_response(ctx, response)).await;
        }
    }

    pub async fn on_error(&self, ctx: &mut HookContext<'_>, error: &ErrorKind) {
        for hook in self.hooks.iter().rev() {
            run_guarded(hook.name(), hook.on_error(ctx, error)).await;
        }
    }
}

/// Runs one callback, catching a panic so a faulting hook degrades to a
/// no-op for this request rather than failing it (§4.8). Only effective
/// under unwind panic strategy; release builds set `panic = "abort"` at the
/// workspace level and this guard cannot intercept an abort.
async fn run_guarded<F: std::future::Future<Output = ()>>(name: &str, fut: F) {
    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
        tracing::error!(hook = name, "hook panicked; treated as a no-op for this request");
    }
}

/// Structured-logging built-in hook (§4.8): a debug-level line per lifecycle
/// callback body, an info-level line per outcome.
pub struct LoggingHook;

#[async_trait]
impl Hook for LoggingHook {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_request(&self, ctx: &mut HookContext<'_>) {
        tracing::debug!(request_id = %ctx.request.id, operation = ?ctx.request.operation, "on_request");
    }

    async fn on_before_attempt(&self, ctx: &mut HookContext<'_>) {
        tracing::debug!(request_id = %ctx.request.id, "on_before_attempt");
    }

    async fn on_after_attempt(&self, ctx: &mut HookContext<'_>, error: Option<&ErrorKind>) {
        match error {
            Some(err) => tracing::info!(request_id = %ctx.request.id, error = %err, "attempt failed"),
            None => tracing::info!(request_id = %ctx.request.id, "attempt succeeded"),
        }
    }

    async fn on_response(&self, ctx: &mut HookContext<'_>, response: &mut Response) {
        tracing::info!(
            request_id = %ctx.request.id,
            provider = %response.extra.provider,
            from_cache = response.extra.from_cache,
            "on_response"
        );
    }

    async fn on_error(&self, ctx: &mut HookContext<'_>, error: &ErrorKind) {
        tracing::info!(request_id = %ctx.request.id, error = %error, "on_error");
    }
}

/// Tag-based cache-invalidation hook (§4.8): listens for an `invalidate` tag
/// an upstream admin action attached to the request and publishes the
/// invalidation to C7 by fingerprint or by tag key.
pub struct CacheInvalidationHook<E, V> {
    cache: Arc<meridian_cache::TieredCache<E, V>>,
}

impl<E, V> CacheInvalidationHook<E, V> {
    pub fn new(cache: Arc<meridian_cache::TieredCache<E, V>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl<E, V> Hook for CacheInvalidationHook<E, V>
where
    E: meridian_cache::EmbeddingProvider + Send + Sync,
    V: meridian_cache::VectorStore + Send + Sync + ?Sized,
{
    fn name(&self) -> &str {
        "cache-invalidation"
    }

    async fn on_request(&self, ctx: &mut HookContext<'_>) {
        if let Some(tag) = ctx.tags.get("invalidate").cloned() {
            self.cache.invalidate_by_tag(&tag).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_protocol::{
        ChatCompletionRequest, ExtraFields, Message, Operation, RequestMetadata, RequestPayload,
        ResponsePayload, Role, Usage,
    };

    fn request() -> Request {
        Request {
            id: Default::default(),
            operation: Operation::ChatCompletion,
            provider: "openai".into(),
            model: "gpt-4o".into(),
            fallbacks: vec![],
            payload: RequestPayload::ChatCompletion(ChatCompletionRequest {
                messages: vec![Message::text(Role::User, "hi")],
                ..Default::default()
            }),
            params: Default::default(),
            metadata: RequestMetadata::default(),
        }
    }

    struct PanickingHook;

    #[async_trait]
    impl Hook for PanickingHook {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn on_request(&self, _ctx: &mut HookContext<'_>) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn a_panicking_hook_does_not_abort_the_chain() {
        let chain = HookChain::new(vec![Arc::new(PanickingHook), Arc::new(LoggingHook)]);
        let mut request = request();
        let mut tags = HashMap::new();
        let mut ctx = HookContext { request: &mut request, tags: &mut tags, short_circuit: None };
        chain.on_request(&mut ctx).await;
    }

    struct ShortCircuiter;

    #[async_trait]
    impl Hook for ShortCircuiter {
        fn name(&self) -> &str {
            "short-circuit"
        }

        async fn on_request(&self, ctx: &mut HookContext<'_>) {
            ctx.short_circuit = Some(Response {
                payload: ResponsePayload::ChatCompletion(meridian_protocol::ChatCompletionResponse {
                    message: Message::text(Role::Assistant, "synthetic"),
                    tool_calls: vec![],
                    finish_reason: "stop".into(),
                    usage: Usage::default(),
                }),
                extra: ExtraFields {
                    provider: "hook".into(),
                    requested_model: "gpt-4o".into(),
                    used_model: "gpt-4o".into(),
                    request_id: Default::default(),
                    latency_ms: 0,
                    from_cache: false,
                },
            });
        }
    }

    struct Tripwire(std::sync::atomic::AtomicBool);

    #[async_trait]
    impl Hook for Tripwire {
        fn name(&self) -> &str {
            "tripwire"
        }

        async fn on_request(&self, _ctx: &mut HookContext<'_>) {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn later_hooks_skip_on_request_after_a_short_circuit() {
        let tripwire = Arc::new(Tripwire(std::sync::atomic::AtomicBool::new(false)));
        let chain = HookChain::new(vec![Arc::new(ShortCircuiter), tripwire.clone()]);
        let mut request = request();
        let mut tags = HashMap::new();
        let mut ctx = HookContext { request: &mut request, tags: &mut tags, short_circuit: None };
        chain.on_request(&mut ctx).await;
        assert!(ctx.short_circuit.is_some());
        assert!(!tripwire.0.load(std::sync::atomic::Ordering::SeqCst));
    }
}
