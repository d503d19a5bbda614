use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use meridian_cache::vectorstore::memory::InMemoryVectorStore;
use meridian_cache::vectorstore::qdrant::QdrantVectorStore;
use meridian_cache::{CachePolicy, TieredCache, VectorStore};
use meridian_common::LogFormat;
use meridian_core::config::{CacheBackend, CliArgs};
use meridian_core::hooks::{CacheInvalidationHook, LoggingHook};
use meridian_core::{AppState, GatewayConfig, Hook, HookChain, Pipeline, PipelineEmbedder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = meridian_core::config::load(args)?;

    init_tracing(&config);

    let bind = format!("{}:{}", config.server.host, config.server.port);
    let hooks = config.hooks.clone();
    let cache_policy = cache_policy(&config);
    let attempt_timeout = Duration::from_secs(config.pipeline.attempt_timeout_secs);

    let state = Arc::new(AppState::new(config.clone()).await?);

    let vector_store = build_vector_store(&config)?;
    let cache_embedder = PipelineEmbedder::new(state.clone(), &config.cache, attempt_timeout);
    let cache = Arc::new(TieredCache::new(cache_embedder, vector_store, cache_policy).await?);
    let hook_chain = HookChain::new(build_hooks(&hooks, &cache));

    let embedder = PipelineEmbedder::new(state.clone(), &config.cache, attempt_timeout);
    let pipeline: Arc<Pipeline<dyn VectorStore>> = Arc::new(Pipeline::new(state, cache, embedder, hook_chain));

    let app = meridian_router::build_router(pipeline);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "meridian-gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(config: &GatewayConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::fmt().with_env_filter(filter);
    match config.server.log_format {
        LogFormat::Json => registry.json().init(),
        LogFormat::Pretty => registry.init(),
    }
}

fn cache_policy(config: &GatewayConfig) -> CachePolicy {
    CachePolicy {
        enabled: config.cache.enabled,
        direct_capacity: CachePolicy::default().direct_capacity,
        direct_ttl: Duration::from_secs(config.cache.direct_ttl_secs),
        vector_threshold: config.cache.vector_threshold,
        vector_dimension: config.cache.vector_dimension,
        single_flight_deadline: Duration::from_secs(config.cache.single_flight_deadline_secs),
    }
}

/// Only `qdrant` has a networked binding in this build (§9 open question);
/// every other `cache.backend` choice is a startup configuration error
/// rather than a silently faked binding. `redis`/`redis_cluster`/`weaviate`/
/// `pinecone` selections would each need their own `VectorStore` impl added
/// to `meridian-cache` before they can be wired in here.
fn build_vector_store(config: &GatewayConfig) -> anyhow::Result<Arc<dyn VectorStore>> {
    if !config.cache.enabled {
        return Ok(Arc::new(InMemoryVectorStore::new()));
    }
    match config.cache.backend {
        CacheBackend::Qdrant => {
            let endpoint = config
                .cache
                .endpoint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("cache.backend = qdrant requires cache.endpoint"))?;
            Ok(Arc::new(QdrantVectorStore::new(endpoint)?))
        }
        other => Err(anyhow::anyhow!(
            "cache.backend = {other:?} has no vector store binding in this build; only qdrant is implemented"
        )),
    }
}

fn build_hooks(
    configured: &[String],
    cache: &Arc<TieredCache<PipelineEmbedder, dyn VectorStore>>,
) -> Vec<Arc<dyn Hook>> {
    let mut hooks: Vec<Arc<dyn Hook>> = Vec::new();
    for name in configured {
        match name.as_str() {
            "logging" => hooks.push(Arc::new(LoggingHook)),
            "cache-invalidation" => hooks.push(Arc::new(CacheInvalidationHook::new(cache.clone()))),
            other => tracing::warn!(hook = other, "unknown hook id in config.hooks, skipping"),
        }
    }
    hooks
}
