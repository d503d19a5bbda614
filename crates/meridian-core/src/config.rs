//! Typed configuration tree mirroring §6's configuration surface: a JSON
//! config file provides the base, scalar fields may be overridden by a
//! `GATEWAY_<SECTION>_<FIELD>` environment variable, and a CLI flag wins over
//! both — the same CLI > ENV > file precedence the ambient stack's
//! [`meridian_common::ServerConfigPatch`] establishes for the server block,
//! generalized here to the cache and pipeline blocks. `providers[]` and
//! `hooks[]` are structural lists with no natural scalar-env-var mapping and
//! so are file-only, same as the teacher's provider/credential rows were
//! database-only rather than CLI-overridable.

use std::path::PathBuf;

use clap::Parser;
use meridian_common::{LogFormat, ServerConfig, ServerConfigPatch};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Redis,
    RedisCluster,
    Weaviate,
    Qdrant,
    Pinecone,
}

impl Default for CacheBackend {
    fn default() -> Self {
        CacheBackend::Qdrant
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackend,
    pub direct_ttl_secs: u64,
    pub vector_threshold: f32,
    pub vector_dimension: usize,
    pub single_flight_deadline_secs: u64,
    /// `(provider, model)` dispatched for the semantic tier's own embedding
    /// calls (§4.7, §9). File-only like `providers[]`/`hooks[]`: a compound
    /// pair has no natural single-scalar env/CLI mapping.
    #[serde(default)]
    pub embedding_provider: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Base URL of the networked `cache.backend` binding (e.g. Qdrant). Not
    /// itemized under §6's configuration surface, which only names the
    /// backend choice; a networked binding still needs somewhere to dial,
    /// the same way `providers[].endpoint` overrides an upstream base.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let policy = meridian_cache::CachePolicy::default();
        Self {
            enabled: policy.enabled,
            backend: CacheBackend::default(),
            direct_ttl_secs: policy.direct_ttl.as_secs(),
            vector_threshold: policy.vector_threshold,
            vector_dimension: policy.vector_dimension,
            single_flight_deadline_secs: policy.single_flight_deadline.as_secs(),
            embedding_provider: None,
            embedding_model: None,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfigPatch {
    pub enabled: Option<bool>,
    pub backend: Option<CacheBackend>,
    pub direct_ttl_secs: Option<u64>,
    pub vector_threshold: Option<f32>,
    pub vector_dimension: Option<usize>,
    pub single_flight_deadline_secs: Option<u64>,
    pub embedding_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub endpoint: Option<String>,
}

impl CacheConfigPatch {
    pub fn overlay(&mut self, other: CacheConfigPatch) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.backend.is_some() {
            self.backend = other.backend;
        }
        if other.direct_ttl_secs.is_some() {
            self.direct_ttl_secs = other.direct_ttl_secs;
        }
        if other.vector_threshold.is_some() {
            self.vector_threshold = other.vector_threshold;
        }
        if other.vector_dimension.is_some() {
            self.vector_dimension = other.vector_dimension;
        }
        if other.single_flight_deadline_secs.is_some() {
            self.single_flight_deadline_secs = other.single_flight_deadline_secs;
        }
        if other.embedding_provider.is_some() {
            self.embedding_provider = other.embedding_provider;
        }
        if other.embedding_model.is_some() {
            self.embedding_model = other.embedding_model;
        }
        if other.endpoint.is_some() {
            self.endpoint = other.endpoint;
        }
    }

    pub fn into_config(self) -> CacheConfig {
        let defaults = CacheConfig::default();
        CacheConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            backend: self.backend.unwrap_or(defaults.backend),
            direct_ttl_secs: self.direct_ttl_secs.unwrap_or(defaults.direct_ttl_secs),
            vector_threshold: self.vector_threshold.unwrap_or(defaults.vector_threshold),
            vector_dimension: self.vector_dimension.unwrap_or(defaults.vector_dimension),
            single_flight_deadline_secs: self
                .single_flight_deadline_secs
                .unwrap_or(defaults.single_flight_deadline_secs),
            embedding_provider: self.embedding_provider,
            embedding_model: self.embedding_model,
            endpoint: self.endpoint,
        }
    }
}

impl From<CacheConfig> for CacheConfigPatch {
    fn from(value: CacheConfig) -> Self {
        Self {
            enabled: Some(value.enabled),
            backend: Some(value.backend),
            direct_ttl_secs: Some(value.direct_ttl_secs),
            vector_threshold: Some(value.vector_threshold),
            vector_dimension: Some(value.vector_dimension),
            single_flight_deadline_secs: Some(value.single_flight_deadline_secs),
            embedding_provider: value.embedding_provider,
            embedding_model: value.embedding_model,
            endpoint: value.endpoint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub attempt_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,
    pub retry_budget: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: 60,
            request_timeout_secs: 120,
            retry_base_ms: 200,
            retry_cap_ms: 5_000,
            retry_budget: 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfigPatch {
    pub attempt_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub retry_base_ms: Option<u64>,
    pub retry_cap_ms: Option<u64>,
    pub retry_budget: Option<u32>,
}

impl PipelineConfigPatch {
    pub fn overlay(&mut self, other: PipelineConfigPatch) {
        if other.attempt_timeout_secs.is_some() {
            self.attempt_timeout_secs = other.attempt_timeout_secs;
        }
        if other.request_timeout_secs.is_some() {
            self.request_timeout_secs = other.request_timeout_secs;
        }
        if other.retry_base_ms.is_some() {
            self.retry_base_ms = other.retry_base_ms;
        }
        if other.retry_cap_ms.is_some() {
            self.retry_cap_ms = other.retry_cap_ms;
        }
        if other.retry_budget.is_some() {
            self.retry_budget = other.retry_budget;
        }
    }

    pub fn into_config(self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            attempt_timeout_secs: self.attempt_timeout_secs.unwrap_or(defaults.attempt_timeout_secs),
            request_timeout_secs: self.request_timeout_secs.unwrap_or(defaults.request_timeout_secs),
            retry_base_ms: self.retry_base_ms.unwrap_or(defaults.retry_base_ms),
            retry_cap_ms: self.retry_cap_ms.unwrap_or(defaults.retry_cap_ms),
            retry_budget: self.retry_budget.unwrap_or(defaults.retry_budget),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    pub value: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default)]
    pub model_allowlist: Vec<String>,
}

fn default_weight() -> u32 {
    1
}

fn default_max_concurrent() -> u32 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub keys: Vec<KeyConfig>,
    pub endpoint: Option<String>,
}

/// Root configuration tree. `providers` and `hooks` come solely from the
/// config file; `cache`/`pipeline`/`server` are layered CLI > ENV > file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub hooks: Vec<String>,
    pub server: ServerConfig,
}

/// CLI flags, each with a matching `GATEWAY_*` environment variable; `clap`
/// resolves CLI > ENV for every field on its own (the same trick the
/// teacher's bootstrap CLI relies on).
#[derive(Debug, Clone, Parser)]
#[command(name = "meridian-gateway", version, about = "Multi-provider AI gateway")]
pub struct CliArgs {
    /// Path to the JSON configuration file.
    #[arg(long, env = "GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "GATEWAY_SERVER_HOST")]
    pub host: Option<String>,
    #[arg(long, env = "GATEWAY_SERVER_PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "GATEWAY_LOG_LEVEL")]
    pub log_level: Option<String>,
    #[arg(long, env = "GATEWAY_LOG_FORMAT")]
    pub log_format: Option<String>,

    #[arg(long, env = "GATEWAY_CACHE_ENABLED")]
    pub cache_enabled: Option<bool>,
    #[arg(long, env = "GATEWAY_CACHE_BACKEND")]
    pub cache_backend: Option<String>,
    #[arg(long, env = "GATEWAY_CACHE_DIRECT_TTL")]
    pub cache_direct_ttl: Option<u64>,
    #[arg(long, env = "GATEWAY_CACHE_VECTOR_THRESHOLD")]
    pub cache_vector_threshold: Option<f32>,
    #[arg(long, env = "GATEWAY_CACHE_VECTOR_DIMENSION")]
    pub cache_vector_dimension: Option<usize>,
    #[arg(long, env = "GATEWAY_CACHE_SINGLE_FLIGHT_DEADLINE")]
    pub cache_single_flight_deadline: Option<u64>,
    #[arg(long, env = "GATEWAY_CACHE_ENDPOINT")]
    pub cache_endpoint: Option<String>,

    #[arg(long, env = "GATEWAY_PIPELINE_ATTEMPT_TIMEOUT")]
    pub pipeline_attempt_timeout: Option<u64>,
    #[arg(long, env = "GATEWAY_PIPELINE_REQUEST_TIMEOUT")]
    pub pipeline_request_timeout: Option<u64>,
    #[arg(long, env = "GATEWAY_PIPELINE_RETRY_BASE")]
    pub pipeline_retry_base: Option<u64>,
    #[arg(long, env = "GATEWAY_PIPELINE_RETRY_CAP")]
    pub pipeline_retry_cap: Option<u64>,
    #[arg(long, env = "GATEWAY_PIPELINE_RETRY_BUDGET")]
    pub pipeline_retry_budget: Option<u32>,
}

fn parse_backend(raw: &str) -> anyhow::Result<CacheBackend> {
    match raw {
        "redis" => Ok(CacheBackend::Redis),
        "redis_cluster" => Ok(CacheBackend::RedisCluster),
        "weaviate" => Ok(CacheBackend::Weaviate),
        "qdrant" => Ok(CacheBackend::Qdrant),
        "pinecone" => Ok(CacheBackend::Pinecone),
        other => Err(anyhow::anyhow!("unknown cache.backend: {other}")),
    }
}

fn parse_log_format(raw: &str) -> anyhow::Result<LogFormat> {
    match raw {
        "pretty" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => Err(anyhow::anyhow!("unknown log.format: {other}")),
    }
}

impl CliArgs {
    /// Server-block patch mirroring [`meridian_common::ServerConfigPatch`].
    fn server_patch(&self) -> anyhow::Result<ServerConfigPatch> {
        Ok(ServerConfigPatch {
            host: self.host.clone(),
            port: self.port,
            log_level: self.log_level.clone(),
            log_format: self.log_format.as_deref().map(parse_log_format).transpose()?,
        })
    }

    fn cache_patch(&self) -> anyhow::Result<CacheConfigPatch> {
        Ok(CacheConfigPatch {
            enabled: self.cache_enabled,
            backend: self.cache_backend.as_deref().map(parse_backend).transpose()?,
            direct_ttl_secs: self.cache_direct_ttl,
            vector_threshold: self.cache_vector_threshold,
            vector_dimension: self.cache_vector_dimension,
            single_flight_deadline_secs: self.cache_single_flight_deadline,
            embedding_provider: None,
            embedding_model: None,
            endpoint: self.cache_endpoint.clone(),
        })
    }

    fn pipeline_patch(&self) -> PipelineConfigPatch {
        PipelineConfigPatch {
            attempt_timeout_secs: self.pipeline_attempt_timeout,
            request_timeout_secs: self.pipeline_request_timeout,
            retry_base_ms: self.pipeline_retry_base,
            retry_cap_ms: self.pipeline_retry_cap,
            retry_budget: self.pipeline_retry_budget,
        }
    }
}

/// Loads the file (if given), overlays CLI/ENV on top (CLI > ENV already
/// resolved per-field by `clap`), and finalizes into a concrete
/// [`GatewayConfig`]. `providers`/`hooks` are taken verbatim from the file.
pub fn load(args: CliArgs) -> anyhow::Result<GatewayConfig> {
    let (providers, hooks, file_server, file_cache, file_pipeline) = match args.config.as_ref() {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|err| anyhow::anyhow!("reading config file {}: {err}", path.display()))?;
            let file: GatewayConfig = serde_json::from_str(&raw)
                .map_err(|err| anyhow::anyhow!("parsing config file {}: {err}", path.display()))?;
            (
                file.providers,
                file.hooks,
                ServerConfigPatch::from(file.server),
                CacheConfigPatch::from(file.cache),
                PipelineConfigPatch {
                    attempt_timeout_secs: Some(file.pipeline.attempt_timeout_secs),
                    request_timeout_secs: Some(file.pipeline.request_timeout_secs),
                    retry_base_ms: Some(file.pipeline.retry_base_ms),
                    retry_cap_ms: Some(file.pipeline.retry_cap_ms),
                    retry_budget: Some(file.pipeline.retry_budget),
                },
            )
        }
        None => (
            Vec::new(),
            Vec::new(),
            ServerConfigPatch::default(),
            CacheConfigPatch::default(),
            PipelineConfigPatch::default(),
        ),
    };

    let mut server = file_server;
    server.overlay(args.server_patch()?);
    let mut cache = file_cache;
    cache.overlay(args.cache_patch()?);
    let mut pipeline = file_pipeline;
    pipeline.overlay(args.pipeline_patch());

    Ok(GatewayConfig {
        providers,
        cache: cache.into_config(),
        pipeline: pipeline.into_config(),
        hooks,
        server: server.into_config()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs {
            config: None,
            host: None,
            port: None,
            log_level: None,
            log_format: None,
            cache_enabled: None,
            cache_backend: None,
            cache_direct_ttl: None,
            cache_vector_threshold: None,
            cache_vector_dimension: None,
            cache_single_flight_deadline: None,
            cache_endpoint: None,
            pipeline_attempt_timeout: None,
            pipeline_request_timeout: None,
            pipeline_retry_base: None,
            pipeline_retry_cap: None,
            pipeline_retry_budget: None,
        }
    }

    #[test]
    fn defaults_load_without_a_config_file() {
        let config = load(base_args()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.backend, CacheBackend::Qdrant);
        assert_eq!(config.pipeline.retry_budget, 2);
    }

    #[test]
    fn cli_flag_overrides_default() {
        let mut args = base_args();
        args.port = Some(9000);
        args.cache_backend = Some("redis".to_string());
        let config = load(args).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.cache.backend, CacheBackend::Redis);
    }

    #[test]
    fn rejects_an_unknown_backend_name() {
        let mut args = base_args();
        args.cache_backend = Some("made-up".to_string());
        assert!(load(args).is_err());
    }
}
