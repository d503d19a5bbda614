//! Process-wide state (§9): a configuration snapshot, a capability catalog,
//! and per-provider runtimes (adapter + credential pool), all published via
//! snapshot-swap so reconfiguration never blocks a reader. Grounded on the
//! teacher's `AppState`/`ProviderRuntime` pair, minus the database-backed
//! snapshot the teacher additionally kept (this gateway has no admin store;
//! the config file is the only source of truth for the process lifetime).

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use meridian_common::ErrorKind;
use meridian_provider_core::{CapabilityCatalog, CredentialPool, EventHub, KeyEntry, ProviderAdapter};

use crate::config::{GatewayConfig, ProviderConfig};
use crate::provider_factory::build_adapter;

pub struct ProviderRuntime {
    pub name: String,
    pub adapter: Arc<dyn ProviderAdapter>,
    pub pool: CredentialPool,
}

pub struct AppState {
    pub config: ArcSwap<GatewayConfig>,
    pub providers: ArcSwap<HashMap<String, Arc<ProviderRuntime>>>,
    pub capabilities: CapabilityCatalog,
    pub events: EventHub,
}

impl AppState {
    pub async fn new(config: GatewayConfig) -> Result<Self, ErrorKind> {
        let events = EventHub::new(1024);
        let providers = build_provider_runtimes(&config.providers, &events).await?;
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            providers: ArcSwap::from_pointee(providers),
            capabilities: CapabilityCatalog::new(),
            events,
        })
    }

    pub fn provider(&self, name: &str) -> Option<Arc<ProviderRuntime>> {
        self.providers.load().get(name).cloned()
    }

    /// Atomic swap of one provider's key set (§4.2 `Reconfigure`); in-flight
    /// acquisitions against the old keys continue to hold them until release.
    pub async fn reconfigure_provider(&self, name: &str, keys: Vec<KeyEntry>) {
        if let Some(runtime) = self.provider(name) {
            runtime.pool.reconfigure(name.to_string(), keys).await;
        }
    }
}

async fn build_provider_runtimes(
    providers: &[ProviderConfig],
    events: &EventHub,
) -> Result<HashMap<String, Arc<ProviderRuntime>>, ErrorKind> {
    let mut map = HashMap::new();
    for provider in providers {
        let adapter = build_adapter(provider)?;
        let pool = CredentialPool::new(events.clone());
        let keys: Vec<KeyEntry> = provider
            .keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                KeyEntry::new(
                    i as i64,
                    key.value.clone(),
                    key.weight,
                    key.max_concurrent,
                    key.model_allowlist.clone(),
                )
            })
            .collect();
        // Ollama has no auth and no key rotation: a single synthetic
        // always-available entry stands in for a credential (§4.3).
        let keys = if keys.is_empty() && provider.name == "ollama" {
            vec![KeyEntry::new(0, "", 1, u32::MAX, vec![])]
        } else {
            keys
        };
        pool.reconfigure(provider.name.clone(), keys).await;
        map.insert(
            provider.name.clone(),
            Arc::new(ProviderRuntime { name: provider.name.clone(), adapter, pool }),
        );
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, KeyConfig, PipelineConfig};
    use meridian_common::ServerConfig;

    fn config_with(providers: Vec<ProviderConfig>) -> GatewayConfig {
        GatewayConfig {
            providers,
            cache: CacheConfig::default(),
            pipeline: PipelineConfig::default(),
            hooks: vec![],
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
                log_level: "info".into(),
                log_format: meridian_common::LogFormat::Pretty,
            },
        }
    }

    #[tokio::test]
    async fn ollama_gets_a_synthetic_always_available_key() {
        let config = config_with(vec![ProviderConfig { name: "ollama".into(), keys: vec![], endpoint: None }]);
        let state = AppState::new(config).await.unwrap();
        let runtime = state.provider("ollama").unwrap();
        let acquisition = runtime
            .pool
            .acquire("ollama", "llama3", tokio::time::Instant::now() + std::time::Duration::from_millis(50))
            .await;
        assert!(acquisition.is_ok());
    }

    #[tokio::test]
    async fn configured_keys_are_loaded_into_the_pool() {
        let config = config_with(vec![ProviderConfig {
            name: "openai".into(),
            keys: vec![KeyConfig { value: "sk-test".into(), weight: 1, max_concurrent: 2, model_allowlist: vec![] }],
            endpoint: None,
        }]);
        let state = AppState::new(config).await.unwrap();
        let runtime = state.provider("openai").unwrap();
        let acquisition = runtime
            .pool
            .acquire("openai", "gpt-4o", tokio::time::Instant::now() + std::time::Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(acquisition.secret(), "sk-test");
    }

    #[tokio::test]
    async fn unknown_provider_name_fails_state_construction() {
        let config = config_with(vec![ProviderConfig { name: "nope".into(), keys: vec![], endpoint: None }]);
        assert!(AppState::new(config).await.is_err());
    }
}
