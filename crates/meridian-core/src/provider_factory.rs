//! Builds a concrete [`ProviderAdapter`] from a [`ProviderConfig`]'s `name`,
//! the same role `register_builtin_providers` played in the teacher's
//! bootstrap, reduced to direct construction now that there is no admin
//! database seeding a provider table — a provider's adapter type is
//! determined entirely by its configured name.

use std::sync::Arc;

use meridian_common::ErrorKind;
use meridian_provider_core::ProviderAdapter;
use meridian_provider_impl::{AnthropicAdapter, BedrockAdapter, GoogleAdapter, OllamaAdapter, OpenAiAdapter};

use crate::config::ProviderConfig;

pub fn build_adapter(config: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>, ErrorKind> {
    let endpoint = config.endpoint.clone();
    let adapter: Arc<dyn ProviderAdapter> = match config.name.as_str() {
        "openai" => Arc::new(OpenAiAdapter::new(endpoint)),
        "azure-openai" => {
            let endpoint = endpoint.ok_or_else(|| {
                ErrorKind::InvalidRequest("azure-openai requires providers[].endpoint".to_string())
            })?;
            Arc::new(OpenAiAdapter::azure(endpoint))
        }
        "mistral" => Arc::new(OpenAiAdapter::mistral(endpoint)),
        "anthropic" => Arc::new(AnthropicAdapter::new(endpoint)),
        "google" => Arc::new(GoogleAdapter::new(endpoint)),
        "bedrock" => Arc::new(BedrockAdapter::new(endpoint)),
        "ollama" => Arc::new(OllamaAdapter::new(endpoint)),
        other => {
            return Err(ErrorKind::InvalidRequest(format!(
                "unknown provider adapter: {other}"
            )));
        }
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    #[test]
    fn known_provider_name_builds_an_adapter() {
        let config = ProviderConfig { name: "openai".to_string(), keys: vec![], endpoint: None };
        let adapter = build_adapter(&config).unwrap();
        assert_eq!(adapter.name(), "openai");
    }

    #[test]
    fn azure_openai_requires_an_endpoint() {
        let config = ProviderConfig { name: "azure-openai".to_string(), keys: vec![], endpoint: None };
        assert!(build_adapter(&config).is_err());
    }

    #[test]
    fn unknown_provider_name_is_rejected() {
        let config = ProviderConfig { name: "not-a-real-provider".to_string(), keys: vec![], endpoint: None };
        assert!(build_adapter(&config).is_err());
    }
}
