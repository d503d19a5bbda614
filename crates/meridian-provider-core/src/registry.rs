use std::collections::HashMap;
use std::sync::Arc;

use crate::ProviderAdapter;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ProviderAdapter>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Stub;

    #[async_trait]
    impl ProviderAdapter for Stub {
        fn name(&self) -> &'static str {
            "stub"
        }
    }

    #[test]
    fn register_then_lookup_by_name() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Stub));
        assert!(registry.get("stub").is_some());
        assert!(registry.get("missing").is_none());
    }
}
