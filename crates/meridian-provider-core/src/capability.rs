use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use meridian_protocol::Operation;

/// Feature flags a (provider, model) pair may support, independent of which
/// operation kinds it accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityFlags {
    pub tool_calls: bool,
    pub vision: bool,
    pub streaming: bool,
    pub structured_output: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityRecord {
    pub operations: HashSet<Operation>,
    pub flags: CapabilityFlags,
}

impl CapabilityRecord {
    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }
}

type CatalogMap = HashMap<(String, String), CapabilityRecord>;

/// Process-wide, read-mostly (provider, model) -> capability map (§4.9).
/// Readers always observe a consistent snapshot; writers publish a whole new
/// map rather than mutating in place, so a reader never sees a half-updated
/// catalog.
#[derive(Clone)]
pub struct CapabilityCatalog {
    inner: Arc<ArcSwap<CatalogMap>>,
}

impl CapabilityCatalog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    pub fn seed(&self, records: impl IntoIterator<Item = ((String, String), CapabilityRecord)>) {
        self.inner.store(Arc::new(records.into_iter().collect()));
    }

    /// Atomically replaces the whole catalog, e.g. after a successful
    /// `ListModels` response refreshes what a provider actually offers.
    pub fn replace(&self, records: CatalogMap) {
        self.inner.store(Arc::new(records));
    }

    /// Folds a single `(provider, model)` entry into the current snapshot
    /// rather than replacing the whole catalog, so a `ListModels` refresh for
    /// one provider doesn't clobber every other provider's seeded entries.
    pub fn upsert(&self, provider: String, model: String, record: CapabilityRecord) {
        let mut next: CatalogMap = (*self.inner.load_full()).clone();
        next.insert((provider, model), record);
        self.inner.store(Arc::new(next));
    }

    pub fn supports(&self, provider: &str, model: &str, operation: Operation) -> bool {
        let snapshot = self.inner.load();
        snapshot
            .get(&(provider.to_string(), model.to_string()))
            .map(|record| record.supports(operation))
            // Unknown (provider, model) pairs are assumed capable; the
            // catalog is informative for gating known-unsupported
            // combinations, not an exhaustive allowlist.
            .unwrap_or(true)
    }

    pub fn get(&self, provider: &str, model: &str) -> Option<CapabilityRecord> {
        self.inner
            .load()
            .get(&(provider.to_string(), model.to_string()))
            .cloned()
    }
}

impl Default for CapabilityCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_pair_defaults_to_supported() {
        let catalog = CapabilityCatalog::new();
        assert!(catalog.supports("openai", "gpt-4o", Operation::ChatCompletion));
    }

    #[test]
    fn seeded_record_gates_unsupported_operation() {
        let catalog = CapabilityCatalog::new();
        let mut record = CapabilityRecord::default();
        record.operations.insert(Operation::Embedding);
        catalog.seed([(("openai".to_string(), "text-embedding-3".to_string()), record)]);
        assert!(catalog.supports("openai", "text-embedding-3", Operation::Embedding));
        assert!(!catalog.supports("openai", "text-embedding-3", Operation::ChatCompletion));
    }
}
