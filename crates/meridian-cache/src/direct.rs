//! The direct/exact-match tier: an in-process bounded-by-entry-count LRU in
//! front of the notional durable store, keyed by [`Fingerprint`]. Grounded on
//! the `moka::sync::Cache`-backed `L1Cache` pattern — generalized from a
//! fixed hash-keyed payload handle to a full [`CacheRecord`] with its own TTL
//! (§4.7: "in-process bounded LRU sized by entry count in front of a durable
//! TTL record").

use std::sync::Arc;

use meridian_fingerprint::Fingerprint;
use moka::sync::Cache;

use crate::record::CacheRecord;

#[derive(Clone)]
pub struct DirectTier {
    entries: Cache<[u8; 32], Arc<CacheRecord>>,
}

impl DirectTier {
    pub fn new(capacity: u64) -> Self {
        Self { entries: Cache::builder().max_capacity(capacity).build() }
    }

    /// Returns the record if present and not yet expired; an expired entry
    /// is evicted on the way out rather than ever being handed to a caller.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<CacheRecord>> {
        let record = self.entries.get(fingerprint.as_bytes())?;
        if record.is_expired() {
            self.entries.invalidate(fingerprint.as_bytes());
            return None;
        }
        Some(record)
    }

    pub fn insert(&self, record: CacheRecord) {
        self.entries.insert(*record.fingerprint.as_bytes(), Arc::new(record));
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.invalidate(fingerprint.as_bytes());
    }

    /// Invalidates every entry whose tag set contains `tag`. O(n) in entry
    /// count; acceptable for an invalidation path that is not latency
    /// sensitive the way lookups are.
    pub fn invalidate_by_tag(&self, tag: &str) {
        let stale: Vec<[u8; 32]> = self
            .entries
            .iter()
            .filter(|(_, record)| record.tags.iter().any(|t| t == tag))
            .map(|(key, _)| *key.as_ref())
            .collect();
        for key in stale {
            self.entries.invalidate(&key);
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; 32])
    }

    #[test]
    fn insert_then_get_round_trips() {
        let tier = DirectTier::new(100);
        tier.insert(CacheRecord::new(fp(1), "application/json", vec![1, 2, 3], Duration::from_secs(60)));
        let got = tier.get(&fp(1)).unwrap();
        assert_eq!(got.payload, vec![1, 2, 3]);
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let tier = DirectTier::new(100);
        tier.insert(CacheRecord::new(fp(2), "application/json", vec![], Duration::ZERO));
        std::thread::sleep(Duration::from_millis(5));
        assert!(tier.get(&fp(2)).is_none());
    }

    #[test]
    fn invalidate_by_tag_removes_only_matching_entries() {
        let tier = DirectTier::new(100);
        tier.insert(
            CacheRecord::new(fp(3), "application/json", vec![], Duration::from_secs(60))
                .with_tags(vec!["model:gpt-4o".to_string()]),
        );
        tier.insert(CacheRecord::new(fp(4), "application/json", vec![], Duration::from_secs(60)));
        tier.invalidate_by_tag("model:gpt-4o");
        assert!(tier.get(&fp(3)).is_none());
        assert!(tier.get(&fp(4)).is_some());
    }
}
