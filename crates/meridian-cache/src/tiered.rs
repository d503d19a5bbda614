//! Composes the direct tier with the vector tier into the `Lookup`/`Store`
//! algorithm of §4.7, generalizing `ccheney-reflex`'s `TieredCache` (which
//! only ever composes an exact tier with *one* semantic backend type) into a
//! `VectorStore`-generic tier so any `cache.backend` binding plugs in
//! unchanged.

use std::sync::Arc;
use std::time::Duration;

use meridian_common::ErrorKind;
use meridian_fingerprint::Fingerprint;

use crate::direct::DirectTier;
use crate::embedding::EmbeddingProvider;
use crate::lease::{LeaseOutcome, LeaseRegistry};
use crate::record::{CachePolicy, CacheRecord};
use crate::vectorstore::{Filter, FilterOp, NamespaceSpec, VectorStore};

const NAMESPACE: &str = "meridian-semantic-cache";

/// Outcome of a tiered lookup (§4.7).
pub enum LookupResult {
    HitDirect(Arc<CacheRecord>),
    HitVector(Arc<CacheRecord>),
    Miss,
}

impl LookupResult {
    pub fn record(&self) -> Option<&Arc<CacheRecord>> {
        match self {
            LookupResult::HitDirect(r) | LookupResult::HitVector(r) => Some(r),
            LookupResult::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        !matches!(self, LookupResult::Miss)
    }
}

pub struct TieredCache<E, V> {
    direct: DirectTier,
    vector: Arc<V>,
    leases: LeaseRegistry,
    embedder: E,
    policy: CachePolicy,
}

impl<E: EmbeddingProvider, V: VectorStore + ?Sized> TieredCache<E, V> {
    pub async fn new(embedder: E, vector: Arc<V>, policy: CachePolicy) -> Result<Self, ErrorKind> {
        let spec = NamespaceSpec {
            name: NAMESPACE.to_string(),
            dimension: policy.vector_dimension,
            property_schema: Vec::new(),
        };
        if let Err(err) = vector.create_namespace(&spec).await {
            tracing::warn!(error = %err, "failed to provision semantic cache namespace, continuing degraded");
        }
        Ok(Self { direct: DirectTier::new(policy.direct_capacity), vector, leases: LeaseRegistry::new(), embedder, policy })
    }

    /// `Lookup(fingerprint, projection, policy)` (§4.7): a direct hit always
    /// wins; absent that, and given a semantic projection, query the vector
    /// tier under cosine similarity and re-validate the neighbor's direct
    /// record hasn't since been invalidated before trusting it.
    pub async fn lookup(&self, fingerprint: &Fingerprint, projection: Option<&str>) -> LookupResult {
        if !self.policy.enabled {
            return LookupResult::Miss;
        }
        if let Some(record) = self.direct.get(fingerprint) {
            return LookupResult::HitDirect(record);
        }
        let Some(text) = projection else {
            return LookupResult::Miss;
        };
        match self.lookup_vector(text).await {
            Ok(Some(record)) => LookupResult::HitVector(record),
            Ok(None) => LookupResult::Miss,
            Err(err) => {
                // Cache errors never fail the request; degrade to a miss (§7).
                tracing::warn!(error = %err, "semantic cache vector lookup failed, degrading to miss");
                LookupResult::Miss
            }
        }
    }

    async fn lookup_vector(&self, projection: &str) -> Result<Option<Arc<CacheRecord>>, ErrorKind> {
        let query = self.embedder.embed(projection).await?;
        let hits = self
            .vector
            .query_nearest(NAMESPACE, &query, &[], &[], self.policy.vector_threshold, 1)
            .await?;
        let Some(best) = hits.into_iter().next() else {
            return Ok(None);
        };
        let Ok(bytes) = hex::decode(&best.record.id) else {
            return Ok(None);
        };
        if bytes.len() != 32 {
            return Ok(None);
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        let fingerprint = Fingerprint::from_bytes(array);
        // The vector tier may still carry a neighbor whose direct record was
        // invalidated; only a live direct record is an acceptable hit.
        Ok(self.direct.get(&fingerprint))
    }

    /// Becomes the builder for `fingerprint`, or waits on an in-flight build
    /// and reports whether the direct tier now holds the answer.
    pub async fn acquire_build_lease(&self, fingerprint: &Fingerprint) -> LeaseOutcome {
        self.leases.acquire(fingerprint, self.policy.single_flight_deadline).await
    }

    /// `Store(buildLease, response)` (§4.7): writes the direct record, then
    /// best-effort indexes it in the vector tier, then releases the lease so
    /// waiters can re-check the direct tier. The direct write always
    /// succeeds (it is purely in-process); only the vector write can fail,
    /// and a failure there degrades to "direct-tier-only" rather than
    /// aborting the store.
    pub async fn store(&self, record: CacheRecord, embedding: Option<Vec<f32>>) {
        let fingerprint = record.fingerprint;
        let id = hex::encode(fingerprint.as_bytes());
        self.direct.insert(record);
        if let Some(vector) = embedding {
            if let Err(err) = self.vector.add(NAMESPACE, &id, &vector, serde_json::json!({})).await {
                tracing::warn!(error = %err, "failed to index semantic cache vector, direct tier still served");
            }
        }
        self.leases.release(&fingerprint);
    }

    /// Releases a build lease without publishing a record, e.g. when the
    /// upstream dispatch itself failed.
    pub async fn abandon_build_lease(&self, fingerprint: &Fingerprint) {
        self.leases.release(fingerprint);
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.direct.invalidate(fingerprint);
    }

    pub async fn invalidate_by_tag(&self, tag: &str) {
        self.direct.invalidate_by_tag(tag);
        let filters = [Filter { field: "tag".to_string(), op: FilterOp::Equal, value: serde_json::json!(tag) }];
        if let Err(err) = self.vector.delete_where(NAMESPACE, &filters).await {
            tracing::warn!(error = %err, tag, "failed to invalidate semantic cache vectors by tag");
        }
    }

    pub fn direct_entry_count(&self) -> u64 {
        self.direct.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectorstore::memory::InMemoryVectorStore;
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ErrorKind> {
            Ok(self.0.clone())
        }
    }

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; 32])
    }

    #[tokio::test]
    async fn direct_hit_short_circuits_before_touching_vector_tier() {
        let cache = TieredCache::new(FixedEmbedder(vec![1.0, 0.0]), Arc::new(InMemoryVectorStore::new()), CachePolicy::default())
            .await
            .unwrap();
        cache
            .store(CacheRecord::new(fp(1), "application/json", vec![9], Duration::from_secs(60)), None)
            .await;
        let hit = cache.lookup(&fp(1), Some("capital of France?")).await;
        assert!(matches!(hit, LookupResult::HitDirect(_)));
    }

    #[tokio::test]
    async fn semantic_hit_requires_a_surviving_direct_record() {
        let policy = CachePolicy { vector_threshold: 0.9, ..CachePolicy::default() };
        let cache =
            TieredCache::new(FixedEmbedder(vec![1.0, 0.0]), Arc::new(InMemoryVectorStore::new()), policy).await.unwrap();
        cache
            .store(
                CacheRecord::new(fp(2), "application/json", vec![9], Duration::from_secs(60)),
                Some(vec![1.0, 0.0]),
            )
            .await;
        cache.invalidate(&fp(2));
        let hit = cache.lookup(&fp(3), Some("a near-duplicate question")).await;
        assert!(matches!(hit, LookupResult::Miss));
    }

    #[tokio::test]
    async fn miss_with_no_projection_never_queries_the_vector_tier() {
        let cache =
            TieredCache::new(FixedEmbedder(vec![1.0, 0.0]), Arc::new(InMemoryVectorStore::new()), CachePolicy::default())
                .await
                .unwrap();
        let hit = cache.lookup(&fp(9), None).await;
        assert!(matches!(hit, LookupResult::Miss));
    }
}
