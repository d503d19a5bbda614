//! Semantic Cache (C7): a direct/exact-match tier backed by an in-process
//! bounded LRU in front of a notional durable TTL record, composed with a
//! vector/semantic tier behind an abstract [`VectorStore`] so `cache.backend`
//! (`redis`, `redis_cluster`, `weaviate`, `qdrant`, `pinecone`) is purely a
//! binding choice (§4.7, §6).

mod direct;
mod embedding;
mod lease;
mod record;
mod tiered;
pub mod vectorstore;

pub use direct::DirectTier;
pub use embedding::EmbeddingProvider;
pub use lease::{LeaseOutcome, LeaseRegistry};
pub use record::{CachePolicy, CacheRecord};
pub use tiered::{LookupResult, TieredCache};
pub use vectorstore::{
    cosine_similarity, matches_filters, Cursor, Filter, FilterOp, NamespaceSpec, PropertyKind,
    ScoredRecord, VectorRecord, VectorStore,
};
