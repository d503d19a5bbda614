//! Abstract vector-store contract (§6 "Vector store capability contract").
//!
//! The semantic cache tier never talks to Redis/Weaviate/Qdrant/Pinecone
//! directly; it goes through this trait so the choice of `cache.backend` is
//! a binding, not a code fork. [`memory`] holds an in-process reference
//! implementation used by tests and by deployments too small to need a
//! dedicated vector database; [`qdrant`] is the one networked binding
//! shipped here.

pub mod memory;
pub mod qdrant;

use async_trait::async_trait;
use meridian_common::ErrorKind;
use serde_json::Value;

/// One property filter. `Like` is a substring match over string properties;
/// `ContainsAny`/`ContainsAll` test array-valued properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// Supported filter operators (§6). Multi-filter semantics is conjunctive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    ContainsAny,
    ContainsAll,
    IsNull,
    IsNotNull,
}

/// A named, dimensioned collection within a vector store (`create_namespace`
/// callers get one of these per `cache.backend` tenant).
#[derive(Debug, Clone)]
pub struct NamespaceSpec {
    pub name: String,
    pub dimension: usize,
    pub property_schema: Vec<(String, PropertyKind)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Number,
    Bool,
}

/// A stored point: an id, its embedding, and arbitrary JSON metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

/// A [`VectorRecord`] annotated with its cosine similarity to the query
/// vector, as returned by `query_nearest`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    pub similarity: f32,
}

/// An opaque continuation token for `query_filter` pagination.
pub type Cursor = String;

/// The contract every `cache.backend` binding implements (§6). Every method
/// may fail with `ErrorKind::CacheError`; callers degrade to a cache miss
/// rather than surface it (§7).
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_namespace(&self, spec: &NamespaceSpec) -> Result<(), ErrorKind>;

    async fn add(
        &self,
        namespace: &str,
        id: &str,
        vector: &[f32],
        metadata: Value,
    ) -> Result<(), ErrorKind>;

    async fn get_by_id(&self, namespace: &str, id: &str) -> Result<Option<VectorRecord>, ErrorKind>;

    async fn get_by_ids(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<VectorRecord>, ErrorKind>;

    async fn query_filter(
        &self,
        namespace: &str,
        filters: &[Filter],
        select_fields: &[String],
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<(Vec<VectorRecord>, Option<Cursor>), ErrorKind>;

    async fn query_nearest(
        &self,
        namespace: &str,
        vector: &[f32],
        filters: &[Filter],
        select_fields: &[String],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, ErrorKind>;

    async fn delete(&self, namespace: &str, id: &str) -> Result<(), ErrorKind>;

    async fn delete_where(&self, namespace: &str, filters: &[Filter]) -> Result<u64, ErrorKind>;

    async fn ping(&self) -> Result<(), ErrorKind>;

    async fn close(&self, namespace: Option<&str>) -> Result<(), ErrorKind>;
}

/// Cosine similarity of two equal-length vectors; `0.0` if either is
/// zero-length or zero-norm (an empty/degenerate embedding never "matches").
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Applies conjunctive [`Filter`]s to a metadata JSON object. Shared by the
/// in-process backend and by bindings that must emulate server-side
/// filtering client-side.
pub fn matches_filters(metadata: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| matches_one(metadata, f))
}

fn matches_one(metadata: &Value, filter: &Filter) -> bool {
    let field = metadata.get(&filter.field);
    match filter.op {
        FilterOp::IsNull => field.is_none_or(Value::is_null),
        // Some back ends have no native IsNotNull and emulate it by negating
        // IsNull (§9 open question); the observable semantics must match
        // regardless of binding, so the in-process reference does the same.
        FilterOp::IsNotNull => !field.is_none_or(Value::is_null),
        FilterOp::Equal => field.is_some_and(|v| v == &filter.value),
        FilterOp::NotEqual => field.is_none_or(|v| v != &filter.value),
        FilterOp::GreaterThan => compare_numbers(field, &filter.value, |a, b| a > b),
        FilterOp::GreaterThanOrEqual => compare_numbers(field, &filter.value, |a, b| a >= b),
        FilterOp::LessThan => compare_numbers(field, &filter.value, |a, b| a < b),
        FilterOp::LessThanOrEqual => compare_numbers(field, &filter.value, |a, b| a <= b),
        FilterOp::Like => field
            .and_then(Value::as_str)
            .zip(filter.value.as_str())
            .is_some_and(|(hay, needle)| hay.contains(needle)),
        FilterOp::ContainsAny => field
            .and_then(Value::as_array)
            .zip(filter.value.as_array())
            .is_some_and(|(hay, needles)| needles.iter().any(|n| hay.contains(n))),
        FilterOp::ContainsAll => field
            .and_then(Value::as_array)
            .zip(filter.value.as_array())
            .is_some_and(|(hay, needles)| needles.iter().all(|n| hay.contains(n))),
    }
}

fn compare_numbers(field: Option<&Value>, value: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    field
        .and_then(Value::as_f64)
        .zip(value.as_f64())
        .is_some_and(|(a, b)| op(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn is_not_null_negates_is_null() {
        let metadata = serde_json::json!({ "tag": "foo" });
        let present = Filter { field: "tag".into(), op: FilterOp::IsNotNull, value: Value::Null };
        let missing = Filter { field: "other".into(), op: FilterOp::IsNotNull, value: Value::Null };
        assert!(matches_filters(&metadata, &[present]));
        assert!(!matches_filters(&metadata, &[missing]));
    }

    #[test]
    fn conjunctive_filters_require_all_to_hold() {
        let metadata = serde_json::json!({ "a": 1, "b": "x" });
        let filters = vec![
            Filter { field: "a".into(), op: FilterOp::Equal, value: serde_json::json!(1) },
            Filter { field: "b".into(), op: FilterOp::Equal, value: serde_json::json!("y") },
        ];
        assert!(!matches_filters(&metadata, &filters));
    }
}
