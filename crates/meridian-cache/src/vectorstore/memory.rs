//! In-process reference [`VectorStore`]: a `RwLock<HashMap<...>>` of
//! namespaces, each a flat `Vec<VectorRecord>` scanned linearly. Used by the
//! test suite and as the default binding for deployments too small to run a
//! dedicated vector database.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use meridian_common::ErrorKind;
use serde_json::Value;

use super::{
    cosine_similarity, matches_filters, Cursor, Filter, FilterOp, NamespaceSpec, ScoredRecord,
    VectorRecord, VectorStore,
};

#[derive(Default)]
struct Namespace {
    records: Vec<VectorRecord>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Namespace>> {
        self.namespaces.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_namespace(&self, spec: &NamespaceSpec) -> Result<(), ErrorKind> {
        self.lock().entry(spec.name.clone()).or_default();
        Ok(())
    }

    async fn add(
        &self,
        namespace: &str,
        id: &str,
        vector: &[f32],
        metadata: Value,
    ) -> Result<(), ErrorKind> {
        let mut guard = self.lock();
        let ns = guard.entry(namespace.to_string()).or_default();
        ns.records.retain(|r| r.id != id);
        ns.records.push(VectorRecord { id: id.to_string(), vector: vector.to_vec(), metadata });
        Ok(())
    }

    async fn get_by_id(&self, namespace: &str, id: &str) -> Result<Option<VectorRecord>, ErrorKind> {
        Ok(self
            .lock()
            .get(namespace)
            .and_then(|ns| ns.records.iter().find(|r| r.id == id).cloned()))
    }

    async fn get_by_ids(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<VectorRecord>, ErrorKind> {
        Ok(self.lock().get(namespace).map_or_else(Vec::new, |ns| {
            ns.records.iter().filter(|r| ids.contains(&r.id)).cloned().collect()
        }))
    }

    async fn query_filter(
        &self,
        namespace: &str,
        filters: &[Filter],
        _select_fields: &[String],
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<(Vec<VectorRecord>, Option<Cursor>), ErrorKind> {
        let guard = self.lock();
        let Some(ns) = guard.get(namespace) else {
            return Ok((Vec::new(), None));
        };
        let start: usize = cursor.as_deref().and_then(|c| c.parse().ok()).unwrap_or(0);
        let matching: Vec<&VectorRecord> =
            ns.records.iter().filter(|r| matches_filters(&r.metadata, filters)).collect();
        let page: Vec<VectorRecord> = matching.iter().skip(start).take(limit).map(|r| (*r).clone()).collect();
        let next = if start + page.len() < matching.len() {
            Some((start + page.len()).to_string())
        } else {
            None
        };
        Ok((page, next))
    }

    async fn query_nearest(
        &self,
        namespace: &str,
        vector: &[f32],
        filters: &[Filter],
        _select_fields: &[String],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, ErrorKind> {
        let guard = self.lock();
        let Some(ns) = guard.get(namespace) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<ScoredRecord> = ns
            .records
            .iter()
            .filter(|r| matches_filters(&r.metadata, filters))
            .map(|r| ScoredRecord { record: r.clone(), similarity: cosine_similarity(vector, &r.vector) })
            .filter(|s| s.similarity >= threshold)
            .collect();
        scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<(), ErrorKind> {
        if let Some(ns) = self.lock().get_mut(namespace) {
            ns.records.retain(|r| r.id != id);
        }
        Ok(())
    }

    async fn delete_where(&self, namespace: &str, filters: &[Filter]) -> Result<u64, ErrorKind> {
        let mut guard = self.lock();
        let Some(ns) = guard.get_mut(namespace) else {
            return Ok(0);
        };
        let before = ns.records.len();
        ns.records.retain(|r| !matches_filters(&r.metadata, filters));
        Ok((before - ns.records.len()) as u64)
    }

    async fn ping(&self) -> Result<(), ErrorKind> {
        Ok(())
    }

    async fn close(&self, namespace: Option<&str>) -> Result<(), ErrorKind> {
        if let Some(name) = namespace {
            self.lock().remove(name);
        } else {
            self.lock().clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> NamespaceSpec {
        NamespaceSpec { name: "chat-cache".into(), dimension: 3, property_schema: Vec::new() }
    }

    #[tokio::test]
    async fn add_then_get_by_id_round_trips() {
        let store = InMemoryVectorStore::new();
        store.create_namespace(&spec()).await.unwrap();
        store.add("chat-cache", "a", &[1.0, 0.0, 0.0], serde_json::json!({})).await.unwrap();
        let got = store.get_by_id("chat-cache", "a").await.unwrap().unwrap();
        assert_eq!(got.vector, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn query_nearest_respects_threshold() {
        let store = InMemoryVectorStore::new();
        store.create_namespace(&spec()).await.unwrap();
        store.add("chat-cache", "a", &[1.0, 0.0, 0.0], serde_json::json!({})).await.unwrap();
        store.add("chat-cache", "b", &[0.0, 1.0, 0.0], serde_json::json!({})).await.unwrap();
        let hits = store
            .query_nearest("chat-cache", &[1.0, 0.0, 0.0], &[], &[], 0.92, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "a");
    }

    #[tokio::test]
    async fn re_adding_an_existing_id_replaces_it() {
        let store = InMemoryVectorStore::new();
        store.create_namespace(&spec()).await.unwrap();
        store.add("chat-cache", "a", &[1.0, 0.0, 0.0], serde_json::json!({"v": 1})).await.unwrap();
        store.add("chat-cache", "a", &[0.0, 1.0, 0.0], serde_json::json!({"v": 2})).await.unwrap();
        let all = store.get_by_ids("chat-cache", &["a".to_string()]).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].metadata["v"], 2);
    }

    #[tokio::test]
    async fn delete_where_removes_matching_records_and_returns_count() {
        let store = InMemoryVectorStore::new();
        store.create_namespace(&spec()).await.unwrap();
        store.add("chat-cache", "a", &[1.0, 0.0, 0.0], serde_json::json!({"tag": "stale"})).await.unwrap();
        store.add("chat-cache", "b", &[0.0, 1.0, 0.0], serde_json::json!({"tag": "fresh"})).await.unwrap();
        let filters = [Filter { field: "tag".into(), op: FilterOp::Equal, value: serde_json::json!("stale") }];
        let removed = store.delete_where("chat-cache", &filters).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_by_id("chat-cache", "a").await.unwrap().is_none());
    }
}
