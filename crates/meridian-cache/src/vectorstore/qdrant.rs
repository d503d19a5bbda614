//! Qdrant binding for `cache.backend = "qdrant"`, speaking its REST API
//! directly over the same HTTP client stack the provider adapters use
//! (`wreq`) rather than a generated SDK, so this crate's only networking
//! dependency is one already carried by the workspace.
//!
//! Filters beyond `Equal`/`IsNull`/`IsNotNull` are emulated client-side on
//! the returned payload rather than translated into Qdrant's own filter DSL
//! — acceptable because the semantic-cache query path always re-validates
//! the similarity threshold and record freshness against the direct tier
//! before trusting a hit (§4.7).

use std::sync::Arc;

use async_trait::async_trait;
use meridian_common::ErrorKind;
use serde_json::Value;

use super::{matches_filters, Cursor, Filter, NamespaceSpec, ScoredRecord, VectorRecord, VectorStore};

pub struct QdrantVectorStore {
    base_url: String,
    client: Arc<wreq::Client>,
}

enum Verb {
    Get,
    Put,
    Post,
    Delete,
}

impl QdrantVectorStore {
    pub fn new(base_url: String) -> Result<Self, ErrorKind> {
        let client = wreq::Client::builder()
            .build()
            .map_err(|err| ErrorKind::CacheError(err.to_string()))?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), client: Arc::new(client) })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn map_transport(err: wreq::Error) -> ErrorKind {
        ErrorKind::CacheError(err.to_string())
    }

    async fn request_json(
        &self,
        verb: Verb,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ErrorKind> {
        let url = self.url(path);
        let mut builder = match verb {
            Verb::Get => self.client.get(url),
            Verb::Put => self.client.put(url),
            Verb::Post => self.client.post(url),
            Verb::Delete => self.client.delete(url),
        };
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await.map_err(Self::map_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(Self::map_transport)?;
        if !status.is_success() {
            return Err(ErrorKind::CacheError(format!("qdrant returned {status}: {text}")));
        }
        serde_json::from_str(&text).map_err(|err| ErrorKind::CacheError(err.to_string()))
    }
}

fn point_to_record(point: &Value) -> Option<VectorRecord> {
    Some(VectorRecord {
        id: point.get("id")?.as_str().map(str::to_string).unwrap_or_else(|| point["id"].to_string()),
        vector: point
            .get("vector")
            .and_then(Value::as_array)
            .map(|v| v.iter().filter_map(Value::as_f64).map(|f| f as f32).collect())
            .unwrap_or_default(),
        metadata: point.get("payload").cloned().unwrap_or(Value::Null),
    })
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn create_namespace(&self, spec: &NamespaceSpec) -> Result<(), ErrorKind> {
        let body = serde_json::json!({
            "vectors": { "size": spec.dimension, "distance": "Cosine" },
        });
        self.request_json(Verb::Put, &format!("collections/{}", spec.name), Some(body))
            .await?;
        Ok(())
    }

    async fn add(
        &self,
        namespace: &str,
        id: &str,
        vector: &[f32],
        metadata: Value,
    ) -> Result<(), ErrorKind> {
        let body = serde_json::json!({
            "points": [{ "id": id, "vector": vector, "payload": metadata }],
        });
        self.request_json(
            Verb::Put,
            &format!("collections/{namespace}/points?wait=true"),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, namespace: &str, id: &str) -> Result<Option<VectorRecord>, ErrorKind> {
        let ids = [id.to_string()];
        let records = self.get_by_ids(namespace, &ids).await?;
        Ok(records.into_iter().next())
    }

    async fn get_by_ids(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<VectorRecord>, ErrorKind> {
        let body = serde_json::json!({ "ids": ids, "with_payload": true, "with_vector": true });
        let value = self
            .request_json(Verb::Post, &format!("collections/{namespace}/points"), Some(body))
            .await?;
        Ok(value["result"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(point_to_record)
            .collect())
    }

    async fn query_filter(
        &self,
        namespace: &str,
        filters: &[Filter],
        _select_fields: &[String],
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<(Vec<VectorRecord>, Option<Cursor>), ErrorKind> {
        let mut body = serde_json::json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        if let Some(cursor) = &cursor {
            body["offset"] = serde_json::json!(cursor);
        }
        let value = self
            .request_json(Verb::Post, &format!("collections/{namespace}/points/scroll"), Some(body))
            .await?;
        let records: Vec<VectorRecord> = value["result"]["points"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(point_to_record)
            .filter(|r| matches_filters(&r.metadata, filters))
            .collect();
        let next = value["result"]["next_page_offset"].as_str().map(str::to_string);
        Ok((records, next))
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
        let body = serde_json::json!({
            "vector": vector,
            "limit": limit.max(1) * 4,
            "score_threshold": threshold,
            "with_payload": true,
            "with_vector": true,
        });
        let value = self
            .request_json(Verb::Post, &format!("collections/{namespace}/points/search"), Some(body))
            .await?;
        let mut scored: Vec<ScoredRecord> = value["result"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|point| {
                let record = point_to_record(point)?;
                let similarity = point.get("score")?.as_f64()? as f32;
                Some(ScoredRecord { record, similarity })
            })
            .filter(|s| matches_filters(&s.record.metadata, filters))
            .collect();
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<(), ErrorKind> {
        let body = serde_json::json!({ "points": [id] });
        self.request_json(
            Verb::Post,
            &format!("collections/{namespace}/points/delete?wait=true"),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn delete_where(&self, namespace: &str, filters: &[Filter]) -> Result<u64, ErrorKind> {
        let (candidates, _) = self.query_filter(namespace, filters, &[], None, 10_000).await?;
        for candidate in &candidates {
            self.delete(namespace, &candidate.id).await?;
        }
        Ok(candidates.len() as u64)
    }

    async fn ping(&self) -> Result<(), ErrorKind> {
        self.request_json(Verb::Get, "healthz", None).await?;
        Ok(())
    }

    async fn close(&self, namespace: Option<&str>) -> Result<(), ErrorKind> {
        if let Some(name) = namespace {
            self.request_json(Verb::Delete, &format!("collections/{name}"), None).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_to_record_reads_vector_and_payload() {
        let point = serde_json::json!({
            "id": "abc",
            "vector": [1.0, 2.0],
            "payload": { "tag": "x" },
        });
        let record = point_to_record(&point).unwrap();
        assert_eq!(record.id, "abc");
        assert_eq!(record.vector, vec![1.0, 2.0]);
        assert_eq!(record.metadata["tag"], "x");
    }
}
