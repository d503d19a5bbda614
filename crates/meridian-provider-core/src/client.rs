use std::collections::HashMap;
use std::sync::Arc;

use meridian_common::ErrorKind;
use tokio::sync::RwLock;

/// Key identifying one reusable transport: same provider, same endpoint,
/// same TLS posture share a connection pool (§3 `PooledClient`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub provider: String,
    pub endpoint: String,
    pub tls: bool,
}

/// Lazily-created, reference-counted HTTP clients, one per [`ClientKey`].
/// Creation is single-flighted by holding the map's write lock across the
/// (cheap, synchronous) builder call; lifetime is the longest holder of a
/// clone, same as any other `Arc`.
pub struct ClientPool {
    clients: RwLock<HashMap<ClientKey, Arc<wreq::Client>>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, key: ClientKey) -> Result<Arc<wreq::Client>, ErrorKind> {
        if let Some(client) = self.clients.read().await.get(&key) {
            return Ok(client.clone());
        }
        let mut guard = self.clients.write().await;
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }
        let client = Arc::new(
            wreq::Client::builder()
                .build()
                .map_err(|err| ErrorKind::TransportError(err.to_string()))?,
        );
        guard.insert(key, client.clone());
        Ok(client)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_reuses_the_same_client() {
        let pool = ClientPool::new();
        let key = ClientKey {
            provider: "openai".into(),
            endpoint: "https://api.openai.com".into(),
            tls: true,
        };
        let a = pool.get_or_create(key.clone()).await.unwrap();
        let b = pool.get_or_create(key).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn distinct_endpoints_get_distinct_clients() {
        let pool = ClientPool::new();
        pool.get_or_create(ClientKey {
            provider: "openai".into(),
            endpoint: "https://api.openai.com".into(),
            tls: true,
        })
        .await
        .unwrap();
        pool.get_or_create(ClientKey {
            provider: "azure".into(),
            endpoint: "https://my-deployment.openai.azure.com".into(),
            tls: true,
        })
        .await
        .unwrap();
        assert_eq!(pool.len().await, 2);
    }
}
