//! The semantic tier needs to turn a request's text projection into a
//! vector, but that call is itself a cache-eligible embedding operation that
//! belongs to the request pipeline (C4), not to this crate — routing it
//! back through the pipeline would make `meridian-core` depend on
//! `meridian-cache` and vice versa. This trait is the seam: `meridian-core`
//! implements it by dispatching an ordinary embedding `Request` through the
//! same adapters and fallback logic as any other call.

use async_trait::async_trait;
use meridian_common::ErrorKind;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ErrorKind>;
}
