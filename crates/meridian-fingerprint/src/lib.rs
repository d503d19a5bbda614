//! Canonicalization and content-addressing of a [`Request`] into a stable
//! 256-bit identity plus an optional text projection suitable for embedding.
//!
//! The direct fingerprint is a BLAKE3 hash over a canonical JSON encoding of
//! the semantically relevant fields of a request. `serde_json::Value`
//! objects (without the `preserve_order` feature, which this workspace does
//! not enable) are backed by a sorted map, so object keys come out in
//! lexicographic order for free — the canonicalizer does not need its own
//! sorting pass.

mod canonical;
mod policy;
mod projection;

pub use policy::FingerprintPolicy;

use meridian_common::ErrorKind;
use meridian_protocol::Request;

/// A 256-bit content identity for a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Reconstructs a fingerprint from its raw bytes, e.g. when a cache
    /// binding round-trips a fingerprint through a hex-encoded vector-store
    /// id or cache key.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Validates that `request` carries the minimum fields required for its
/// operation kind, then computes its direct fingerprint under `policy`.
pub fn fingerprint(request: &Request, policy: &FingerprintPolicy) -> Result<Fingerprint, ErrorKind> {
    validate_minimum_fields(request)?;
    let canonical = canonical::canonicalize(request, policy);
    let bytes = serde_json::to_vec(&canonical)
        .expect("canonical request value is always serializable");
    Ok(Fingerprint(*blake3::hash(&bytes).as_bytes()))
}

/// Builds the semantic text projection used for the vector-cache tier, or
/// `None` if the operation kind carries no meaningful text (list-models).
pub fn semantic_projection(request: &Request, max_turns: Option<usize>) -> Option<String> {
    projection::project(request, max_turns)
}

fn validate_minimum_fields(request: &Request) -> Result<(), ErrorKind> {
    use meridian_protocol::RequestPayload::*;
    let ok = match &request.payload {
        ChatCompletion(r) => !r.messages.is_empty(),
        TextCompletion(r) => !r.prompt.is_empty(),
        Embedding(r) => !r.inputs.is_empty(),
        Speech(r) => !r.input.is_empty(),
        Transcription(r) => !r.audio.is_empty(),
        ListModels(_) => true,
    };
    if ok {
        Ok(())
    } else {
        Err(ErrorKind::InvalidRequest(format!(
            "operation {:?} is missing its required payload fields",
            request.operation
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_protocol::{
        ChatCompletionRequest, Message, Operation, RequestMetadata, RequestPayload, Role,
    };
    use std::collections::BTreeMap;

    fn chat_request(mut params: BTreeMap<String, serde_json::Value>) -> Request {
        let mut sorted = BTreeMap::new();
        std::mem::swap(&mut sorted, &mut params);
        Request {
            id: Default::default(),
            operation: Operation::ChatCompletion,
            provider: "openai".into(),
            model: "gpt-4o".into(),
            fallbacks: vec![],
            payload: RequestPayload::ChatCompletion(ChatCompletionRequest {
                messages: vec![Message::text(Role::User, "capital of France?")],
                ..Default::default()
            }),
            params: sorted,
            metadata: RequestMetadata::default(),
        }
    }

    #[test]
    fn identical_requests_fingerprint_identically() {
        let a = chat_request(BTreeMap::new());
        let b = chat_request(BTreeMap::new());
        let policy = FingerprintPolicy::default_for(Operation::ChatCompletion);
        assert_eq!(
            fingerprint(&a, &policy).unwrap().as_bytes(),
            fingerprint(&b, &policy).unwrap().as_bytes()
        );
    }

    #[test]
    fn param_insertion_order_does_not_affect_fingerprint() {
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), serde_json::json!(1));
        forward.insert("b".to_string(), serde_json::json!(2));
        let mut reverse = BTreeMap::new();
        reverse.insert("b".to_string(), serde_json::json!(2));
        reverse.insert("a".to_string(), serde_json::json!(1));

        let policy = FingerprintPolicy::default_for(Operation::ChatCompletion);
        let a = chat_request(forward);
        let b = chat_request(reverse);
        assert_eq!(
            fingerprint(&a, &policy).unwrap().as_bytes(),
            fingerprint(&b, &policy).unwrap().as_bytes()
        );
    }

    #[test]
    fn empty_chat_request_is_invalid() {
        let mut request = chat_request(BTreeMap::new());
        request.payload = RequestPayload::ChatCompletion(ChatCompletionRequest::default());
        let policy = FingerprintPolicy::default_for(Operation::ChatCompletion);
        assert!(matches!(
            fingerprint(&request, &policy),
            Err(ErrorKind::InvalidRequest(_))
        ));
    }
}
