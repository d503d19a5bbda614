use meridian_protocol::Operation;

/// Controls whether the model identity participates in the direct
/// fingerprint and how much conversation history feeds the semantic
/// projection. Default: embeddings are portable across models (the same
/// text embeds to comparable vectors across most embedding models in
/// practice is *not* assumed here — rather, callers configure portability
/// explicitly per deployment); every other operation kind is not portable.
#[derive(Debug, Clone)]
pub struct FingerprintPolicy {
    pub model_portable: bool,
    pub semantic_turns: Option<usize>,
}

impl FingerprintPolicy {
    pub fn default_for(operation: Operation) -> Self {
        Self {
            model_portable: matches!(operation, Operation::Embedding),
            semantic_turns: Some(8),
        }
    }
}
