//! Concrete [`ProviderAdapter`](meridian_provider_core::ProviderAdapter)
//! implementations for every upstream family named in §4.3: OpenAI (and its
//! Azure-hosted and Mistral OpenAI-compatible cousins), Anthropic, Google
//! Gemini, Amazon Bedrock, and a local Ollama endpoint.

pub mod http;
pub mod providers;
pub mod stream_decode;

pub use providers::anthropic::AnthropicAdapter;
pub use providers::bedrock::BedrockAdapter;
pub use providers::google::GoogleAdapter;
pub use providers::ollama::OllamaAdapter;
pub use providers::openai::OpenAiAdapter;
