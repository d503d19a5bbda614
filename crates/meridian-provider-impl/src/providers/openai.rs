use async_trait::async_trait;
use meridian_common::ErrorKind;
use meridian_protocol::{
    ChatCompletionRequest, ChatCompletionResponse, ChunkDelta, ChunkExtra, EmbeddingRequest,
    EmbeddingResponse, ListModelsRequest, ListModelsResponse, Message, ModelInfo, Operation, Role,
    StreamChunk, TextCompletionRequest, TextCompletionResponse, Usage,
};
use meridian_provider_core::{
    AdapterCtx, ChunkReceiver, ClientKey, ClientPool, ProviderAdapter, ProviderResult,
};
use tokio::sync::mpsc;

use crate::http;
use crate::stream_decode::StreamDecoder;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Adapter for OpenAI's chat/completions/embeddings surface. Azure OpenAI and
/// Mistral both reuse this exact wire shape (§4.3), so [`OpenAiAdapter`] is
/// generic over a base URL and an auth-header strategy rather than being
/// OpenAI-only.
pub struct OpenAiAdapter {
    name: &'static str,
    base_url: String,
    auth: AuthStyle,
    clients: ClientPool,
}

enum AuthStyle {
    Bearer,
    ApiKeyHeader,
}

impl OpenAiAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            name: "openai",
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            auth: AuthStyle::Bearer,
            clients: ClientPool::new(),
        }
    }

    /// Azure OpenAI: same request/response bodies, `api-key` header instead
    /// of bearer auth, and a deployment-scoped base URL supplied by config.
    pub fn azure(base_url: String) -> Self {
        Self {
            name: "azure-openai",
            base_url,
            auth: AuthStyle::ApiKeyHeader,
            clients: ClientPool::new(),
        }
    }

    /// Mistral's chat/embeddings API is OpenAI-compatible; only the base URL
    /// and provider name differ.
    pub fn mistral(base_url: Option<String>) -> Self {
        Self {
            name: "mistral",
            base_url: base_url.unwrap_or_else(|| "https://api.mistral.ai".to_string()),
            auth: AuthStyle::Bearer,
            clients: ClientPool::new(),
        }
    }

    async fn client(&self) -> ProviderResult<std::sync::Arc<wreq::Client>> {
        self.clients
            .get_or_create(ClientKey {
                provider: self.name.to_string(),
                endpoint: self.base_url.clone(),
                tls: self.base_url.starts_with("https"),
            })
            .await
    }

    fn auth_headers(&self, secret: &str, builder: wreq::RequestBuilder) -> wreq::RequestBuilder {
        match self.auth {
            AuthStyle::Bearer => builder.bearer_auth(secret),
            AuthStyle::ApiKeyHeader => builder.header("api-key", secret),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", http::trim_base(&self.base_url), path.trim_start_matches('/'))
    }
}

fn chat_body(model: &str, request: &ChatCompletionRequest, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": request.messages.iter().map(message_json).collect::<Vec<_>>(),
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "top_p": request.top_p,
        "stop": request.stop,
        "stream": stream,
    })
}

fn message_json(message: &Message) -> serde_json::Value {
    serde_json::json!({
        "role": match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        },
        "content": message.text_only(),
    })
}

fn map_transport(err: wreq::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout(err.to_string())
    } else {
        ErrorKind::TransportError(err.to_string())
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn chat_completion(
        &self,
        _ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChatCompletionResponse> {
        let client = self.client().await?;
        let builder = client.post(self.url("v1/chat/completions"));
        let builder = self.auth_headers(secret, builder);
        let response = builder
            .json(&chat_body(model, request, false))
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(super::http_error(status.as_u16(), &body));
        }
        parse_chat_completion(&body)
    }

    async fn chat_completion_stream(
        &self,
        _ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChunkReceiver> {
        let client = self.client().await?;
        let builder = client.post(self.url("v1/chat/completions"));
        let builder = self.auth_headers(secret, builder);
        let response = builder
            .json(&chat_body(model, request, true))
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(super::http_error(status.as_u16(), &body));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let provider = self.name;
        tokio::spawn(pump_chat_stream(response, tx, provider));
        Ok(rx)
    }

    async fn text_completion(
        &self,
        _ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &TextCompletionRequest,
    ) -> ProviderResult<TextCompletionResponse> {
        let client = self.client().await?;
        let builder = client.post(self.url("v1/completions"));
        let builder = self.auth_headers(secret, builder);
        let body = serde_json::json!({
            "model": model,
            "prompt": request.prompt,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "top_p": request.top_p,
            "stop": request.stop,
            "stream": false,
        });
        let response = builder.json(&body).send().await.map_err(map_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(super::http_error(status.as_u16(), &text));
        }
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ErrorKind::ProviderInternal(e.to_string()))?;
        Ok(TextCompletionResponse {
            text: value["choices"][0]["text"].as_str().unwrap_or_default().to_string(),
            finish_reason: value["choices"][0]["finish_reason"].as_str().unwrap_or_default().to_string(),
            usage: parse_usage(&value),
        })
    }

    async fn embedding(
        &self,
        _ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &EmbeddingRequest,
    ) -> ProviderResult<EmbeddingResponse> {
        let client = self.client().await?;
        let builder = client.post(self.url("v1/embeddings"));
        let builder = self.auth_headers(secret, builder);
        let body = serde_json::json!({ "model": model, "input": request.inputs });
        let response = builder.json(&body).send().await.map_err(map_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(super::http_error(status.as_u16(), &text));
        }
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ErrorKind::ProviderInternal(e.to_string()))?;
        let vectors = value["data"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|entry| {
                entry["embedding"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect::<Vec<f32>>()
            })
            .collect();
        Ok(EmbeddingResponse {
            vectors,
            usage: parse_usage(&value),
        })
    }

    async fn list_models(
        &self,
        _ctx: &AdapterCtx,
        secret: &str,
        _request: &ListModelsRequest,
    ) -> ProviderResult<ListModelsResponse> {
        let client = self.client().await?;
        let builder = client.get(self.url("v1/models"));
        let builder = self.auth_headers(secret, builder);
        let response = builder.send().await.map_err(map_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(super::http_error(status.as_u16(), &text));
        }
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ErrorKind::ProviderInternal(e.to_string()))?;
        let models = value["data"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|entry| entry["id"].as_str())
            .map(|id| ModelInfo {
                id: id.to_string(),
                display_name: None,
            })
            .collect();
        Ok(ListModelsResponse {
            models,
            next_page_token: None,
        })
    }
}

fn parse_usage(value: &serde_json::Value) -> Usage {
    let Some(usage) = value.get("usage") else {
        return Usage::default();
    };
    Usage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

fn parse_chat_completion(body: &str) -> ProviderResult<ChatCompletionResponse> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ErrorKind::ProviderInternal(e.to_string()))?;
    let choice = &value["choices"][0];
    let text = choice["message"]["content"].as_str().unwrap_or_default();
    Ok(ChatCompletionResponse {
        message: Message::text(Role::Assistant, text),
        tool_calls: Vec::new(),
        finish_reason: choice["finish_reason"].as_str().unwrap_or_default().to_string(),
        usage: parse_usage(&value),
    })
}

async fn pump_chat_stream(mut response: wreq::Response, tx: mpsc::Sender<StreamChunk>, provider: &'static str) {
    let mut decoder = StreamDecoder::new();
    loop {
        let next = response.chunk().await;
        match next {
            Ok(Some(bytes)) => {
                for event in decoder.push(&bytes) {
                    if event.trim() == "[DONE]" {
                        let _ = tx.send(final_chunk(provider, None)).await;
                        return;
                    }
                    if let Some(chunk) = parse_stream_event(&event, provider) {
                        if tx.send(chunk).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Ok(None) => {
                for event in decoder.finish() {
                    if let Some(chunk) = parse_stream_event(&event, provider) {
                        let _ = tx.send(chunk).await;
                    }
                }
                let _ = tx.send(final_chunk(provider, None)).await;
                return;
            }
            Err(err) => {
                let _ = tx.send(final_chunk(provider, Some(map_transport(err)))).await;
                return;
            }
        }
    }
}

fn parse_stream_event(data: &str, provider: &'static str) -> Option<StreamChunk> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let delta = &value["choices"][0]["delta"];
    let text = delta["content"].as_str()?;
    Some(StreamChunk {
        operation: Operation::ChatCompletion,
        delta: Some(ChunkDelta::Text(text.to_string())),
        finish_reason: value["choices"][0]["finish_reason"].as_str().map(str::to_string),
        usage: None,
        error: None,
        extra: ChunkExtra {
            provider: provider.to_string(),
            latency_ms: 0,
        },
    })
}

fn final_chunk(provider: &'static str, error: Option<ErrorKind>) -> StreamChunk {
    StreamChunk {
        operation: Operation::ChatCompletion,
        delta: None,
        finish_reason: error.is_none().then(|| "stop".to_string()),
        usage: None,
        error,
        extra: ChunkExtra {
            provider: provider.to_string(),
            latency_ms: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_carries_model_and_messages() {
        let request = ChatCompletionRequest {
            messages: vec![Message::text(Role::User, "hi")],
            ..Default::default()
        };
        let body = chat_body("gpt-4o", &request, false);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn stream_event_without_content_delta_is_skipped() {
        let chunk = parse_stream_event(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#, "openai");
        assert!(chunk.is_none());
    }

    #[test]
    fn stream_event_with_text_delta_parses() {
        let chunk =
            parse_stream_event(r#"{"choices":[{"delta":{"content":"hi"},"finish_reason":null}]}"#, "openai")
                .unwrap();
        assert!(matches!(chunk.delta, Some(ChunkDelta::Text(ref t)) if t == "hi"));
    }
}
