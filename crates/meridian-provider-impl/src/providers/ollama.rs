use async_trait::async_trait;
use meridian_common::ErrorKind;
use meridian_protocol::{
    ChatCompletionRequest, ChatCompletionResponse, ChunkDelta, ChunkExtra, EmbeddingRequest,
    EmbeddingResponse, ListModelsRequest, ListModelsResponse, Message, ModelInfo, Operation, Role,
    StreamChunk, Usage,
};
use meridian_provider_core::{
    AdapterCtx, ChunkReceiver, ClientKey, ClientPool, ProviderAdapter, ProviderResult,
};
use tokio::sync::mpsc;

use crate::http;
use crate::stream_decode::StreamDecoder;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Local Ollama endpoint: no auth, no key rotation. The credential pool still
/// holds one synthetic always-available [`KeyEntry`](meridian_provider_core::KeyEntry)
/// for it so the rest of the pipeline doesn't special-case "no credentials"
/// (§4.3).
pub struct OllamaAdapter {
    base_url: String,
    clients: ClientPool,
}

impl OllamaAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            clients: ClientPool::new(),
        }
    }

    async fn client(&self) -> ProviderResult<std::sync::Arc<wreq::Client>> {
        self.clients
            .get_or_create(ClientKey {
                provider: "ollama".to_string(),
                endpoint: self.base_url.clone(),
                tls: self.base_url.starts_with("https"),
            })
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", http::trim_base(&self.base_url), path.trim_start_matches('/'))
    }
}

fn map_transport(err: wreq::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout(err.to_string())
    } else {
        ErrorKind::TransportError(err.to_string())
    }
}

fn chat_body(model: &str, request: &ChatCompletionRequest, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": request.messages.iter().map(|m| serde_json::json!({
            "role": match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            },
            "content": m.text_only(),
        })).collect::<Vec<_>>(),
        "stream": stream,
        "options": {
            "temperature": request.temperature,
            "top_p": request.top_p,
        },
    })
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn chat_completion(
        &self,
        _ctx: &AdapterCtx,
        _secret: &str,
        model: &str,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChatCompletionResponse> {
        let client = self.client().await?;
        let response = client
            .post(self.url("api/chat"))
            .json(&chat_body(model, request, false))
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(super::http_error(status.as_u16(), &text));
        }
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ErrorKind::ProviderInternal(e.to_string()))?;
        Ok(ChatCompletionResponse {
            message: Message::text(Role::Assistant, value["message"]["content"].as_str().unwrap_or_default()),
            tool_calls: Vec::new(),
            finish_reason: if value["done"].as_bool().unwrap_or(false) { "stop".to_string() } else { String::new() },
            usage: Usage {
                prompt_tokens: value["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
                completion_tokens: value["eval_count"].as_u64().unwrap_or(0) as u32,
                total_tokens: (value["prompt_eval_count"].as_u64().unwrap_or(0)
                    + value["eval_count"].as_u64().unwrap_or(0)) as u32,
            },
        })
    }

    async fn chat_completion_stream(
        &self,
        _ctx: &AdapterCtx,
        _secret: &str,
        model: &str,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChunkReceiver> {
        let client = self.client().await?;
        let response = client
            .post(self.url("api/chat"))
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
        tokio::spawn(pump_stream(response, tx));
        Ok(rx)
    }

    async fn embedding(
        &self,
        _ctx: &AdapterCtx,
        _secret: &str,
        model: &str,
        request: &EmbeddingRequest,
    ) -> ProviderResult<EmbeddingResponse> {
        let client = self.client().await?;
        let body = serde_json::json!({ "model": model, "input": request.inputs });
        let response = client
            .post(self.url("api/embed"))
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(super::http_error(status.as_u16(), &text));
        }
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ErrorKind::ProviderInternal(e.to_string()))?;
        let vectors = value["embeddings"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|entry| {
                entry
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect::<Vec<f32>>()
            })
            .collect();
        Ok(EmbeddingResponse { vectors, usage: Usage::default() })
    }

    async fn list_models(
        &self,
        _ctx: &AdapterCtx,
        _secret: &str,
        _request: &ListModelsRequest,
    ) -> ProviderResult<ListModelsResponse> {
        let client = self.client().await?;
        let response = client
            .get(self.url("api/tags"))
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(super::http_error(status.as_u16(), &text));
        }
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ErrorKind::ProviderInternal(e.to_string()))?;
        let models = value["models"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|entry| entry["name"].as_str())
            .map(|name| ModelInfo { id: name.to_string(), display_name: None })
            .collect();
        Ok(ListModelsResponse { models, next_page_token: None })
    }
}

async fn pump_stream(mut response: wreq::Response, tx: mpsc::Sender<StreamChunk>) {
    let mut decoder = StreamDecoder::new();
    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                for event in decoder.push(&bytes) {
                    if let Some(chunk) = parse_line(&event) {
                        let done = chunk.is_final();
                        if tx.send(chunk).await.is_err() {
                            return;
                        }
                        if done {
                            return;
                        }
                    }
                }
            }
            Ok(None) => {
                for event in decoder.finish() {
                    if let Some(chunk) = parse_line(&event) {
                        let _ = tx.send(chunk).await;
                    }
                }
                return;
            }
            Err(err) => {
                let _ = tx
                    .send(StreamChunk {
                        operation: Operation::ChatCompletion,
                        delta: None,
                        finish_reason: None,
                        usage: None,
                        error: Some(map_transport(err)),
                        extra: ChunkExtra { provider: "ollama".to_string(), latency_ms: 0 },
                    })
                    .await;
                return;
            }
        }
    }
}

fn parse_line(line: &str) -> Option<StreamChunk> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let extra = ChunkExtra { provider: "ollama".to_string(), latency_ms: 0 };
    if value["done"].as_bool().unwrap_or(false) {
        return Some(StreamChunk {
            operation: Operation::ChatCompletion,
            delta: None,
            finish_reason: Some("stop".to_string()),
            usage: Some(Usage {
                prompt_tokens: value["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
                completion_tokens: value["eval_count"].as_u64().unwrap_or(0) as u32,
                total_tokens: (value["prompt_eval_count"].as_u64().unwrap_or(0)
                    + value["eval_count"].as_u64().unwrap_or(0)) as u32,
            }),
            error: None,
            extra,
        });
    }
    let text = value["message"]["content"].as_str()?;
    Some(StreamChunk {
        operation: Operation::ChatCompletion,
        delta: Some(ChunkDelta::Text(text.to_string())),
        finish_reason: None,
        usage: None,
        error: None,
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_omits_auth_and_sets_stream_flag() {
        let request = ChatCompletionRequest {
            messages: vec![Message::text(Role::User, "hi")],
            ..Default::default()
        };
        let body = chat_body("llama3", &request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "llama3");
    }

    #[test]
    fn done_line_produces_final_chunk_with_usage() {
        let chunk = parse_line(r#"{"done":true,"prompt_eval_count":3,"eval_count":5}"#).unwrap();
        assert!(chunk.is_final());
        assert_eq!(chunk.usage.unwrap().total_tokens, 8);
    }
}
