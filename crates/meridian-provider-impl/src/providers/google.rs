use async_trait::async_trait;
use meridian_common::ErrorKind;
use meridian_protocol::{
    ChatCompletionRequest, ChatCompletionResponse, ChunkDelta, ChunkExtra, EmbeddingRequest,
    EmbeddingResponse, Message, Operation, Role, StreamChunk, Usage,
};
use meridian_provider_core::{
    AdapterCtx, ChunkReceiver, ClientKey, ClientPool, ProviderAdapter, ProviderResult,
};
use tokio::sync::mpsc;

use crate::http;
use crate::stream_decode::StreamDecoder;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Adapter for Gemini's `generateContent`/`streamGenerateContent` surface.
/// Auth is a query-string API key rather than a header (§4.3).
pub struct GoogleAdapter {
    base_url: String,
    clients: ClientPool,
}

impl GoogleAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            clients: ClientPool::new(),
        }
    }

    async fn client(&self) -> ProviderResult<std::sync::Arc<wreq::Client>> {
        self.clients
            .get_or_create(ClientKey {
                provider: "google".to_string(),
                endpoint: self.base_url.clone(),
                tls: self.base_url.starts_with("https"),
            })
            .await
    }

    fn url(&self, model: &str, method: &str, secret: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:{method}?key={secret}",
            http::trim_base(&self.base_url)
        )
    }
}

fn role_tag(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        _ => "user",
    }
}

fn generate_content_body(request: &ChatCompletionRequest) -> serde_json::Value {
    let contents: Vec<serde_json::Value> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|message| {
            serde_json::json!({
                "role": role_tag(message.role),
                "parts": [{ "text": message.text_only() }],
            })
        })
        .collect();
    let system_instruction: Vec<String> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(Message::text_only)
        .collect();
    serde_json::json!({
        "contents": contents,
        "systemInstruction": (!system_instruction.is_empty())
            .then(|| serde_json::json!({ "parts": [{ "text": system_instruction.join("\n") }] })),
        "generationConfig": {
            "maxOutputTokens": request.max_tokens,
            "temperature": request.temperature,
            "topP": request.top_p,
            "stopSequences": request.stop,
        },
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
impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn chat_completion(
        &self,
        _ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChatCompletionResponse> {
        let client = self.client().await?;
        let response = client
            .post(self.url(model, "generateContent", secret))
            .json(&generate_content_body(request))
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(super::http_error(status.as_u16(), &body));
        }
        parse_generate_content(&body)
    }

    async fn chat_completion_stream(
        &self,
        _ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChunkReceiver> {
        let client = self.client().await?;
        let response = client
            .post(self.url(model, "streamGenerateContent", secret))
            .json(&generate_content_body(request))
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
        secret: &str,
        model: &str,
        request: &EmbeddingRequest,
    ) -> ProviderResult<EmbeddingResponse> {
        let client = self.client().await?;
        let body = serde_json::json!({
            "requests": request.inputs.iter().map(|text| serde_json::json!({
                "model": format!("models/{model}"),
                "content": { "parts": [{ "text": text }] },
            })).collect::<Vec<_>>(),
        });
        let response = client
            .post(self.url(model, "batchEmbedContents", secret))
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
                entry["values"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect::<Vec<f32>>()
            })
            .collect();
        Ok(EmbeddingResponse { vectors, usage: Usage::default() })
    }
}

fn extract_text(candidate: &serde_json::Value) -> String {
    candidate["content"]["parts"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|part| part["text"].as_str())
        .collect::<Vec<_>>()
        .join("")
}

fn parse_generate_content(body: &str) -> ProviderResult<ChatCompletionResponse> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ErrorKind::ProviderInternal(e.to_string()))?;
    let candidate = &value["candidates"][0];
    Ok(ChatCompletionResponse {
        message: Message::text(Role::Assistant, extract_text(candidate)),
        tool_calls: Vec::new(),
        finish_reason: candidate["finishReason"].as_str().unwrap_or_default().to_string(),
        usage: Usage {
            prompt_tokens: value["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            completion_tokens: value["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
            total_tokens: value["usageMetadata"]["totalTokenCount"].as_u64().unwrap_or(0) as u32,
        },
    })
}

async fn pump_stream(mut response: wreq::Response, tx: mpsc::Sender<StreamChunk>) {
    let mut decoder = StreamDecoder::new();
    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                for event in decoder.push(&bytes) {
                    if let Some(chunk) = parse_chunk_event(&event) {
                        if tx.send(chunk).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Ok(None) => {
                for event in decoder.finish() {
                    if let Some(chunk) = parse_chunk_event(&event) {
                        let _ = tx.send(chunk).await;
                    }
                }
                let _ = tx
                    .send(StreamChunk {
                        operation: Operation::ChatCompletion,
                        delta: None,
                        finish_reason: Some("stop".to_string()),
                        usage: None,
                        error: None,
                        extra: ChunkExtra { provider: "google".to_string(), latency_ms: 0 },
                    })
                    .await;
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
                        extra: ChunkExtra { provider: "google".to_string(), latency_ms: 0 },
                    })
                    .await;
                return;
            }
        }
    }
}

fn parse_chunk_event(data: &str) -> Option<StreamChunk> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let candidate = &value["candidates"][0];
    let text = extract_text(candidate);
    if text.is_empty() {
        return None;
    }
    Some(StreamChunk {
        operation: Operation::ChatCompletion,
        delta: Some(ChunkDelta::Text(text)),
        finish_reason: candidate["finishReason"].as_str().map(str::to_string),
        usage: None,
        error: None,
        extra: ChunkExtra { provider: "google".to_string(), latency_ms: 0 },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_role_is_pulled_into_system_instruction() {
        let request = ChatCompletionRequest {
            messages: vec![
                Message::text(Role::System, "be terse"),
                Message::text(Role::User, "hi"),
            ],
            ..Default::default()
        };
        let body = generate_content_body(&request);
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
    }

    #[test]
    fn empty_text_chunk_is_skipped() {
        assert!(parse_chunk_event(r#"{"candidates":[{"content":{"parts":[]}}]}"#).is_none());
    }
}
