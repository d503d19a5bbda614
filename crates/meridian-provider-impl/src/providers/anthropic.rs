use async_trait::async_trait;
use meridian_common::ErrorKind;
use meridian_protocol::{
    ChatCompletionRequest, ChatCompletionResponse, ChunkDelta, ChunkExtra, Message, Operation,
    Role, StreamChunk, Usage,
};
use meridian_provider_core::{
    AdapterCtx, ChunkReceiver, ClientKey, ClientPool, ProviderAdapter, ProviderResult,
};
use tokio::sync::mpsc;

use crate::http;
use crate::stream_decode::StreamDecoder;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const STREAM_CHANNEL_CAPACITY: usize = 16;
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    base_url: String,
    clients: ClientPool,
}

impl AnthropicAdapter {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            clients: ClientPool::new(),
        }
    }

    async fn client(&self) -> ProviderResult<std::sync::Arc<wreq::Client>> {
        self.clients
            .get_or_create(ClientKey {
                provider: "anthropic".to_string(),
                endpoint: self.base_url.clone(),
                tls: self.base_url.starts_with("https"),
            })
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", http::trim_base(&self.base_url), path.trim_start_matches('/'))
    }
}

fn split_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system = Vec::new();
    let mut rest = Vec::new();
    for message in messages {
        if message.role == Role::System {
            system.push(message.text_only());
        } else {
            rest.push(message);
        }
    }
    let system = if system.is_empty() { None } else { Some(system.join("\n")) };
    (system, rest)
}

fn messages_body(request: &ChatCompletionRequest, model: &str, stream: bool) -> serde_json::Value {
    let (system, rest) = split_system(&request.messages);
    let messages: Vec<serde_json::Value> = rest
        .iter()
        .map(|message| {
            serde_json::json!({
                "role": match message.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                },
                "content": message.text_only(),
            })
        })
        .collect();
    serde_json::json!({
        "model": model,
        "system": system,
        "messages": messages,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "temperature": request.temperature,
        "top_p": request.top_p,
        "stop_sequences": request.stop,
        "stream": stream,
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
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
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
            .post(self.url("v1/messages"))
            .header("x-api-key", secret)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&messages_body(request, model, false))
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport)?;
        if !status.is_success() {
            return Err(super::http_error(status.as_u16(), &body));
        }
        parse_message(&body)
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
            .post(self.url("v1/messages"))
            .header("x-api-key", secret)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&messages_body(request, model, true))
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
}

fn parse_message(body: &str) -> ProviderResult<ChatCompletionResponse> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ErrorKind::ProviderInternal(e.to_string()))?;
    let text = value["content"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|block| block["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    Ok(ChatCompletionResponse {
        message: Message::text(Role::Assistant, text),
        tool_calls: Vec::new(),
        finish_reason: value["stop_reason"].as_str().unwrap_or_default().to_string(),
        usage: Usage {
            prompt_tokens: value["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: value["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: (value["usage"]["input_tokens"].as_u64().unwrap_or(0)
                + value["usage"]["output_tokens"].as_u64().unwrap_or(0)) as u32,
        },
    })
}

async fn pump_stream(mut response: wreq::Response, tx: mpsc::Sender<StreamChunk>) {
    let mut decoder = StreamDecoder::new();
    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                for event in decoder.push(&bytes) {
                    if let Some(chunk) = parse_stream_event(&event) {
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
                    if let Some(chunk) = parse_stream_event(&event) {
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
                        extra: ChunkExtra { provider: "anthropic".to_string(), latency_ms: 0 },
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
                        extra: ChunkExtra { provider: "anthropic".to_string(), latency_ms: 0 },
                    })
                    .await;
                return;
            }
        }
    }
}

fn parse_stream_event(data: &str) -> Option<StreamChunk> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let extra = ChunkExtra { provider: "anthropic".to_string(), latency_ms: 0 };
    match value["type"].as_str()? {
        "content_block_delta" => {
            let text = value["delta"]["text"].as_str()?;
            Some(StreamChunk {
                operation: Operation::ChatCompletion,
                delta: Some(ChunkDelta::Text(text.to_string())),
                finish_reason: None,
                usage: None,
                error: None,
                extra,
            })
        }
        "message_delta" => Some(StreamChunk {
            operation: Operation::ChatCompletion,
            delta: None,
            finish_reason: value["delta"]["stop_reason"].as_str().map(str::to_string),
            usage: Some(Usage {
                prompt_tokens: 0,
                completion_tokens: value["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
                total_tokens: value["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
            }),
            error: None,
            extra,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_pulled_out_of_the_turn_list() {
        let messages = vec![
            Message::text(Role::System, "be terse"),
            Message::text(Role::User, "hi"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system, Some("be terse".to_string()));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn content_block_delta_becomes_text_chunk() {
        let chunk = parse_stream_event(
            r#"{"type":"content_block_delta","delta":{"text":"hi"}}"#,
        )
        .unwrap();
        assert!(matches!(chunk.delta, Some(ChunkDelta::Text(ref t)) if t == "hi"));
    }
}
