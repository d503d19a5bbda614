use crate::policy::FingerprintPolicy;
use meridian_protocol::{ContentBlock, ImageReference, Message, Request, RequestPayload, Role};
use serde_json::{json, Value};

/// Builds the canonical JSON value whose serialized bytes are hashed to
/// produce the direct fingerprint. Fields with no bearing on cacheability
/// (request id, metadata trace tags, wall-clock time) are never included.
pub(crate) fn canonicalize(request: &Request, policy: &FingerprintPolicy) -> Value {
    let mut root = serde_json::Map::new();
    root.insert("operation".into(), json!(request.operation));
    if !policy.model_portable {
        root.insert("model".into(), json!(request.model));
    }
    root.insert("payload".into(), canonicalize_payload(&request.payload));
    root.insert(
        "params".into(),
        Value::Object(
            request
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
    );
    Value::Object(root)
}

fn canonicalize_payload(payload: &RequestPayload) -> Value {
    match payload {
        RequestPayload::ChatCompletion(r) => json!({
            "messages": r.messages.iter().map(canonicalize_message).collect::<Vec<_>>(),
            "max_tokens": r.max_tokens,
            "temperature": r.temperature,
            "top_p": r.top_p,
            "stop": r.stop,
            "tools": r.tools.iter().map(|t| json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })).collect::<Vec<_>>(),
        }),
        RequestPayload::TextCompletion(r) => json!({
            "prompt": r.prompt,
            "max_tokens": r.max_tokens,
            "temperature": r.temperature,
            "top_p": r.top_p,
            "stop": r.stop,
        }),
        RequestPayload::Embedding(r) => json!({ "inputs": r.inputs }),
        RequestPayload::Speech(r) => json!({
            "input": r.input,
            "voice": r.voice,
            "format": r.format,
        }),
        RequestPayload::Transcription(r) => json!({
            "audio_hash": blake3::hash(&r.audio).to_hex().to_string(),
            "format": r.format,
            "language": r.language,
        }),
        RequestPayload::ListModels(r) => json!({
            "page_token": r.page_token,
            "page_size": r.page_size,
        }),
    }
}

fn canonicalize_message(message: &Message) -> Value {
    json!({
        "role": role_tag(message.role),
        "content": message.content.iter().map(canonicalize_block).collect::<Vec<_>>(),
    })
}

fn role_tag(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn canonicalize_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text(text) => json!({ "type": "text", "text": text }),
        ContentBlock::Image { reference } => match reference {
            ImageReference::Url(url) => json!({ "type": "image", "url": url }),
            ImageReference::ContentHash(hash) => {
                json!({ "type": "image", "content_hash": hex::encode(hash) })
            }
        },
        ContentBlock::ToolUse(call) => json!({
            "type": "tool_use",
            "name": call.name,
            "arguments": call.arguments,
        }),
        ContentBlock::ToolResult { tool_call_id, content, is_error } => json!({
            "type": "tool_result",
            "tool_call_id": tool_call_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            write!(out, "{byte:02x}").expect("writing to a String never fails");
        }
        out
    }
}
