use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text(text.into())],
        }
    }

    /// Concatenation of every `Text` block, in order. Used by the fingerprint
    /// normalizer's semantic projection; tool-call JSON and image bytes are
    /// deliberately excluded.
    pub fn text_only(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One block of message content. Image content is represented by a stable
/// reference (a URL or a content fingerprint of decoded bytes) rather than by
/// an inline data-URL, so that two requests carrying the same image hash
/// identically regardless of how the caller encoded it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(String),
    Image { reference: ImageReference },
    ToolUse(ToolCall),
    ToolResult { tool_call_id: String, content: String, is_error: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageReference {
    Url(String),
    /// BLAKE3 content hash of decoded image bytes, computed once by the
    /// caller-facing layer so the fingerprint normalizer never has to decode
    /// base64 itself.
    ContentHash([u8; 32]),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}
