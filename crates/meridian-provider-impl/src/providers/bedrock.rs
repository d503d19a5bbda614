use std::time::SystemTime;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{SignableBody, SignableRequest, SigningSettings, sign};
use aws_sigv4::sign::v4::SigningParams;
use meridian_common::ErrorKind;
use meridian_protocol::{ChatCompletionRequest, ChatCompletionResponse, Message, Role, Usage};
use meridian_provider_core::{AdapterCtx, ClientKey, ClientPool, ProviderAdapter, ProviderResult};

const DEFAULT_REGION: &str = "us-east-1";

/// Amazon Bedrock's `invoke-model` surface: request/response shape is
/// provider-internal and varies per foundation model, so this adapter
/// forwards a minimal, model-agnostic chat payload and signs every request
/// with SigV4 rather than a bearer token (§4.3 — "modeled abstractly").
/// Credential secrets are encoded as `access_key:secret_key[:session_token]`.
pub struct BedrockAdapter {
    region: String,
    clients: ClientPool,
}

impl BedrockAdapter {
    pub fn new(region: Option<String>) -> Self {
        Self {
            region: region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
            clients: ClientPool::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("https://bedrock-runtime.{}.amazonaws.com", self.region)
    }

    async fn client(&self) -> ProviderResult<std::sync::Arc<wreq::Client>> {
        self.clients
            .get_or_create(ClientKey {
                provider: "bedrock".to_string(),
                endpoint: self.endpoint(),
                tls: true,
            })
            .await
    }
}

struct SplitSecret {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
}

fn split_secret(secret: &str) -> ProviderResult<SplitSecret> {
    let mut parts = secret.splitn(3, ':');
    let access_key = parts.next().unwrap_or_default().to_string();
    let secret_key = parts.next().unwrap_or_default().to_string();
    if access_key.is_empty() || secret_key.is_empty() {
        return Err(ErrorKind::AuthError(
            "bedrock credential must be access_key:secret_key[:session_token]".to_string(),
        ));
    }
    Ok(SplitSecret {
        access_key,
        secret_key,
        session_token: parts.next().map(str::to_string),
    })
}

fn sign_headers(
    region: &str,
    method: &str,
    url: &str,
    body: &[u8],
    secret: &SplitSecret,
) -> ProviderResult<Vec<(String, String)>> {
    let credentials = Credentials::new(
        &secret.access_key,
        &secret.secret_key,
        secret.session_token.clone(),
        None,
        "meridian-bedrock",
    );
    let identity = credentials.into();
    let signing_params: SigningParams<'_> = SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name("bedrock")
        .time(SystemTime::now())
        .settings(SigningSettings::default())
        .build()
        .map_err(|err| ErrorKind::ProviderInternal(err.to_string()))?
        .into();

    let signable = SignableRequest::new(
        method,
        url,
        std::iter::once(("content-type", "application/json")),
        SignableBody::Bytes(body),
    )
    .map_err(|err| ErrorKind::ProviderInternal(err.to_string()))?;

    let (instructions, _signature) = sign(signable, &signing_params)
        .map_err(|err| ErrorKind::ProviderInternal(err.to_string()))?
        .into_parts();

    Ok(instructions
        .headers()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect())
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn name(&self) -> &'static str {
        "bedrock"
    }

    async fn chat_completion(
        &self,
        _ctx: &AdapterCtx,
        secret: &str,
        model: &str,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChatCompletionResponse> {
        let secret = split_secret(secret)?;
        let url = format!("{}/model/{model}/invoke", self.endpoint());
        let body = serde_json::json!({
            "messages": request.messages.iter().map(|m| serde_json::json!({
                "role": match m.role { Role::Assistant => "assistant", _ => "user" },
                "content": m.text_only(),
            })).collect::<Vec<_>>(),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        let body_bytes = serde_json::to_vec(&body).map_err(|e| ErrorKind::ProviderInternal(e.to_string()))?;
        let signed_headers = sign_headers(&self.region, "POST", &url, &body_bytes, &secret)?;

        let client = self.client().await?;
        let mut builder = client.post(&url).body(body_bytes);
        for (name, value) in &signed_headers {
            builder = builder.header(name, value);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| ErrorKind::TransportError(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| ErrorKind::TransportError(err.to_string()))?;
        if !status.is_success() {
            return Err(super::http_error(status.as_u16(), &text));
        }
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ErrorKind::ProviderInternal(e.to_string()))?;
        let text_out = value["content"][0]["text"]
            .as_str()
            .or_else(|| value["completion"].as_str())
            .unwrap_or_default();
        Ok(ChatCompletionResponse {
            message: Message::text(Role::Assistant, text_out),
            tool_calls: Vec::new(),
            finish_reason: value["stop_reason"].as_str().unwrap_or_default().to_string(),
            usage: Usage {
                prompt_tokens: value["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: value["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
                total_tokens: 0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_secret_requires_access_and_secret_key() {
        assert!(split_secret("AKIA:shh").is_ok());
        assert!(split_secret("only-access-key").is_err());
    }

    #[test]
    fn split_secret_carries_optional_session_token() {
        let parsed = split_secret("AKIA:shh:token").unwrap();
        assert_eq!(parsed.session_token.as_deref(), Some("token"));
    }
}
