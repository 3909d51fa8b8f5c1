//! Anthropic Messages API backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::errors::{BackendError, LlmErrorKind};
use crate::llm_client::{
    classify_status, classify_transport, retry_after, Completion, CompletionBackend,
    CompletionRequest,
};
use crate::models::TokenUsage;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    temperature: f32,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicResponse {
    /// Concatenates every text block.
    fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();
        (!parts.is_empty()).then(|| parts.concat())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(config.timeout).build()?,
            api_key: config.api_key.clone(),
            model: config.model_id.clone(),
            max_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        // JSON mode and web search have no direct equivalent here; the prompt
        // already demands JSON and the processor strips stray fences.
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: &request.system,
            temperature: request.temperature,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &request.user,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::new(classify_transport(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let hint = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(BackendError::new(
                classify_status(status.as_u16()),
                format!("Anthropic API returned {status}: {message}"),
            )
            .with_retry_after(hint));
        }

        let body = response
            .text()
            .await
            .map_err(|e| BackendError::new(classify_transport(&e), e.to_string()))?;
        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<Completion, BackendError> {
    let parsed: AnthropicResponse = serde_json::from_str(body).map_err(|e| {
        BackendError::new(
            LlmErrorKind::InvalidResponse,
            format!("undecodable Anthropic response: {e}"),
        )
    })?;
    let text = parsed.text().ok_or_else(|| {
        BackendError::new(
            LlmErrorKind::InvalidResponse,
            "Anthropic response has no text content",
        )
    })?;
    Ok(Completion {
        text,
        usage: TokenUsage {
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_joins_text_blocks() {
        let body = r#"{
            "content": [
                {"type": "text", "text": "{\"summary\":"},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": " \"ok\"}"}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 4}
        }"#;
        let completion = parse_response(body).unwrap();
        assert_eq!(completion.text, "{\"summary\": \"ok\"}");
        assert_eq!(completion.usage.total(), 16);
    }

    #[test]
    fn test_parse_response_without_text_is_invalid() {
        let body = r#"{"content": [], "usage": {"input_tokens": 1, "output_tokens": 0}}"#;
        let err = parse_response(body).unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::InvalidResponse);
    }

    #[test]
    fn test_parse_response_garbage_is_invalid() {
        let err = parse_response("<html>bad gateway</html>").unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::InvalidResponse);
    }

    #[test]
    fn test_request_serializes_like_messages_api() {
        let body = AnthropicRequest {
            model: "claude-sonnet-4-5",
            max_tokens: 1024,
            system: "be terse",
            temperature: 0.2,
            messages: vec![AnthropicMessage {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["system"], "be terse");
        assert_eq!(json["max_tokens"], 1024);
    }
}
