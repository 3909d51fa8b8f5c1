//! Gemini `generateContent` backend, either through the public Generative
//! Language API (API key) or a Vertex AI project (OAuth access token).

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

const GENERATIVE_LANGUAGE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeminiEndpoint {
    Public,
    Vertex { project: String, location: String },
}

impl GeminiEndpoint {
    fn url(&self, model: &str) -> String {
        match self {
            GeminiEndpoint::Public => format!("{GENERATIVE_LANGUAGE_URL}/{model}:generateContent"),
            GeminiEndpoint::Vertex { project, location } => format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:generateContent"
            ),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: String,
}

pub struct GeminiBackend {
    client: Client,
    credential: String,
    model: String,
    endpoint: GeminiEndpoint,
    max_output_tokens: u32,
}

impl GeminiBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, reqwest::Error> {
        let endpoint = match &config.project {
            Some(project) => GeminiEndpoint::Vertex {
                project: project.clone(),
                location: config.location.clone(),
            },
            None => GeminiEndpoint::Public,
        };
        Ok(Self {
            client: Client::builder().timeout(config.timeout).build()?,
            credential: config.api_key.clone(),
            model: config.model_id.clone(),
            endpoint,
            max_output_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let body = build_request(request, self.max_output_tokens);

        let builder = self.client.post(self.endpoint.url(&self.model)).json(&body);
        let builder = match self.endpoint {
            GeminiEndpoint::Public => builder.header("x-goog-api-key", &self.credential),
            GeminiEndpoint::Vertex { .. } => builder.bearer_auth(&self.credential),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::new(classify_transport(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let hint = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GeminiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(BackendError::new(
                classify_status(status.as_u16()),
                format!("Gemini API returned {status}: {message}"),
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

fn build_request(request: &CompletionRequest, max_output_tokens: u32) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: vec![Content {
            role: Some("user"),
            parts: vec![Part {
                text: &request.user,
            }],
        }],
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: &request.system,
            }],
        },
        generation_config: GenerationConfig {
            temperature: request.temperature,
            max_output_tokens,
            response_mime_type: request.json_output.then_some("application/json"),
        },
        tools: if request.web_search {
            vec![Tool {
                google_search: serde_json::json!({}),
            }]
        } else {
            Vec::new()
        },
    }
}

fn parse_response(body: &str) -> Result<Completion, BackendError> {
    let parsed: GenerateResponse = serde_json::from_str(body).map_err(|e| {
        BackendError::new(
            LlmErrorKind::InvalidResponse,
            format!("undecodable Gemini response: {e}"),
        )
    })?;

    if let Some(reason) = parsed
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(BackendError::new(
            LlmErrorKind::InvalidResponse,
            format!("prompt blocked by Gemini: {reason}"),
        ));
    }

    let candidate = parsed.candidates.first().ok_or_else(|| {
        BackendError::new(LlmErrorKind::InvalidResponse, "Gemini returned no candidates")
    })?;
    let text: String = candidate
        .content
        .as_ref()
        .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
        .unwrap_or_default();

    let usage = parsed
        .usage_metadata
        .map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    Ok(Completion { text, usage })
}
