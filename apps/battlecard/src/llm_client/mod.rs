/// LLM Client: the single point of entry for all completion calls.
///
/// ARCHITECTURAL RULE: No other module may talk to a model provider directly.
/// Backends perform exactly one HTTP attempt; timeout, retry and rate limiting
/// live here so every provider gets the same behaviour.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::{debug, warn};

use crate::config::{LlmConfig, LlmProvider};
use crate::errors::{BackendError, LlmError, LlmErrorKind};
use crate::models::TokenUsage;

pub mod anthropic;
pub mod gemini;
pub mod prompts;
pub mod rate_limit;
pub mod retry;

use rate_limit::RateLimiter;
use retry::{RetryDecision, RetryPolicy};

/// One completion call: a system instruction plus a single user message.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Ask the backend for a bare JSON body.
    pub json_output: bool,
    /// Allow the backend to ground the answer with web search, where supported.
    pub web_search: bool,
}

impl CompletionRequest {
    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.2,
            json_output: true,
            web_search: false,
        }
    }

    pub fn research(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 1.0,
            json_output: false,
            web_search: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// A text-completion provider. Implementations make a single attempt and
/// classify any failure into an `LlmErrorKind`.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError>;
}

/// Builds the configured provider backend.
pub fn build_backend(config: &LlmConfig) -> Result<Arc<dyn CompletionBackend>, reqwest::Error> {
    Ok(match config.provider {
        LlmProvider::Gemini => Arc::new(gemini::GeminiBackend::new(config)?),
        LlmProvider::Anthropic => Arc::new(anthropic::AnthropicBackend::new(config)?),
    })
}

/// Wraps a backend with a per-call timeout, bounded retries and the shared limiter.
#[derive(Clone)]
pub struct LlmClient {
    backend: Arc<dyn CompletionBackend>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            limiter,
            policy,
            timeout,
        }
    }

    pub fn from_config(
        backend: Arc<dyn CompletionBackend>,
        limiter: Arc<RateLimiter>,
        config: &LlmConfig,
    ) -> Self {
        Self::new(
            backend,
            limiter,
            RetryPolicy::new(config.max_retries),
            config.timeout,
        )
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    /// Sends the request, retrying transient failures per the policy.
    /// Returns the raw text (possibly empty) and usage on success.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let result = match tokio::time::timeout(self.timeout, self.backend.complete(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::new(
                    LlmErrorKind::Timeout,
                    format!("no response within {}s", self.timeout.as_secs()),
                )),
            };

            let error = match result {
                Ok(completion) => {
                    debug!(
                        attempt,
                        input_tokens = completion.usage.input_tokens,
                        output_tokens = completion.usage.output_tokens,
                        "LLM call succeeded"
                    );
                    return Ok(completion);
                }
                Err(error) => error,
            };

            if error.kind == LlmErrorKind::RateLimited {
                let pause = error
                    .retry_after
                    .unwrap_or_else(|| self.policy.backoff(attempt))
                    .min(self.policy.max_delay);
                self.limiter.pause_for(pause).await;
            }

            match self.policy.decide(attempt, error.kind, error.retry_after) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        kind = %error.kind,
                        "LLM call failed, retrying after {}ms: {}",
                        delay.as_millis(),
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(LlmError {
                        kind: error.kind,
                        message: error.message,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

/// Maps an HTTP status from a provider to an error kind.
pub fn classify_status(status: u16) -> LlmErrorKind {
    match status {
        408 | 504 => LlmErrorKind::Timeout,
        // 529 is Anthropic's "overloaded".
        429 | 503 | 529 => LlmErrorKind::RateLimited,
        500..=599 => LlmErrorKind::TransportFailure,
        _ => LlmErrorKind::InvalidResponse,
    }
}

/// Maps a transport-level reqwest failure to an error kind.
pub fn classify_transport(err: &reqwest::Error) -> LlmErrorKind {
    if err.is_timeout() {
        LlmErrorKind::Timeout
    } else if err.is_decode() || err.is_body() {
        LlmErrorKind::InvalidResponse
    } else {
        LlmErrorKind::TransportFailure
    }
}

/// Reads a `Retry-After` header given in whole seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
