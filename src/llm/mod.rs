pub mod parse;
pub mod types;

pub use types::Summary;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. Output valid JSON only.";

/// A single failed attempt against the generative model.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Model API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected response: {0}")]
    Response(String),

    #[error("Malformed model output: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport(err.to_string())
    }
}

/// Raised once every attempt has failed.
#[derive(Debug, Error)]
#[error("Generation failed after {attempts} attempt(s): {last}")]
pub struct GenerationError {
    pub attempts: u32,
    #[source]
    pub last: LlmError,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
    /// Ask the service for a JSON object response
    pub json_mode: bool,
}

/// Raw text completion from some generative-text service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError>;
}

/// Bounded retry with backoff.
///
/// The delay after failed attempt `n` (1-based) is `base_delay * n`, or
/// `base_delay * multiplier^(n-1)` when a multiplier is set. Either way it never
/// exceeds `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: Option<f64>,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: None,
            max_delay: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.multiplier {
            None => self.base_delay.checked_mul(attempt),
            Some(multiplier) => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * multiplier.powi(exponent)).ok()
            }
        };
        delay.map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Where backoff waits happen. Swapped out in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Wraps a [`TextGenerator`] with the JSON contract and retry policy.
#[derive(Clone)]
pub struct GenerativeClient {
    generator: Arc<dyn TextGenerator>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    model: String,
    temperature: f32,
}

impl GenerativeClient {
    pub fn new(generator: Arc<dyn TextGenerator>, policy: RetryPolicy, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            generator,
            sleeper: Arc::new(TokioSleeper),
            policy,
            model: model.into(),
            temperature,
        }
    }

    #[cfg(test)]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Send `prompt` and parse a [`Summary`] from the reply, retrying transport
    /// and parse failures up to `policy.max_attempts` times.
    #[instrument(skip(self, prompt), fields(prompt_chars = prompt.len()))]
    pub async fn generate_structured(&self, prompt: &str) -> Result<Summary, GenerationError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last = None;

        for attempt in 1..=max_attempts {
            debug!(attempt, "LLM generation attempt");
            match self.attempt(prompt).await {
                Ok(summary) => {
                    info!(attempt, "LLM generation succeeded");
                    return Ok(summary);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "LLM generation attempt failed");
                    last = Some(err);
                    if attempt < max_attempts {
                        self.sleeper.sleep(self.policy.delay_after(attempt)).await;
                    }
                }
            }
        }

        Err(GenerationError {
            attempts: max_attempts,
            last: last.unwrap_or_else(|| LlmError::Response("no attempt was made".to_string())),
        })
    }

    async fn attempt(&self, prompt: &str) -> Result<Summary, LlmError> {
        let request = LlmRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: prompt.to_string(),
            model: self.model.clone(),
            temperature: self.temperature,
            json_mode: true,
        };
        let text = tokio::time::timeout(self.policy.attempt_timeout, self.generator.complete(request))
            .await
            .map_err(|_| LlmError::Timeout(self.policy.attempt_timeout))??;
        parse::parse_summary(&text)
    }
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiChatClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl TextGenerator for OpenAiChatClient {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            response_format: request.json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Response("missing choices[0].message.content".to_string()))
    }
}
