//! Model Gateway. Every model call in the assessment pipeline goes through here.
//!
//! `ChatTransport` is the network seam: `LlmClient` speaks the OpenAI-compatible
//! chat-completions protocol with transport retries, tests script it with canned replies.
//! `ModelGateway` builds the message sequence, attaches the response schema and turns the
//! raw completion into a validated stage payload (repairing it first when needed).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{Client, StatusCode};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmConfig;

pub mod prompts;
pub mod repair;

use repair::{repair_response, strip_json_fences, RepairError, ResponseShape};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timed out {phase} after {after:?}")]
    Timeout { phase: &'static str, after: Duration },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LlmError> },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Response failed {schema} validation: {detail}")]
    Schema { schema: &'static str, detail: String },
}

impl LlmError {
    /// Transport-level failures worth another attempt. HTTP 4xx never is.
    pub fn is_retriable(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            LlmError::Timeout { .. } => true,
            LlmError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<RepairError> for LlmError {
    fn from(e: RepairError) -> Self {
        LlmError::Schema {
            schema: "repair",
            detail: e.to_string(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: &'static str,
    pub json_schema: JsonSchemaFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonSchemaFormat {
    pub name: &'static str,
    pub schema: serde_json::Value,
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub response_format: ResponseFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionBody {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ApiErrorMessage {
    message: String,
}

/// Token counts for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub thinking_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens + self.thinking_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.thinking_tokens += other.thinking_tokens;
    }
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        let reported = usage
            .completion_tokens_details
            .and_then(|d| d.reasoning_tokens);
        let thinking = reported.unwrap_or_else(|| {
            usage
                .total_tokens
                .saturating_sub(usage.prompt_tokens)
                .saturating_sub(usage.completion_tokens)
        });
        TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            thinking_tokens: thinking,
        }
    }
}

/// A usable response from the provider, before schema validation.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: TokenUsage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

/// One chat-completion exchange with the provider, transport retries included.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError>;
}

/// Retry policy for transport failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), plus up to base/4 jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        let jitter_cap = (self.base_delay.as_millis() / 4) as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_cap)
        };
        backoff + Duration::from_millis(jitter)
    }
}

/// Connect / write / read budgets for a single HTTP exchange.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub write: Duration,
    pub read: Duration,
}

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    endpoint: String,
    api_key: String,
    retry: RetryPolicy,
    timeouts: Timeouts,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeouts.connect)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            retry: config.retry,
            timeouts: config.timeouts,
        })
    }

    async fn attempt(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        // reqwest 0.11 has no separate write budget, so the request deadline covers both.
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeouts.write + self.timeouts.read)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = tokio::time::timeout(self.timeouts.read, response.text())
            .await
            .map_err(|_| LlmError::Timeout {
                phase: "reading response",
                after: self.timeouts.read,
            })??;

        if !status.is_success() {
            return Err(api_error(status, body));
        }

        let parsed: ChatCompletionBody = serde_json::from_str(&body).map_err(|e| LlmError::Schema {
            schema: "chat_completion",
            detail: e.to_string(),
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyContent)?;

        let usage = TokenUsage::from(parsed.usage.unwrap_or_default());
        debug!(
            "LLM call succeeded in {}ms: input_tokens={}, output_tokens={}, thinking_tokens={}",
            clock.elapsed().as_millis(),
            usage.input_tokens,
            usage.output_tokens,
            usage.thinking_tokens
        );

        Ok(ChatCompletion {
            content,
            usage,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

fn api_error(status: StatusCode, body: String) -> LlmError {
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    LlmError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl ChatTransport for LlmClient {
    /// Retries on timeouts, connection/protocol failures and 5xx with exponential backoff.
    /// 4xx responses fail immediately.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let attempts = self.retry.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(request).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retriable() && attempt < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "LLM call attempt {}/{} failed ({}), retrying after {}ms...",
                        attempt,
                        attempts,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retriable() => {
                    return Err(LlmError::RetriesExhausted {
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gateway
// ────────────────────────────────────────────────────────────────────────────

/// A stage payload the gateway can request and validate.
pub trait StructuredOutput: DeserializeOwned + JsonSchema {
    const SCHEMA_NAME: &'static str;
    const SHAPE: ResponseShape;
}

/// Everything that varies per call.
#[derive(Debug, Clone)]
pub struct GatewayCall<'a> {
    pub content: &'a str,
    pub system_instructions: &'a str,
    pub model: &'a str,
    pub temperature: f32,
    pub reasoning_budget: Option<i32>,
    pub examples: &'a [ChatMessage],
}

#[derive(Clone)]
pub struct ModelGateway {
    transport: Arc<dyn ChatTransport>,
}

impl ModelGateway {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }

    /// Sends one schema-constrained request and returns the raw completion.
    pub async fn request<T: StructuredOutput>(
        &self,
        call: &GatewayCall<'_>,
    ) -> Result<ChatCompletion, LlmError> {
        let request = build_request::<T>(call);
        self.transport.complete(&request).await
    }

    /// Validates `content` against `T`, repairing it first if the direct parse fails.
    pub fn decode<T: StructuredOutput>(content: &str) -> Result<T, LlmError> {
        let stripped = strip_json_fences(content);
        if let Ok(parsed) = serde_json::from_str::<T>(stripped) {
            return Ok(parsed);
        }

        let repaired = repair_response(content, T::SHAPE)?;
        serde_json::from_value::<T>(repaired).map_err(|e| LlmError::Schema {
            schema: T::SCHEMA_NAME,
            detail: e.to_string(),
        })
    }
}

pub fn build_request<T: StructuredOutput>(call: &GatewayCall<'_>) -> ChatRequest {
    let mut messages = Vec::with_capacity(call.examples.len() + 2);
    messages.push(ChatMessage::system(call.system_instructions));
    messages.extend(call.examples.iter().cloned());
    messages.push(ChatMessage::user(call.content));

    let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default();

    ChatRequest {
        model: call.model.to_string(),
        messages,
        temperature: call.temperature,
        response_format: ResponseFormat {
            format_type: "json_schema",
            json_schema: JsonSchemaFormat {
                name: T::SCHEMA_NAME,
                schema,
                strict: false,
            },
        },
        reasoning_effort: reasoning_effort(call.reasoning_budget),
    }
}

/// Maps a thinking-token budget onto the provider's coarse effort levels.
pub fn reasoning_effort(budget: Option<i32>) -> Option<&'static str> {
    match budget {
        None => None,
        Some(b) if b <= 0 => None,
        Some(b) if b <= 1024 => Some("low"),
        Some(b) if b <= 8192 => Some("medium"),
        Some(_) => Some("high"),
    }
}
