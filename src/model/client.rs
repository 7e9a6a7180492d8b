//! OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use super::decision::{Decision, DecisionError, DecisionModel, DecisionRequest};
use super::messages::MessageBuilder;
use crate::config::get_system_prompt;

/// Default number of retry attempts for failed requests.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between retry attempts in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// Model client errors.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Failed to parse response: {0}")]
    ParseError(String),
    #[error("API error {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("Gave up after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },
}

impl ModelError {
    /// Network failures, timeouts, rate limits and 5xx answers are worth
    /// another attempt; everything else is final.
    fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed(_) => true,
            Self::ApiError { status, body } => {
                let body = body.to_lowercase();
                *status == 429
                    || (500..600).contains(status)
                    || body.contains("timeout")
                    || body.contains("rate limit")
            }
            Self::ParseError(_) | Self::MaxRetriesExceeded { .. } => false,
        }
    }
}

/// Endpoint and sampling settings for the decision model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    /// Merged verbatim into the request body.
    pub extra_body: Map<String, Value>,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Language of the system prompt ("cn" or "en").
    pub lang: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let mut extra_body = Map::new();
        extra_body.insert("skip_special_tokens".to_string(), json!(false));

        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            api_key: "EMPTY".to_string(),
            model_name: "autoglm-phone-9b".to_string(),
            max_tokens: 3000,
            temperature: 0.0,
            top_p: 0.85,
            frequency_penalty: 0.2,
            extra_body,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            lang: "cn".to_string(),
        }
    }
}

impl ModelConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Seconds to wait between attempts.
    pub fn with_retry_delay(mut self, delay_secs: u64) -> Self {
        self.retry_delay_secs = delay_secs;
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// A completion split into its reasoning and its answer.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub thinking: String,
    pub action: String,
    pub raw_content: String,
}

impl ModelResponse {
    /// Split `<think>..</think><answer>..</answer>`. Content without an
    /// answer tag is taken as the answer.
    pub fn from_content(raw_content: String) -> Self {
        let (thinking, action) = match raw_content.split_once("<answer>") {
            Some((before, after)) => (
                before
                    .replace("<think>", "")
                    .replace("</think>", "")
                    .trim()
                    .to_string(),
                after.replace("</answer>", "").trim().to_string(),
            ),
            None => (String::new(), raw_content.trim().to_string()),
        };
        Self {
            thinking,
            action,
            raw_content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

/// Client for an OpenAI-compatible vision-language endpoint.
pub struct ModelClient {
    config: ModelConfig,
    http: Client,
}

impl ModelClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn request_body(&self, messages: &[Value]) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(self.config.model_name));
        body.insert("messages".into(), json!(messages));
        body.insert("max_tokens".into(), json!(self.config.max_tokens));
        body.insert("temperature".into(), json!(self.config.temperature));
        body.insert("top_p".into(), json!(self.config.top_p));
        body.insert("frequency_penalty".into(), json!(self.config.frequency_penalty));
        for (key, value) in &self.config.extra_body {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }

    /// Send `messages` and return the parsed completion, retrying transient
    /// failures up to `max_retries` times.
    pub async fn request(&self, messages: &[Value]) -> Result<ModelResponse, ModelError> {
        let url = self.config.endpoint();
        let body = self.request_body(messages);
        let attempts = self.config.max_retries + 1;

        let mut attempt = 1;
        loop {
            let error = match self.send_once(&url, &body).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };
            if attempt >= attempts {
                return Err(ModelError::MaxRetriesExceeded {
                    attempts,
                    last: error.to_string(),
                });
            }
            tracing::warn!(
                attempt,
                attempts,
                retry_in_secs = self.config.retry_delay_secs,
                "model request failed: {}",
                error
            );
            sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
            attempt += 1;
        }
    }

    async fn send_once(&self, url: &str, body: &Value) -> Result<ModelResponse, ModelError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let completion: Completion = response.json().await?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::ParseError("No choices in response".to_string()))?;

        Ok(ModelResponse::from_content(choice.message.content))
    }
}

#[async_trait]
impl DecisionModel for ModelClient {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision, DecisionError> {
        let system_prompt = get_system_prompt(&self.config.lang);
        let messages = MessageBuilder::build_conversation(&system_prompt, &request);

        let response = self
            .request(&messages)
            .await
            .map_err(|e| DecisionError::Request(e.to_string()))?;
        tracing::debug!(raw = %response.raw_content, "model answered");

        Ok(Decision::from_answer(response.thinking, &response.action))
    }
}
