//! OpenAI Chat Completions backend for caption synthesis.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::conversation::{ChatMessage, Conversation};
use super::pricing::Usage;
use super::{Summary, SummaryBackend};
use crate::config::OpenAiConfig;
use crate::error::PipelineError;
use crate::retry::send_error;

/// Environment variable consulted when no key is configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Resolve `${ENV_VAR}` references in config strings.
pub fn resolve_env_var(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).ok().filter(|v| !v.is_empty())
    } else if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Pick the API key: explicit flag, then config, then `OPENAI_API_KEY`.
pub fn resolve_api_key(flag: Option<&str>, config: &OpenAiConfig) -> Option<String> {
    flag.filter(|k| !k.is_empty())
        .map(String::from)
        .or_else(|| resolve_env_var(&config.api_key))
        .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
}

/// Chat Completions client.
pub struct OpenAiChat {
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(api_key: &str, config: &OpenAiConfig, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, conversation: &Conversation) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: conversation.messages(),
            max_tokens: self.max_tokens,
            n: 1,
            stop: None,
            temperature: self.temperature,
        }
    }
}

// --- Request types ---

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    n: u32,
    stop: Option<Vec<String>>,
    temperature: f32,
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl SummaryBackend for OpenAiChat {
    fn name(&self) -> &str {
        "openai"
    }

    async fn summarize(&self, conversation: &Conversation) -> Result<Summary, PipelineError> {
        let body = self.request_body(conversation);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| send_error("openai", self.timeout, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                tracing::warn!("Rate limit exceeded. Waiting before retrying...");
            }
            return Err(PipelineError::Llm {
                message: format!("OpenAI HTTP {status}: {text}"),
                status_code: Some(status.as_u16()),
            });
        }

        let chat_resp: ChatResponse = resp.json().await.map_err(|e| PipelineError::Llm {
            message: format!("Failed to parse OpenAI response: {e}"),
            status_code: None,
        })?;

        let text = chat_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PipelineError::Llm {
                message: "OpenAI returned no message content".to_string(),
                status_code: None,
            })?;

        Ok(Summary {
            text,
            usage: chat_resp.usage,
        })
    }
}
