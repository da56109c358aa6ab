//! Text-generation backends.
//!
//! Every agent role talks to its model through the narrow [`Generate`]
//! capability: one prompt in, one text out. [`RoleGenerator`] binds a
//! [`Backend`] (Anthropic Messages API or any OpenAI-compatible
//! `/chat/completions` endpoint) to a role's system prompt and temperature.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Prompt → text. The only capability the pipeline needs from a model.
pub trait Generate: Send + Sync {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// A single-turn completion request.
#[derive(Debug, Clone, Copy)]
pub struct Completion<'a> {
    /// Omitted from the request when empty.
    pub system: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A model endpoint able to answer single-turn completions.
pub trait Backend: Send + Sync {
    fn complete<'a>(&'a self, request: Completion<'a>) -> BoxFuture<'a, Result<String>>;
}

/// Per-role generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub system: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            system: String::new(),
            temperature: 0.5,
            max_tokens: 4096,
        }
    }
}

/// A backend bound to one role's settings.
pub struct RoleGenerator {
    backend: Arc<dyn Backend>,
    settings: GenerationSettings,
}

impl RoleGenerator {
    pub fn new(backend: Arc<dyn Backend>, settings: GenerationSettings) -> Self {
        Self { backend, settings }
    }
}

impl Generate for RoleGenerator {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        self.backend.complete(Completion {
            system: &self.settings.system,
            prompt,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        })
    }
}

// ── Anthropic Messages API ─────────────────────────────────────────

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Only text is read; no tools are offered, so other block types are skipped.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Response from the Messages API.
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl ApiResponse {
    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Claude API client.
pub struct LlmClient {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Send a conversation and get the raw response.
    pub async fn chat(&self, system: &str, messages: &[Message], max_tokens: u32, temperature: f32) -> Result<ApiResponse> {
        let mut body = serde_json::json!({
            "model": &self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system.to_string());
        }

        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .context("Failed to call Claude API")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Claude API error {status}: {body}");
        }

        let response = resp
            .json::<ApiResponse>()
            .await
            .context("Failed to parse Claude response")?;
        if let Some(usage) = &response.usage {
            tracing::debug!(
                model = %self.model,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                stop_reason = response.stop_reason.as_deref().unwrap_or("-"),
                "Claude usage"
            );
        }
        Ok(response)
    }
}

impl Backend for LlmClient {
    fn complete<'a>(&'a self, request: Completion<'a>) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let messages = [Message {
                role: "user".to_string(),
                content: request.prompt.to_string(),
            }];
            let resp = self
                .chat(request.system, &messages, request.max_tokens, request.temperature)
                .await?;
            Ok(resp.text())
        })
    }
}

// ── OpenAI-compatible chat completions ─────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Client for `/chat/completions` endpoints (OpenAI, DashScope, vLLM, ...).
pub struct ChatCompletionsClient {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(api_key: String, base_url: &str) -> Self {
        Self {
            api_key,
            model: "qwen-turbo".to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn request_body(&self, request: &Completion<'_>) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(serde_json::json!({ "role": "system", "content": request.system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));
        serde_json::json!({
            "model": &self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }
}

impl Backend for ChatCompletionsClient {
    fn complete<'a>(&'a self, request: Completion<'a>) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let resp = self
                .http
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .timeout(REQUEST_TIMEOUT)
                .json(&self.request_body(&request))
                .send()
                .await
                .context("Failed to call chat completions API")?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Chat completions error {status}: {body}");
            }

            let response = resp
                .json::<ChatResponse>()
                .await
                .context("Failed to parse chat completions response")?;
            if let Some(usage) = &response.usage {
                tracing::debug!(
                    model = %self.model,
                    input_tokens = usage.prompt_tokens,
                    output_tokens = usage.completion_tokens,
                    "Chat completions usage"
                );
            }
            response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .context("Chat completions response had no assistant content")
        })
    }
}
