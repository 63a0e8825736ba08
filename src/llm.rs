//! Language-model clients used to generate answers and summaries.
//!
//! [`LanguageModel`] is the single seam the retriever and summarizer depend
//! on. Implementations:
//! - **[`DisabledModel`]**: returns errors; used when no LLM is configured.
//! - **[`GeminiModel`]**: Google Generative Language `generateContent` API
//!   (`GOOGLE_API_KEY`).
//! - **[`ChatCompletionsModel`]**: any OpenAI-compatible `chat/completions`
//!   endpoint, used for both `openai` (`OPENAI_API_KEY`) and `ollama`.
//!
//! Every completion is a single-turn prompt; conversation history is kept by
//! the caller and is never sent to the model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{DocChatError, Result};
use crate::http;

/// Default Gemini model when `[llm] model` is unset.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;
    /// Complete `prompt`, returning the model's text reply.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

// ============ Disabled ============

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(DocChatError::provider(
            "llm",
            "language model is disabled; set [llm] provider in config",
        ))
    }
}

// ============ Gemini ============

pub struct GeminiModel {
    model: String,
    api_key: String,
    base_url: String,
    temperature: f32,
    max_output_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY").map_err(|_| {
            DocChatError::provider("gemini", "GOOGLE_API_KEY environment variable not set")
        })?;
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs, "gemini")?,
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
            }
        });
        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let json = http::post_json_with_retry("gemini", self.max_retries, || {
            self.client
                .post(&endpoint)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;
        let text = parse_gemini_response(&json)?;
        debug!(model = %self.model, chars = text.len(), "gemini completion");
        Ok(text)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates returned");
            DocChatError::provider("gemini", format!("empty response: {}", reason))
        })?;

    Ok(parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

// ============ OpenAI-compatible chat completions ============

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for OpenAI-compatible `chat/completions` endpoints (OpenAI, Ollama).
pub struct ChatCompletionsModel {
    provider: &'static str,
    model: String,
    api_key: Option<String>,
    base_url: String,
    temperature: f32,
    max_output_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl ChatCompletionsModel {
    pub fn openai(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            DocChatError::provider("openai", "OPENAI_API_KEY environment variable not set")
        })?;
        Self::build(
            "openai",
            config,
            Some(api_key),
            config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            "gpt-4o-mini",
        )
    }

    pub fn ollama(config: &LlmConfig) -> Result<Self> {
        let host = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Self::build(
            "ollama",
            config,
            None,
            format!("{}/v1", host.trim_end_matches('/')),
            "llama3.1",
        )
    }

    fn build(
        provider: &'static str,
        config: &LlmConfig,
        api_key: Option<String>,
        base_url: String,
        default_model: &str,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            api_key,
            base_url,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs, provider)?,
        })
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_output_tokens,
            stream: false,
        };
        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let json = http::post_json_with_retry(self.provider, self.max_retries, || {
            let mut req = self.client.post(&endpoint).json(&request);
            if let Some(key) = &self.api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }
            req
        })
        .await?;

        let response: ChatResponse = serde_json::from_value(json)
            .map_err(|e| DocChatError::provider(self.provider, format!("invalid response: {}", e)))?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(provider = self.provider, model = %self.model, chars = text.len(), "chat completion");
        Ok(text)
    }
}

/// Create the configured [`LanguageModel`].
///
/// | Config Value | Model |
/// |-------------|-------|
/// | `"disabled"` | [`DisabledModel`] |
/// | `"gemini"` | [`GeminiModel`] |
/// | `"openai"` | [`ChatCompletionsModel::openai`] |
/// | `"ollama"` | [`ChatCompletionsModel::ollama`] |
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "gemini" => Ok(Arc::new(GeminiModel::new(config)?)),
        "openai" => Ok(Arc::new(ChatCompletionsModel::openai(config)?)),
        "ollama" => Ok(Arc::new(ChatCompletionsModel::ollama(config)?)),
        other => Err(DocChatError::provider(
            "llm",
            format!("unknown llm provider: {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_parts_are_concatenated() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "The deadline " }, { "text": "is March 1." }] }
            }]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "The deadline is March 1.");
    }

    #[test]
    fn gemini_blocked_prompt_is_provider_error() {
        let json = serde_json::json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = parse_gemini_response(&json).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn chat_request_serializes_single_user_turn() {
        let request = ChatRequest {
            model: "llama3.1",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.0,
            max_tokens: 16,
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["stream"], false);
    }

    #[tokio::test]
    async fn disabled_model_errors() {
        let model = create_language_model(&LlmConfig::default()).unwrap();
        assert_eq!(model.model_name(), "disabled");
        assert!(model.complete("hello").await.is_err());
    }

    #[test]
    fn ollama_needs_no_key() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            url: Some("http://127.0.0.1:11434/".to_string()),
            ..LlmConfig::default()
        };
        let model = ChatCompletionsModel::ollama(&config).unwrap();
        assert_eq!(model.base_url, "http://127.0.0.1:11434/v1");
        assert_eq!(model.model_name(), "llama3.1");
    }
}
