//! Text generation service
//!
//! `TextGenerator` is the capability the pipeline and the extractor talk to:
//! plain completions, structured (JSON) extraction and rebinding to another
//! model for the fallback run. `OpenAiClient` implements it over the chat
//! completions endpoint.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One completion returned by the generation service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub model: String,
    /// `None` when the service returned no message content.
    pub content: Option<String>,
}

impl Completion {
    pub fn new(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: Some(content.into()),
        }
    }

    pub fn empty(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: None,
        }
    }

    /// The completion text, or `""` if absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A value the generation service can be asked to produce as JSON.
pub trait Shape: DeserializeOwned + Send {
    const NAME: &'static str;

    /// JSON description of the expected object, included in the prompt.
    fn schema() -> serde_json::Value;

    /// Checks serde cannot express.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model this generator is bound to.
    fn model(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<Completion>;

    /// Ask for a JSON object following `schema`.
    async fn extract_json(&self, prompt: &str, shape: &str, schema: &serde_json::Value) -> Result<serde_json::Value> {
        let completion = self.complete(&structured_prompt(prompt, shape, schema)).await?;
        parse_json_object(completion.text(), shape)
    }

    /// Same service, different model.
    fn with_model(&self, model: &str) -> Arc<dyn TextGenerator>;
}

/// Structured extraction: the response must deserialize into `T` and pass its validation.
pub async fn extract<T: Shape>(llm: &dyn TextGenerator, prompt: &str) -> Result<T> {
    let value = llm.extract_json(prompt, T::NAME, &T::schema()).await?;
    let parsed: T = serde_json::from_value(value).map_err(|e| AgentError::ShapeValidation {
        shape: T::NAME.to_string(),
        message: e.to_string(),
    })?;
    parsed.validate().map_err(|message| AgentError::ShapeValidation {
        shape: T::NAME.to_string(),
        message,
    })?;
    Ok(parsed)
}

fn structured_prompt(prompt: &str, shape: &str, schema: &serde_json::Value) -> String {
    format!(
        "{}\n\nReturn a single JSON object describing a {} with exactly these fields:\n{}\nOnly return the JSON, no other text.",
        prompt, shape, schema
    )
}

/// Parse a model response as a JSON object, tolerating markdown fences.
pub fn parse_json_object(response: &str, shape: &str) -> Result<serde_json::Value> {
    // Clean response - remove markdown code blocks if present
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let value: serde_json::Value = serde_json::from_str(cleaned).map_err(|e| AgentError::ShapeValidation {
        shape: shape.to_string(),
        message: format!("Failed to parse JSON: {}. Response: {}", e, cleaned),
    })?;
    if !value.is_object() {
        return Err(AgentError::ShapeValidation {
            shape: shape.to_string(),
            message: format!("Expected a JSON object, got: {}", cleaned),
        });
    }
    Ok(value)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url,
            model,
        })
    }

    async fn chat(&self, system: &str, prompt: &str, json_mode: bool) -> Result<Completion> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: 0.1,
            response_format: json_mode.then(|| serde_json::json!({"type": "json_object"})),
        };

        debug!("Calling {} with {} prompt chars", self.model, prompt.len());
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(format!("LLM API call failed: {}", e)))?;

        // Check HTTP status
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AgentError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Llm("Empty choices array in LLM response".to_string()))?;

        match choice.finish_reason.as_deref() {
            Some("length") => warn!("LLM response from {} was truncated due to length limit", self.model),
            Some("content_filter") => {
                return Err(AgentError::Llm("LLM response was filtered by content policy".to_string()))
            }
            _ => {}
        }

        Ok(Completion {
            model: self.model.clone(),
            content: choice.message.and_then(|m| m.content),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<Completion> {
        self.chat("You are a helpful data analyst.", prompt, false).await
    }

    async fn extract_json(&self, prompt: &str, shape: &str, schema: &serde_json::Value) -> Result<serde_json::Value> {
        let completion = self
            .chat(
                "You are a precise JSON-only responder. Always return valid JSON, no other text.",
                &structured_prompt(prompt, shape, schema),
                true,
            )
            .await?;
        parse_json_object(completion.text(), shape)
    }

    fn with_model(&self, model: &str) -> Arc<dyn TextGenerator> {
        Arc::new(Self {
            model: model.to_string(),
            ..self.clone()
        })
    }
}
