//! OpenAI-compatible chat-completions generator.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{DescriptionGenerator, EnrichmentConfig};
use crate::error::{DataDictError, Result};

/// Longest slice of an error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// [`DescriptionGenerator`] backed by a chat-completions HTTP endpoint.
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Zeroizing<String>,
}

impl std::fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl OpenAiGenerator {
    /// # Errors
    /// Returns a configuration error for a blank key, an invalid
    /// configuration, or an HTTP client that cannot be built.
    pub fn new(api_key: String, config: &EnrichmentConfig) -> Result<Self> {
        let api_key = Zeroizing::new(api_key);
        if api_key.trim().is_empty() {
            return Err(DataDictError::configuration(
                "an API key is required for enrichment",
            ));
        }
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                DataDictError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn first_choice_text(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default().trim().to_string())
        .ok_or_else(|| DataDictError::enrichment("response contained no choices"))
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut = cut.saturating_sub(1);
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

#[async_trait]
impl DescriptionGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| DataDictError::enrichment_failed("request to description service failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Description service returned {}", status);
            return Err(DataDictError::enrichment(format!(
                "description service returned {}: {}",
                status,
                truncate_body(body)
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            DataDictError::enrichment_failed("malformed description service response", e)
        })?;
        first_choice_text(parsed)
    }
}
