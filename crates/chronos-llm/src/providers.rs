//! Remote model clients.
//!
//! Every client performs exactly one attempt per `generate` call. Non-success
//! responses are surfaced as `Error::Http` carrying the status and the raw body,
//! so the retry controller can classify them from the text alone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chronos_core::{Error, Result};
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::config::LLMConfig;
use crate::types::{GenerationParams, LLMProvider};

/// One attempt of a text generation call.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Send `prompt` and return the model's textual answer.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    /// Model name, for logs and artifact metadata.
    fn model(&self) -> &str;
}

/// Build the generator for the configured provider.
///
/// Without a usable credential the returned generator fails every call with a
/// configuration error, which aborts the run at its first model call.
pub fn create_generator(config: &LLMConfig, request_timeout: Duration) -> Arc<dyn TextGenerator> {
    let client = Client::builder()
        .timeout(request_timeout)
        .build()
        .unwrap_or_else(|_| Client::new());

    match config.resolve_provider() {
        Some((LLMProvider::Gemini, model, key)) => Arc::new(GeminiClient::new(client, model, key)),
        Some((LLMProvider::OpenAI, model, key)) => Arc::new(OpenAiCompatClient::new(
            client,
            "https://api.openai.com/v1/chat/completions",
            model,
            key,
        )),
        None => Arc::new(UnconfiguredGenerator),
    }
}

const GEMINI_API_ROOT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    client: Client,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(client: Client, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn request_body(prompt: &str, params: &GenerationParams) -> serde_json::Value {
        json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": params,
            "safetySettings": [
                {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE"},
                {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE"},
            ],
        })
    }
}

/// Concatenate the text parts of the first candidate.
fn gemini_text(response: &serde_json::Value) -> Option<String> {
    let parts = response["candidates"][0]["content"]["parts"].as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", GEMINI_API_ROOT, self.model);
        debug!("Calling Gemini model {} ({} prompt chars)", self.model, prompt.len());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(prompt, params))
            .send()
            .await
            .map_err(|e| Error::Http(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("API error {}: {}", status, body)));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("Response decode failed: {}", e)))?;

        gemini_text(&parsed).ok_or(Error::EmptyResponse)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// OpenAI-compatible chat completions client (non-streaming).
pub struct OpenAiCompatClient {
    client: Client,
    url: String,
    model: String,
    api_key: String,
}

impl OpenAiCompatClient {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatClient {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": params.temperature,
            "top_p": params.top_p,
            "max_tokens": params.max_output_tokens,
        });

        debug!("Calling {} with model {}", self.url, self.model);

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("API error {}: {}", status, body)));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("Response decode failed: {}", e)))?;

        match parsed["choices"][0]["message"]["content"].as_str() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => Err(Error::EmptyResponse),
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Stand-in used when no provider credential is available.
pub struct UnconfiguredGenerator;

#[async_trait]
impl TextGenerator for UnconfiguredGenerator {
    async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<String> {
        Err(Error::Config(
            "no model credential configured (set GOOGLE_API_KEY or OPENAI_API_KEY)".into(),
        ))
    }

    fn model(&self) -> &str {
        "unconfigured"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_text_joins_parts() {
        let response = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Node(id='a', "}, {"text": "type='X')"}]}
            }]
        });
        assert_eq!(gemini_text(&response).as_deref(), Some("Node(id='a', type='X')"));
    }

    #[test]
    fn test_gemini_text_empty_is_none() {
        assert!(gemini_text(&json!({"candidates": []})).is_none());
        let blank = json!({"candidates": [{"content": {"parts": [{"text": "  "}]}}]});
        assert!(gemini_text(&blank).is_none());
    }

    #[test]
    fn test_request_body_carries_params() {
        let body = GeminiClient::request_body("hi", &GenerationParams::with_temperature(0.8));
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["generationConfig"]["temperature"], 0.8);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
    }

    #[tokio::test]
    async fn test_unconfigured_generator_is_fatal() {
        let generator = create_generator(&LLMConfig::default(), Duration::from_secs(5));
        let err = generator
            .generate("prompt", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(generator.model(), "unconfigured");
    }
}
