//! # Generative Backend
//!
//! The seam between skills and a text-generation service. Every response is
//! raw text; callers route it through
//! [`structured_output`](crate::tools::structured_output) before trusting it.
//!
//! [`HttpBackend`] speaks the three wire formats the supported providers use.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::BackendError;
use crate::models::{ModelConfig, WireFormat};
use crate::tools::structured_output::preview;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Agent id of the caller, for logs and scripted test backends
    pub caller: String,
    pub model: ModelConfig,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    /// Per-call deadline; enforced by the caller and passed to the transport
    pub timeout: Duration,
}

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError>;

    /// Short label for logs and reports
    fn name(&self) -> &str {
        "backend"
    }
}

/// HTTP backend for the hosted providers in [`crate::models::LlmProvider`]
#[derive(Clone, Default)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn api_key(request: &CompletionRequest) -> Result<String, BackendError> {
        let var = request.model.provider.api_key_env();
        std::env::var(var).map_err(|_| BackendError::ServiceError {
            status: Some(401),
            message: format!("{} is not set", var),
        })
    }

    fn build(&self, request: &CompletionRequest) -> Result<reqwest::RequestBuilder, BackendError> {
        let key = Self::api_key(request)?;
        let base = request.model.endpoint_base();
        let model = &request.model;

        let builder = match model.provider.wire_format() {
            WireFormat::AnthropicMessages => self
                .client
                .post(format!("{}/messages", base))
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&json!({
                    "model": model.model,
                    "max_tokens": model.max_output_tokens,
                    "temperature": request.temperature,
                    "system": request.system,
                    "messages": [{"role": "user", "content": request.prompt}],
                })),
            WireFormat::ChatCompletions => self
                .client
                .post(format!("{}/chat/completions", base))
                .bearer_auth(key)
                .json(&json!({
                    "model": model.model,
                    "max_tokens": model.max_output_tokens,
                    "temperature": request.temperature,
                    "messages": [
                        {"role": "system", "content": request.system},
                        {"role": "user", "content": request.prompt},
                    ],
                })),
            WireFormat::GeminiGenerateContent => self
                .client
                .post(format!(
                    "{}/models/{}:generateContent?key={}",
                    base,
                    urlencoding::encode(&model.model),
                    urlencoding::encode(&key)
                ))
                .json(&json!({
                    "systemInstruction": {"parts": [{"text": request.system}]},
                    "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
                    "generationConfig": {
                        "temperature": request.temperature,
                        "maxOutputTokens": model.max_output_tokens,
                    },
                })),
        };
        Ok(builder.timeout(request.timeout))
    }
}

#[async_trait]
impl GenerativeBackend for HttpBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let response = self
            .build(request)?
            .send()
            .await
            .map_err(|e| transport_error(e, request.timeout))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::QuotaExceeded(preview(&body, 200)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::ServiceError {
                status: Some(status.as_u16()),
                message: preview(&body, 500),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| transport_error(e, request.timeout))?;

        extract_text(request.model.provider.wire_format(), &body).ok_or_else(|| {
            BackendError::service(format!(
                "response had no text content: {}",
                preview(&body.to_string(), 200)
            ))
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else {
        BackendError::ServiceError {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Pull the generated text out of a provider response body.
pub fn extract_text(format: WireFormat, body: &Value) -> Option<String> {
    let parts: Vec<&str> = match format {
        WireFormat::AnthropicMessages => body["content"]
            .as_array()?
            .iter()
            .filter_map(|block| block["text"].as_str())
            .collect(),
        WireFormat::ChatCompletions => vec![body["choices"][0]["message"]["content"].as_str()?],
        WireFormat::GeminiGenerateContent => body["candidates"][0]["content"]["parts"]
            .as_array()?
            .iter()
            .filter_map(|part| part["text"].as_str())
            .collect(),
    };
    if parts.is_empty() {
        None
    } else {
        Some(parts.concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_per_format() {
        let anthropic = json!({"content": [{"type": "text", "text": "{\"a\":"}, {"type": "text", "text": "1}"}]});
        assert_eq!(
            extract_text(WireFormat::AnthropicMessages, &anthropic).as_deref(),
            Some("{\"a\":1}")
        );

        let openai = json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]});
        assert_eq!(
            extract_text(WireFormat::ChatCompletions, &openai).as_deref(),
            Some("hello")
        );

        let gemini = json!({"candidates": [{"content": {"parts": [{"text": "ok"}]}}]});
        assert_eq!(
            extract_text(WireFormat::GeminiGenerateContent, &gemini).as_deref(),
            Some("ok")
        );

        assert_eq!(extract_text(WireFormat::GeminiGenerateContent, &json!({})), None);
        assert_eq!(
            extract_text(WireFormat::AnthropicMessages, &json!({"content": []})),
            None
        );
    }
}
