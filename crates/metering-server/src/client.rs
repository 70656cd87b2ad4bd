//! Client for the OpenAI-compatible completion backend.
//!
//! The gateway meters and routes; generation happens at a separate
//! backend speaking the `/chat/completions` wire format. The client is a
//! trait so tests can swap in a scripted double without a network.

use async_trait::async_trait;
use metering_core::ModelId;
use reqwest::header;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Errors from the completion backend.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// The backend could not be reached.
    #[error("Completion backend unreachable: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("Completion backend returned {status}")]
    Backend {
        /// HTTP status from the backend.
        status: u16,
    },

    /// The backend's response did not match the expected shape.
    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),
}

/// One generated completion plus the token usage the backend reported.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Generated assistant text.
    pub content: String,
    /// Prompt tokens consumed.
    pub input_tokens: u32,
    /// Completion tokens produced.
    pub output_tokens: u32,
}

/// A backend that turns a user message into a completion.
#[async_trait]
pub trait CompletionClient: Send + Sync + 'static {
    /// Generate a completion for a single user message.
    async fn complete(
        &self,
        model: &ModelId,
        message: &str,
    ) -> Result<Completion, CompletionError>;
}

/// Rough token count for text with no tokenizer at hand; used for the
/// pre-generation estimate and as a fallback when a backend omits usage.
#[must_use]
pub fn approx_tokens(text: &str) -> u32 {
    u32::try_from(text.chars().count() / 4 + 1).unwrap_or(u32::MAX)
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// HTTP client for an OpenAI-compatible backend.
pub struct HttpCompletionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpCompletionClient {
    /// Create a client for the backend at `base_url` (for example
    /// `http://127.0.0.1:8000/v1`).
    ///
    /// # Errors
    /// Returns a transport error if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        model: &ModelId,
        message: &str,
    ) -> Result<Completion, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = json!({
            "model": model,
            "messages": [{"role": "user", "content": message}],
            "temperature": 0.2,
            "stream": false,
        });

        let mut request = self.http.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", key.expose_secret()),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Backend {
                status: status.as_u16(),
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

        let content = wire
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CompletionError::MalformedResponse("no choices".into()))?;

        let (input_tokens, output_tokens) = wire.usage.map_or_else(
            || (approx_tokens(message), approx_tokens(&content)),
            |u| (u.prompt_tokens, u.completion_tokens),
        );

        debug!(model = %model, input_tokens, output_tokens, "Completion received");
        Ok(Completion {
            content,
            input_tokens,
            output_tokens,
        })
    }
}

impl std::fmt::Debug for HttpCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletionClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_tokens() {
        assert_eq!(approx_tokens(""), 1);
        assert_eq!(approx_tokens("abcd"), 2);
        assert_eq!(approx_tokens(&"x".repeat(400)), 101);
    }

    #[test]
    fn test_wire_response_parsing() {
        let json = r#"{
            "choices": [{"message": {"role": "assistant", "content": "hi"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let wire: WireResponse = serde_json::from_str(json).unwrap();
        assert_eq!(wire.choices[0].message.content, "hi");
        assert_eq!(wire.usage.unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_wire_response_without_usage() {
        let json = r#"{"choices": [{"message": {"content": "hello"}}]}"#;
        let wire: WireResponse = serde_json::from_str(json).unwrap();
        assert!(wire.usage.is_none());
    }
}
