// Completion backend trait and the OpenAI-compatible HTTP implementation
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::classifier::snippet;
use crate::config::{parse_duration, VerifierConfig};
use crate::verifier::types::VerifierError;

/// Token counts reported by the service for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Raw answer from the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Message content, expected to hold the verdict JSON
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// Trait for chat-completion backends
///
/// Allows swapping the HTTP client for a scripted one in tests.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Issue one request with a system instruction and a user message
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, VerifierError>;
}

/// API credential; never printed
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Read the key from the named environment variable
    pub fn from_env(var: &str) -> Result<Self, VerifierError> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(Self(key.trim().to_string())),
            _ => Err(VerifierError::MissingApiKey {
                env: var.to_string(),
            }),
        }
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// reqwest-based client for OpenAI-compatible `/chat/completions` endpoints
#[derive(Debug)]
pub struct HttpCompletionBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: ApiKey,
    temperature: f32,
    max_tokens: u32,
}

impl HttpCompletionBackend {
    pub fn new(config: &VerifierConfig, api_key: ApiKey) -> Result<Self, VerifierError> {
        let timeout = parse_duration(&config.request_timeout).unwrap_or(Duration::from_secs(30));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerifierError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, VerifierError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| VerifierError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VerifierError::Status {
                status: status.as_u16(),
                body: snippet(&body, 200).to_string(),
            });
        }

        let envelope: ChatResponse = response
            .json()
            .await
            .map_err(|e| VerifierError::Envelope(e.without_url().to_string()))?;

        let content = envelope
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| VerifierError::Envelope("response has no message content".to_string()))?;

        Ok(Completion {
            content,
            usage: envelope.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-very-secret");
        let printed = format!("{:?}", key);
        assert!(!printed.contains("sk-very-secret"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn test_api_key_from_missing_env() {
        let result = ApiKey::from_env("CANNECT_TEST_MISSING_API_KEY_VAR");
        assert!(matches!(result, Err(VerifierError::MissingApiKey { .. })));
    }

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest {
            model: "deepseek-chat",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "rubric",
                },
                ChatMessage {
                    role: "user",
                    content: "post",
                },
            ],
            temperature: 0.1,
            max_tokens: 200,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "deepseek-chat");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "post");
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_response_envelope_parsing() {
        let body = r#"{
            "id": "cmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"score\":6,\"category\":\"news\",\"reason\":\"policy\"}"}}],
            "usage": {"prompt_tokens": 150, "completion_tokens": 20, "total_tokens": 170}
        }"#;
        let envelope: ChatResponse = serde_json::from_str(body).unwrap();
        let usage = envelope.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 150);
        assert_eq!(usage.completion_tokens, 20);
        assert!(envelope.choices[0]
            .message
            .content
            .as_deref()
            .unwrap()
            .contains("\"score\":6"));
    }

    #[test]
    fn test_backend_builds_from_default_config() {
        let config = crate::config::Config::default();
        let backend = HttpCompletionBackend::new(&config.verifier, ApiKey::new("k"));
        assert!(backend.is_ok());
    }
}
