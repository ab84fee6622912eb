//! Completion Service Integration
//!
//! The language model is an opaque collaborator: given a system role, a prompt
//! and a temperature it returns text or fails. Pipeline steps never see the
//! failure; `complete_with_fallback` records it in the session and hands back
//! the step's fixed fallback text instead.

use super::memory::Session;
use crate::config::CompletionConfig;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::time::Duration;
use thiserror::Error;

/// Transcript notice shown when a step falls back
pub const UNAVAILABLE_NOTICE: &str = "AI service unavailable, using fallback";

// ============================================================
// ERRORS
// ============================================================

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Completion service not configured (set OPENAI_API_KEY)")]
    NotConfigured,

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Service returned an empty response")]
    EmptyResponse,
}

// ============================================================
// REQUEST & CLIENT TRAIT
// ============================================================

/// One completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_role: String,
    pub prompt: String,
    /// Always within 0.0..=1.0
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(system_role: &str, prompt: &str, temperature: f32, max_tokens: u32) -> Self {
        let temperature = if temperature.is_nan() {
            0.0
        } else {
            temperature.clamp(0.0, 1.0)
        };
        Self {
            system_role: system_role.to_string(),
            prompt: prompt.to_string(),
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

// ============================================================
// OPENAI-COMPATIBLE CLIENT
// ============================================================

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Client for any OpenAI-compatible chat completions endpoint
pub struct OpenAiCompletionClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiCompletionClient {
    pub fn new(config: &CompletionConfig, api_key: &str) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_role,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(
            "Completion call: model={} temperature={} max_tokens={}",
            self.model, request.temperature, request.max_tokens
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;

        extract_text(parsed)
    }
}

fn extract_text(response: ChatCompletionResponse) -> Result<String, CompletionError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(CompletionError::EmptyResponse)
}

// ============================================================
// OFFLINE CLIENT (demo mode)
// ============================================================

/// Used when no API key is configured; every call fails so each step
/// serves its fallback text.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineCompletionClient;

#[async_trait]
impl CompletionClient for OfflineCompletionClient {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
        Err(CompletionError::NotConfigured)
    }
}

// ============================================================
// FALLBACK WRAPPER
// ============================================================

/// Call the completion service on behalf of `agent`.
///
/// On failure (including a blank response) the error is recorded in the
/// session under `agent` and `fallback` is returned; the error never reaches
/// the caller.
pub async fn complete_with_fallback(
    client: &dyn CompletionClient,
    session: &mut Session,
    agent: &str,
    request: &CompletionRequest,
    fallback: &str,
) -> String {
    let result = match client.complete(request).await {
        Ok(text) if text.trim().is_empty() => Err(CompletionError::EmptyResponse),
        other => other,
    };

    match result {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!("{} completion failed, using fallback: {}", agent, e);

            let mut metadata = Map::new();
            metadata.insert("error".to_string(), json!(e.to_string()));
            metadata.insert("fallback".to_string(), json!(true));
            if let Err(record_err) = session.record(agent, UNAVAILABLE_NOTICE, Some(metadata)) {
                warn!("Could not record fallback notice: {}", record_err);
            }

            fallback.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoClient;

    #[async_trait]
    impl CompletionClient for EchoClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            Ok(format!("echo: {}", request.prompt))
        }
    }

    #[test]
    fn test_request_clamps_temperature() {
        assert_eq!(CompletionRequest::new("r", "p", 1.7, 10).temperature, 1.0);
        assert_eq!(CompletionRequest::new("r", "p", -0.2, 10).temperature, 0.0);
        assert_eq!(CompletionRequest::new("r", "p", f32::NAN, 10).temperature, 0.0);
        assert_eq!(CompletionRequest::new("r", "p", 0.4, 10).temperature, 0.4);
    }

    #[test]
    fn test_extract_text() {
        let parsed: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"  Focus on SQL.  "}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(parsed).unwrap(), "Focus on SQL.");

        let empty: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(matches!(extract_text(empty), Err(CompletionError::EmptyResponse)));

        let none: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(extract_text(none), Err(CompletionError::EmptyResponse)));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = CompletionConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..CompletionConfig::default()
        };
        let client = OpenAiCompletionClient::new(&config, "key").unwrap();
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_success_records_nothing() {
        let mut session = Session::new();
        let request = CompletionRequest::new("coach", "hello", 0.5, 50);

        let text = complete_with_fallback(&EchoClient, &mut session, "FeedbackAgent", &request, "fb").await;

        assert_eq!(text, "echo: hello");
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_failure_records_notice_and_returns_fallback() {
        let mut session = Session::new();
        let request = CompletionRequest::new("coach", "hello", 0.5, 50);

        let text = complete_with_fallback(
            &OfflineCompletionClient,
            &mut session,
            "FeedbackAgent",
            &request,
            "No strong evidence, but upskilling recommended.",
        )
        .await;

        assert_eq!(text, "No strong evidence, but upskilling recommended.");
        let entries = session.entries_by_agent("FeedbackAgent");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].message().contains("unavailable"));
        assert_eq!(entries[0].metadata()["fallback"], json!(true));
    }

    #[tokio::test]
    async fn test_blank_response_uses_fallback() {
        struct BlankClient;

        #[async_trait]
        impl CompletionClient for BlankClient {
            async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
                Ok("   ".to_string())
            }
        }

        let mut session = Session::new();
        let request = CompletionRequest::new("coach", "hello", 0.5, 50);
        let text = complete_with_fallback(&BlankClient, &mut session, "LearningAgent", &request, "plan").await;

        assert_eq!(text, "plan");
        assert_eq!(session.len(), 1);
    }
}
