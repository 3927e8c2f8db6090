//! OpenAI chat-completions client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Settings, DEFAULT_OPENAI_BASE_URL};
use crate::error::{ModelError, ModelResult, Result, ScrapeError};
use crate::security::ApiKey;
use crate::traits::model::{ChatMessage, ModelClient, ModelConfig};

pub const MISSING_CREDENTIALS: &str = "OpenAI credentials are required for LLM agent modes";

/// [`ModelClient`] over `POST {base_url}/chat/completions`.
#[derive(Clone)]
pub struct OpenAIModel {
    http_client: Client,
    api_key: ApiKey,
    base_url: String,
}

impl OpenAIModel {
    pub fn new(api_key: impl Into<ApiKey>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }

    /// Build from settings. Fails when no usable key is configured.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let key = settings
            .openai_api_key
            .clone()
            .ok_or_else(|| ScrapeError::MissingCredentials(MISSING_CREDENTIALS.to_string()))?;
        Ok(Self::new(key).with_base_url(&settings.openai_base_url))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// Rate limits and server errors are worth retrying; other statuses are not.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> ModelError {
    let message = format!("OpenAI API error ({}): {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ModelError::Transient(message)
    } else {
        ModelError::Fatal(message)
    }
}

#[async_trait]
impl ModelClient for OpenAIModel {
    async fn complete(&self, messages: &[ChatMessage], config: &ModelConfig) -> ModelResult<String> {
        let start = std::time::Instant::now();

        let request = ChatRequest {
            model: &config.model,
            messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OpenAI request failed");
                ModelError::Transient(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "OpenAI API error");
            return Err(classify_status(status, &error_text));
        }

        let chat_response: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| ModelError::Fatal(format!("failed to parse response: {}", e)))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ModelError::EmptyResponse)?;

        debug!(
            model = %config.model,
            duration_ms = start.elapsed().as_millis(),
            "OpenAI chat completion"
        );

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "").is_transient());
    }

    #[test]
    fn test_from_settings_requires_key() {
        let err = OpenAIModel::from_settings(&Settings::default()).err().unwrap();
        assert_eq!(err.to_string(), MISSING_CREDENTIALS);

        let settings = Settings::default().with_api_key("sk-test");
        assert!(OpenAIModel::from_settings(&settings).is_ok());
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "gpt-4o",
            messages: &messages,
            temperature: 0.0,
            max_tokens: 500,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
        assert_eq!(value["max_tokens"], 500);
    }
}
