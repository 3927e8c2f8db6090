//! Text-generation backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::ModelResult;

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model: settings.openai_model.clone(),
            temperature: settings.llm_temperature,
            max_tokens: settings.llm_max_tokens,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Opaque "generate text" capability.
///
/// Implementations classify failures: [`crate::error::ModelError::Transient`]
/// for anything worth retrying, [`crate::error::ModelError::Fatal`] otherwise.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], config: &ModelConfig) -> ModelResult<String>;
}
