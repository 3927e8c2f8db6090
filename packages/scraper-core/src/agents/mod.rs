//! Extraction strategies, one per [`AgentMode`].
//!
//! [`extractor_for`] is the single place a mode is turned into behaviour.

pub mod adaptive;
pub mod backoff;
pub mod llm_dynamic;
pub mod llm_fixed;
pub mod prompts;
pub mod rule_based;

use std::path::PathBuf;
use std::sync::Arc;

use crate::ai::openai::MISSING_CREDENTIALS;
use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::error::{Result, ScrapeError};
use crate::traits::extractor::Extractor;
use crate::traits::model::{ChatMessage, ModelClient, ModelConfig};
use crate::traits::screenshot::{NoopScreenshotter, Screenshotter};
use crate::types::request::AgentMode;

pub use adaptive::AdaptiveExtractor;
pub use backoff::{call_with_backoff, RetryPolicy};
pub use llm_dynamic::DynamicExtractor;
pub use llm_fixed::FixedExtractor;
pub use rule_based::RuleBasedExtractor;

/// Collaborators and knobs shared by every strategy.
#[derive(Clone)]
pub struct ExtractorDeps {
    pub model: Option<Arc<dyn ModelClient>>,
    pub screenshotter: Arc<dyn Screenshotter>,
    pub model_config: ModelConfig,
    pub retry_policy: RetryPolicy,
    pub screenshot_dir: PathBuf,
    /// Adaptive passes per URL
    pub max_attempts: u32,
}

impl ExtractorDeps {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model: None,
            screenshotter: Arc::new(NoopScreenshotter),
            model_config: ModelConfig::from_settings(settings),
            retry_policy: RetryPolicy::from_settings(settings),
            screenshot_dir: settings.screenshot_dir.clone(),
            max_attempts: settings.llm_schema_retries.max(1),
        }
    }

    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_screenshotter(mut self, screenshotter: Arc<dyn Screenshotter>) -> Self {
        self.screenshotter = screenshotter;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Backend for model-driven strategies. Fails without a model client.
    pub fn llm_backend(&self) -> Result<LlmBackend> {
        let model = self
            .model
            .clone()
            .ok_or_else(|| ScrapeError::MissingCredentials(MISSING_CREDENTIALS.to_string()))?;
        Ok(LlmBackend {
            model,
            config: self.model_config.clone(),
            policy: self.retry_policy,
            screenshotter: self.screenshotter.clone(),
            screenshot_dir: self.screenshot_dir.clone(),
        })
    }
}

impl Default for ExtractorDeps {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Map a mode to its strategy. Model-backed modes need a model client.
pub fn extractor_for(mode: AgentMode, deps: &ExtractorDeps) -> Result<Arc<dyn Extractor>> {
    let extractor: Arc<dyn Extractor> = match mode {
        AgentMode::RuleBased => Arc::new(RuleBasedExtractor::new(
            deps.screenshotter.clone(),
            deps.screenshot_dir.clone(),
        )),
        AgentMode::LlmFixed => Arc::new(FixedExtractor::new(deps.llm_backend()?)),
        AgentMode::LlmDynamic => Arc::new(DynamicExtractor::new(deps.llm_backend()?)),
        AgentMode::LlmDynamicAdaptive => {
            Arc::new(AdaptiveExtractor::new(deps.llm_backend()?, deps.max_attempts))
        }
    };
    Ok(extractor)
}

/// Model plus the knobs every model-backed strategy needs.
#[derive(Clone)]
pub struct LlmBackend {
    pub model: Arc<dyn ModelClient>,
    pub config: ModelConfig,
    pub policy: RetryPolicy,
    pub screenshotter: Arc<dyn Screenshotter>,
    pub screenshot_dir: PathBuf,
}

impl LlmBackend {
    /// One logical model call under the retry policy.
    pub async fn call(&self, messages: &[ChatMessage], cancel: &CancelToken) -> Option<String> {
        call_with_backoff(self.model.as_ref(), messages, &self.config, &self.policy, cancel).await
    }

    /// Best-effort screenshot path.
    pub async fn screenshot(&self, url: &str) -> Option<String> {
        self.screenshotter
            .capture(url, &self.screenshot_dir)
            .await
            .map(|p| p.to_string_lossy().into_owned())
    }
}
