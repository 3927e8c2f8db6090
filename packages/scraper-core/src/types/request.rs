//! Request-side types: agent modes, pipeline inputs, per-item requests.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError, SettingsError};

/// Contextual hints derived from a page's HTML and URL.
///
/// Keys in use: `meta`, `breadcrumbs`, `url_segments`, `context_domain`,
/// `url_last_segment`, `page_title`, `first_h1`, `page` (page-type guess).
pub type ContextHints = IndexMap<String, String>;

/// Extraction strategy, selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Heuristics over the page text, no model calls
    RuleBased,
    /// One model call with a fixed field list
    LlmFixed,
    /// One model call with an open-ended, hint-enriched prompt
    LlmDynamic,
    /// Multi-pass, score-guided model extraction
    #[default]
    LlmDynamicAdaptive,
}

impl AgentMode {
    pub const ALL: [AgentMode; 4] = [
        AgentMode::RuleBased,
        AgentMode::LlmFixed,
        AgentMode::LlmDynamic,
        AgentMode::LlmDynamicAdaptive,
    ];

    /// Whether this mode calls the text-generation backend.
    pub fn uses_model(&self) -> bool {
        !matches!(self, AgentMode::RuleBased)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::RuleBased => "rule_based",
            AgentMode::LlmFixed => "llm_fixed",
            AgentMode::LlmDynamic => "llm_dynamic",
            AgentMode::LlmDynamicAdaptive => "llm_dynamic_adaptive",
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentMode {
    type Err = SettingsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted)
            .ok_or_else(|| SettingsError::Invalid {
                name: "AGENT_MODE",
                value: s.to_string(),
            })
    }
}

/// A fetched page reduced to text, ready for extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeInput {
    pub url: String,
    pub text: String,
    /// Hints computed from the raw HTML, if the parser produced any
    pub hints: Option<ContextHints>,
}

impl ScrapeInput {
    pub fn new(url: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            text: text.into(),
            hints: None,
        }
    }

    pub fn with_hints(mut self, hints: ContextHints) -> Self {
        self.hints = Some(hints);
        self
    }
}

/// The request value a worker hands to an extractor for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeRequest {
    pub url: String,
    /// Trimmed, non-blank page text
    pub text: String,
    pub hints: Option<ContextHints>,
    pub take_screenshot: bool,
}

impl ScrapeRequest {
    /// Build a request. Blank text is rejected.
    pub fn new(url: impl Into<String>, text: impl AsRef<str>) -> Result<Self> {
        let text = text.as_ref().trim();
        if text.is_empty() {
            return Err(ScrapeError::InvalidRequest("text must not be blank".into()));
        }
        Ok(Self {
            url: url.into(),
            text: text.to_string(),
            hints: None,
            take_screenshot: false,
        })
    }

    /// Build a request from a pipeline input.
    pub fn from_input(input: &ScrapeInput, take_screenshot: bool) -> Result<Self> {
        let mut request = Self::new(input.url.clone(), &input.text)?;
        if let Some(hints) = &input.hints {
            request = request.with_hints(hints.clone());
        }
        Ok(request.with_screenshot(take_screenshot))
    }

    /// Attach hints. Keys and values are trimmed; empty entries are dropped.
    pub fn with_hints(mut self, hints: ContextHints) -> Self {
        let cleaned: ContextHints = hints
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();
        self.hints = Some(cleaned);
        self
    }

    pub fn with_screenshot(mut self, take_screenshot: bool) -> Self {
        self.take_screenshot = take_screenshot;
        self
    }

    /// Look up a hint by key.
    pub fn hint(&self, key: &str) -> Option<&str> {
        self.hints
            .as_ref()
            .and_then(|h| h.get(key))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_mode_parsing() {
        assert_eq!("rule_based".parse::<AgentMode>().unwrap(), AgentMode::RuleBased);
        assert_eq!(
            " LLM_Dynamic_Adaptive ".parse::<AgentMode>().unwrap(),
            AgentMode::LlmDynamicAdaptive
        );
        assert!("gpt".parse::<AgentMode>().is_err());
    }

    #[test]
    fn test_agent_mode_uses_model() {
        assert!(!AgentMode::RuleBased.uses_model());
        assert!(AgentMode::LlmFixed.uses_model());
        assert!(AgentMode::LlmDynamic.uses_model());
        assert!(AgentMode::LlmDynamicAdaptive.uses_model());
    }

    #[test]
    fn test_request_rejects_blank_text() {
        assert!(ScrapeRequest::new("https://example.com", "   \n").is_err());
        let req = ScrapeRequest::new("https://example.com", "  body  ").unwrap();
        assert_eq!(req.text, "body");
    }

    #[test]
    fn test_request_hints_are_cleaned() {
        let mut hints = ContextHints::new();
        hints.insert(" page ".into(), " product ".into());
        hints.insert("breadcrumbs".into(), "   ".into());

        let req = ScrapeRequest::new("https://example.com", "body")
            .unwrap()
            .with_hints(hints);

        assert_eq!(req.hint("page"), Some("product"));
        assert_eq!(req.hint("breadcrumbs"), None);
    }
}
