//! Runtime settings loaded from environment variables.
//!
//! The library never reads `.env` itself; binaries call `dotenvy::dotenv()`
//! before [`Settings::from_env`].

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SettingsError;
use crate::security::ApiKey;
use crate::types::request::AgentMode;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const VALID_OPENAI_MODELS: &[&str] = &["gpt-3.5-turbo", "gpt-4", "gpt-4o"];
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const MAX_CONCURRENCY_HARD_LIMIT: usize = 100;
pub const LLM_MAX_TOKENS_LIMIT: u32 = 8192;

type Result<T> = std::result::Result<T, SettingsError>;

/// Read-only configuration snapshot for one scrape run.
#[derive(Clone)]
pub struct Settings {
    pub openai_model: String,
    pub openai_api_key: Option<ApiKey>,
    pub openai_base_url: String,
    pub agent_mode: AgentMode,
    /// Per network operation (fetch, model call)
    pub request_timeout: Duration,
    pub fetch_concurrency: usize,
    pub llm_concurrency: usize,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    /// Model-call attempts inside the backoff wrapper
    pub retry_attempts: u32,
    pub retry_backoff_min: Duration,
    pub retry_backoff_max: Duration,
    /// Passes of the adaptive loop
    pub llm_schema_retries: u32,
    pub screenshot_enabled: bool,
    pub screenshot_dir: PathBuf,
    pub log_level: String,
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            agent_mode: AgentMode::default(),
            request_timeout: Duration::from_secs(10),
            fetch_concurrency: 10,
            llm_concurrency: 2,
            llm_max_tokens: 500,
            llm_temperature: 0.0,
            retry_attempts: 2,
            retry_backoff_min: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(10),
            llm_schema_retries: 2,
            screenshot_enabled: false,
            screenshot_dir: PathBuf::from("screenshots"),
            log_level: "info".to_string(),
            verbose: false,
        }
    }
}

impl Settings {
    /// Load from process environment variables, then validate.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary key lookup, then validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(model) = get("OPENAI_MODEL") {
            settings.openai_model = model.trim().to_string();
        }
        settings.openai_api_key = get("OPENAI_API_KEY")
            .map(ApiKey::from)
            .filter(|key| !key.looks_masked());
        if let Some(base_url) = get("OPENAI_BASE_URL") {
            settings.openai_base_url = base_url.trim().trim_end_matches('/').to_string();
        }
        if let Some(mode) = get("AGENT_MODE") {
            settings.agent_mode = mode.parse()?;
        }
        if let Some(secs) = get("REQUEST_TIMEOUT") {
            settings.request_timeout = Duration::from_secs(parse_var("REQUEST_TIMEOUT", &secs)?);
        }
        if let Some(v) = get("FETCH_CONCURRENCY") {
            settings.fetch_concurrency = parse_var("FETCH_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("LLM_CONCURRENCY") {
            settings.llm_concurrency = parse_var("LLM_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("LLM_MAX_TOKENS") {
            settings.llm_max_tokens = parse_var("LLM_MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("LLM_TEMPERATURE") {
            settings.llm_temperature = parse_var("LLM_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("RETRY_ATTEMPTS") {
            settings.retry_attempts = parse_var("RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF_MIN") {
            settings.retry_backoff_min = parse_seconds("RETRY_BACKOFF_MIN", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF_MAX") {
            settings.retry_backoff_max = parse_seconds("RETRY_BACKOFF_MAX", &v)?;
        }
        if let Some(v) = get("LLM_SCHEMA_RETRIES") {
            settings.llm_schema_retries = parse_var("LLM_SCHEMA_RETRIES", &v)?;
        }
        if let Some(v) = get("SCREENSHOT_ENABLED") {
            settings.screenshot_enabled = parse_bool("SCREENSHOT_ENABLED", &v)?;
        }
        if let Some(dir) = get("SCREENSHOT_DIR") {
            settings.screenshot_dir = PathBuf::from(dir.trim());
        }
        if let Some(level) = get("LOG_LEVEL") {
            settings.log_level = level.trim().to_ascii_lowercase();
        }
        if let Some(v) = get("VERBOSE") {
            settings.verbose = parse_bool("VERBOSE", &v)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Check every bounded value.
    pub fn validate(&self) -> Result<()> {
        if !VALID_OPENAI_MODELS.contains(&self.openai_model.as_str()) {
            return Err(SettingsError::Invalid {
                name: "OPENAI_MODEL",
                value: self.openai_model.clone(),
            });
        }
        check_range("FETCH_CONCURRENCY", self.fetch_concurrency, 1, MAX_CONCURRENCY_HARD_LIMIT, "1..=100")?;
        check_range("LLM_CONCURRENCY", self.llm_concurrency, 1, MAX_CONCURRENCY_HARD_LIMIT, "1..=100")?;
        check_range("LLM_MAX_TOKENS", self.llm_max_tokens, 1, LLM_MAX_TOKENS_LIMIT, "1..=8192")?;
        check_range("LLM_TEMPERATURE", self.llm_temperature, 0.0, 2.0, "0.0..=2.0")?;
        check_range("RETRY_ATTEMPTS", self.retry_attempts, 1, 10, "1..=10")?;
        check_range("LLM_SCHEMA_RETRIES", self.llm_schema_retries, 0, 10, "0..=10")?;
        if self.request_timeout.is_zero() {
            return Err(SettingsError::OutOfRange {
                name: "REQUEST_TIMEOUT",
                value: "0".into(),
                expected: "> 0",
            });
        }
        if self.retry_backoff_min > self.retry_backoff_max {
            return Err(SettingsError::OutOfRange {
                name: "RETRY_BACKOFF_MIN",
                value: format!("{:?}", self.retry_backoff_min),
                expected: "<= RETRY_BACKOFF_MAX",
            });
        }
        Ok(())
    }

    /// Whether debug-level logging was requested.
    pub fn is_verbose(&self) -> bool {
        self.verbose || self.log_level == "debug" || self.log_level == "trace"
    }

    /// Extraction concurrency for the configured mode.
    pub fn extraction_concurrency(&self) -> usize {
        if self.agent_mode.uses_model() {
            self.llm_concurrency
        } else {
            self.fetch_concurrency
        }
    }

    pub fn with_agent_mode(mut self, mode: AgentMode) -> Self {
        self.agent_mode = mode;
        self
    }

    pub fn with_fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = n;
        self
    }

    pub fn with_llm_concurrency(mut self, n: usize) -> Self {
        self.llm_concurrency = n;
        self
    }

    pub fn with_schema_retries(mut self, n: u32) -> Self {
        self.llm_schema_retries = n;
        self
    }

    pub fn with_retry_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.retry_backoff_min = min;
        self.retry_backoff_max = max;
        self
    }

    pub fn with_screenshots(mut self, enabled: bool) -> Self {
        self.screenshot_enabled = enabled;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(ApiKey::new(key));
        self
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("openai_model", &self.openai_model)
            .field("openai_api_key", &self.openai_api_key)
            .field("agent_mode", &self.agent_mode)
            .field("request_timeout", &self.request_timeout)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("llm_concurrency", &self.llm_concurrency)
            .field("llm_max_tokens", &self.llm_max_tokens)
            .field("llm_temperature", &self.llm_temperature)
            .field("retry_attempts", &self.retry_attempts)
            .field("llm_schema_retries", &self.llm_schema_retries)
            .field("screenshot_enabled", &self.screenshot_enabled)
            .finish_non_exhaustive()
    }
}

fn parse_var<T: FromStr>(name: &'static str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| SettingsError::Invalid {
        name,
        value: raw.to_string(),
    })
}

fn parse_seconds(name: &'static str, raw: &str) -> Result<Duration> {
    let secs: f64 = parse_var(name, raw)?;
    Duration::try_from_secs_f64(secs).map_err(|_| SettingsError::OutOfRange {
        name,
        value: raw.to_string(),
        expected: ">= 0",
    })
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::Invalid {
            name,
            value: raw.to_string(),
        }),
    }
}

fn check_range<T>(name: &'static str, value: T, min: T, max: T, expected: &'static str) -> Result<()>
where
    T: PartialOrd + fmt::Display,
{
    if value < min || value > max {
        return Err(SettingsError::OutOfRange {
            name,
            value: value.to_string(),
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.openai_model, "gpt-3.5-turbo");
        assert_eq!(settings.agent_mode, AgentMode::LlmDynamicAdaptive);
        assert_eq!(settings.llm_max_tokens, 500);
        assert!(settings.openai_api_key.is_none());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let settings = Settings::from_lookup(lookup(&[
            ("AGENT_MODE", "rule_based"),
            ("FETCH_CONCURRENCY", "7"),
            ("RETRY_BACKOFF_MIN", "0.5"),
            ("OPENAI_API_KEY", "sk-test"),
            ("SCREENSHOT_ENABLED", "true"),
        ]))
        .unwrap();

        assert_eq!(settings.agent_mode, AgentMode::RuleBased);
        assert_eq!(settings.fetch_concurrency, 7);
        assert_eq!(settings.retry_backoff_min, Duration::from_millis(500));
        assert_eq!(
            settings.openai_api_key.as_ref().map(|k| k.expose().to_string()),
            Some("sk-test".to_string())
        );
        assert!(settings.screenshot_enabled);
        assert_eq!(settings.extraction_concurrency(), 7);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let err = Settings::from_lookup(lookup(&[("FETCH_CONCURRENCY", "500")])).unwrap_err();
        assert!(matches!(err, SettingsError::OutOfRange { name: "FETCH_CONCURRENCY", .. }));

        let err = Settings::from_lookup(lookup(&[("LLM_TEMPERATURE", "3.5")])).unwrap_err();
        assert!(matches!(err, SettingsError::OutOfRange { name: "LLM_TEMPERATURE", .. }));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Settings::from_lookup(lookup(&[("OPENAI_MODEL", "davinci")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("RETRY_ATTEMPTS", "many")])).is_err());
        assert!(Settings::from_lookup(lookup(&[
            ("RETRY_BACKOFF_MIN", "5"),
            ("RETRY_BACKOFF_MAX", "1"),
        ]))
        .is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let settings = Settings::default().with_api_key("sk-secret");
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("[REDACTED]"));
    }
}
