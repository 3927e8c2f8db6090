//! Multi-pass, score-guided model extraction.
//!
//! Each pass asks the model for fields, repairs and normalizes its answer,
//! scores it, and decides whether another pass could still help. The loop
//! keeps two bests: the highest-scoring raw candidate and the
//! highest-scoring candidate that also validated. When the loop ends the
//! best valid item wins, then a fresh validation of the best fields, then
//! of the union of everything ever observed.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::prompts::{build_prompt, build_retry_or_fallback_prompt, PromptStyle, ADAPTIVE_SYSTEM_PROMPT};
use super::LlmBackend;
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::fields::{
    detect_unavailable_fields, is_empty_value, normalize_fields, normalize_keys, observed_fields,
    required_or_important, score_nonempty_fields,
};
use crate::json_repair::{self, JsonObject};
use crate::traits::extractor::Extractor;
use crate::traits::model::ChatMessage;
use crate::types::item::ScrapedItem;
use crate::types::request::ScrapeRequest;

// ============================================================================
// Per-URL State
// ============================================================================

/// Mutable state of one adaptive run. Never shared between URLs.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Conversation sent on the next pass
    pub messages: Vec<ChatMessage>,
    pub best_score: f64,
    pub best_valid_score: f64,
    /// Highest-scoring normalized candidate, valid or not
    pub best_fields: Option<JsonObject>,
    pub best_valid_item: Option<ScrapedItem>,
    /// Union of every non-empty field seen; later passes overwrite
    pub all_fields: JsonObject,
    /// Every key ever answered with a placeholder; never asked for again
    pub unavailable_fields: BTreeSet<String>,
    pub has_done_discovery: bool,
    /// Set while the single bonus pass is in flight
    pub in_discovery_pass: bool,
    /// Model passes that produced an answer or were attempted
    pub attempts: u32,
}

impl RetryContext {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            best_score: 0.0,
            best_valid_score: 0.0,
            best_fields: None,
            best_valid_item: None,
            all_fields: JsonObject::new(),
            unavailable_fields: BTreeSet::new(),
            has_done_discovery: false,
            in_discovery_pass: false,
            attempts: 0,
        }
    }

    fn best_keys(&self) -> BTreeSet<String> {
        self.best_fields
            .as_ref()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// What one model answer amounted to.
#[derive(Debug, Clone, Default)]
pub struct AttemptOutcome {
    /// Candidate that passed schema validation
    pub item: Option<ScrapedItem>,
    pub page_type: Option<String>,
    /// Keys with real values
    pub observed: BTreeSet<String>,
    pub normalized: JsonObject,
    /// Keys answered with a placeholder
    pub unavailable: BTreeSet<String>,
}

/// Repair, normalize and validate one model answer.
pub fn evaluate_response(content: &str, url: &str) -> AttemptOutcome {
    let Some(raw) = json_repair::parse(content) else {
        debug!(url = %url, "Model answer was not recoverable JSON");
        return AttemptOutcome::default();
    };

    let mut raw = normalize_keys(raw);
    raw.insert("url".into(), Value::String(url.to_string()));

    let unavailable = detect_unavailable_fields(&raw);
    let observed = observed_fields(&raw, &unavailable);
    let normalized = normalize_fields(&raw);
    let page_type = raw
        .get("page_type")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let item = match ScrapedItem::from_fields(&normalized) {
        Ok(item) => Some(item),
        Err(e) => {
            debug!(url = %url, error = %e, "Candidate failed validation");
            None
        }
    };

    AttemptOutcome {
        item,
        page_type,
        observed,
        normalized,
        unavailable,
    }
}

/// Whether a valid pass added nothing over the previous best.
///
/// `previous_best` is the best key set as it stood before this pass. Without
/// one there is nothing to compare against, so the loop goes on.
pub fn should_exit_early(
    item_valid: bool,
    current: &JsonObject,
    previous_best: Option<&BTreeSet<String>>,
    required: &BTreeSet<String>,
    unavailable: &BTreeSet<String>,
) -> bool {
    let Some(previous) = previous_best.filter(|_| item_valid) else {
        return false;
    };

    let new_fields: BTreeSet<&String> = current.keys().filter(|k| !previous.contains(*k)).collect();
    let newly_filled = required
        .iter()
        .filter(|f| !previous.contains(*f) && !unavailable.contains(*f))
        .filter(|f| new_fields.contains(f))
        .count();

    new_fields.is_empty() && newly_filled == 0
}

enum Step {
    Continue,
    Done,
}

// ============================================================================
// Engine
// ============================================================================

/// [`Extractor`] for [`crate::types::request::AgentMode::LlmDynamicAdaptive`].
pub struct AdaptiveExtractor {
    backend: LlmBackend,
    max_attempts: u32,
}

impl AdaptiveExtractor {
    pub fn new(backend: LlmBackend, max_attempts: u32) -> Self {
        Self {
            backend,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run the loop and return the chosen item together with the final state.
    pub async fn run(&self, request: &ScrapeRequest, cancel: &CancelToken) -> (Option<ScrapedItem>, RetryContext) {
        let prompt = build_prompt(
            &request.text,
            &request.url,
            PromptStyle::Enhanced,
            request.hints.as_ref(),
        );
        let system = ChatMessage::system(ADAPTIVE_SYSTEM_PROMPT);
        let mut ctx = RetryContext::new(vec![system.clone(), ChatMessage::user(prompt)]);

        for attempt in 1..=self.max_attempts {
            if cancel.is_canceled() {
                info!(url = %request.url, attempt, "Adaptive extraction canceled");
                break;
            }
            debug!(url = %request.url, attempt, max = self.max_attempts, "Adaptive attempt");

            if let Step::Done = self.process_attempt(attempt, &mut ctx, &system, request, cancel).await {
                break;
            }
        }

        let item = self.finish(&ctx, request).await;
        (item, ctx)
    }

    async fn process_attempt(
        &self,
        attempt: u32,
        ctx: &mut RetryContext,
        system: &ChatMessage,
        request: &ScrapeRequest,
        cancel: &CancelToken,
    ) -> Step {
        ctx.attempts += 1;
        let Some(content) = self.backend.call(&ctx.messages, cancel).await else {
            warn!(url = %request.url, attempt, "Model call gave no content; stopping");
            return Step::Done;
        };
        ctx.messages.push(ChatMessage::assistant(content.clone()));

        let outcome = evaluate_response(&content, &request.url);
        for (key, value) in &outcome.normalized {
            if !is_empty_value(value) {
                ctx.all_fields.insert(key.clone(), value.clone());
            }
        }
        ctx.unavailable_fields.extend(outcome.unavailable.iter().cloned());

        let previous_best = ctx.best_fields.as_ref().map(|_| ctx.best_keys());
        let score = score_nonempty_fields(&outcome.normalized);
        debug!(
            url = %request.url,
            attempt,
            score,
            observed = outcome.observed.len(),
            unavailable = outcome.unavailable.len(),
            "Scored attempt"
        );

        if score > ctx.best_score {
            ctx.best_score = score;
            ctx.best_fields = Some(outcome.normalized.clone());
        }
        if let Some(item) = &outcome.item {
            if score > ctx.best_valid_score {
                ctx.best_valid_score = score;
                ctx.best_valid_item = Some(item.clone());
            }
        }

        if ctx.in_discovery_pass {
            debug!(url = %request.url, attempt, "Discovery pass finished");
            return Step::Done;
        }

        let page_type = outcome
            .page_type
            .clone()
            .or_else(|| request.hint("page_type").map(str::to_string))
            .or_else(|| request.hint("page").map(str::to_string))
            .unwrap_or_default();
        let required = required_or_important(&page_type);
        let best_keys = ctx.best_keys();
        let missing: BTreeSet<String> = required
            .iter()
            .filter(|f| !best_keys.contains(*f) && !ctx.unavailable_fields.contains(*f))
            .cloned()
            .collect();

        if outcome.item.is_some() && missing.is_empty() && !ctx.has_done_discovery {
            debug!(url = %request.url, attempt, "All required fields found; one discovery pass");
            ctx.has_done_discovery = true;
            ctx.in_discovery_pass = true;
        } else if should_exit_early(
            outcome.item.is_some(),
            &outcome.normalized,
            previous_best.as_ref(),
            &required,
            &ctx.unavailable_fields,
        ) {
            debug!(url = %request.url, attempt, "No new fields; exiting early");
            return Step::Done;
        }

        let retry_prompt = build_retry_or_fallback_prompt(ctx.best_fields.as_ref(), &missing);
        let last_assistant = ChatMessage::assistant(content);
        ctx.messages = vec![system.clone(), last_assistant, ChatMessage::user(retry_prompt)];
        Step::Continue
    }

    /// Pick the final item; attach a screenshot once if asked.
    async fn finish(&self, ctx: &RetryContext, request: &ScrapeRequest) -> Option<ScrapedItem> {
        let has_candidate = ctx.best_valid_item.is_some() || ctx.best_fields.is_some();
        let screenshot = if request.take_screenshot && has_candidate {
            self.backend.screenshot(&request.url).await
        } else {
            None
        };

        if let Some(item) = &ctx.best_valid_item {
            let mut item = item.clone();
            if let Some(path) = &screenshot {
                item.screenshot_path = Some(path.clone());
            }
            info!(url = %request.url, attempts = ctx.attempts, score = ctx.best_valid_score, "Adaptive extraction succeeded");
            return Some(item);
        }

        let candidates = ctx.best_fields.iter().chain(std::iter::once(&ctx.all_fields));
        for candidate in candidates.filter(|c| !c.is_empty()) {
            let mut enriched = candidate.clone();
            enriched.insert("url".into(), Value::String(request.url.clone()));
            if let Some(path) = &screenshot {
                enriched.insert("screenshot_path".into(), Value::String(path.clone()));
            }
            match ScrapedItem::from_fields(&enriched) {
                Ok(item) => {
                    info!(url = %request.url, attempts = ctx.attempts, "Adaptive extraction recovered a fallback candidate");
                    return Some(item);
                }
                Err(e) => debug!(url = %request.url, error = %e, "Fallback candidate failed validation"),
            }
        }

        warn!(url = %request.url, attempts = ctx.attempts, "Adaptive extraction failed after retries");
        None
    }
}

#[async_trait]
impl Extractor for AdaptiveExtractor {
    async fn extract(&self, request: ScrapeRequest, cancel: &CancelToken) -> Result<Option<ScrapedItem>> {
        let (item, _) = self.run(&request, cancel).await;
        Ok(item)
    }

    fn name(&self) -> &'static str {
        "llm_dynamic_adaptive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    fn keys(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_evaluate_response_normalizes() {
        let outcome = evaluate_response(
            r#"{"headline": "Hello", "writer": "N/A", "page_type": "blog", "price": "$5"}"#,
            "https://blog.example.com/p",
        );

        assert!(outcome.item.is_some());
        assert_eq!(outcome.page_type.as_deref(), Some("blog"));
        assert_eq!(outcome.unavailable, keys(&["author"]));
        assert!(outcome.observed.contains("title"));
        assert!(!outcome.observed.contains("author"));
        assert_eq!(outcome.normalized["price"], json!(5.0));
        assert_eq!(outcome.normalized["author"], Value::Null);
    }

    #[test]
    fn test_evaluate_response_accepts_non_string_text_values() {
        let outcome = evaluate_response(
            r#"{"title": "Widget", "author": ["Ann", "Bob"], "date_published": 2024}"#,
            "https://shop.example.com/w",
        );

        assert_eq!(outcome.normalized["author"], "Ann, Bob");
        assert_eq!(outcome.normalized["date_published"], "2024");
        let item = outcome.item.unwrap();
        assert_eq!(item.author.as_deref(), Some("Ann, Bob"));
        assert_eq!(item.date_published.as_deref(), Some("2024"));
    }

    #[test]
    fn test_evaluate_response_unparseable() {
        let outcome = evaluate_response("sorry, no JSON today", "https://x.com");
        assert!(outcome.item.is_none());
        assert!(outcome.normalized.is_empty());
    }

    #[test]
    fn test_should_exit_early() {
        let current = obj(json!({"url": "u", "title": "T"}));
        let required = keys(&["title", "price"]);
        let none = BTreeSet::new();

        // No previous best: keep going.
        assert!(!should_exit_early(true, &current, None, &required, &none));
        // Invalid item: keep going.
        assert!(!should_exit_early(false, &current, Some(&keys(&["url", "title"])), &required, &none));
        // Nothing new: stop.
        assert!(should_exit_early(true, &current, Some(&keys(&["url", "title"])), &required, &none));
        // A new key: keep going.
        assert!(!should_exit_early(true, &current, Some(&keys(&["url"])), &required, &none));
    }
}
