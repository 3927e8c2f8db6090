//! Testing utilities including mock implementations.
//!
//! These let callers exercise the pipeline, worker pool and extractors
//! without network access or a real model.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{ModelError, ModelResult, Result, ScrapeError};
use crate::pipeline::JobHooks;
use crate::traits::{
    extractor::Extractor,
    fetcher::{fetch_error, Fetcher},
    model::{ChatMessage, ModelClient, ModelConfig},
};
use crate::types::item::ScrapedItem;
use crate::types::request::ScrapeRequest;

// ============================================================================
// Model
// ============================================================================

/// A scripted model client.
///
/// Responses and errors are served in the order they were added. Once the
/// script runs out, the default response is repeated if one is set;
/// otherwise the call fails with a fatal error.
#[derive(Default)]
pub struct MockModel {
    script: Arc<RwLock<VecDeque<ModelResult<String>>>>,
    default_response: Option<String>,
    delay: Option<Duration>,
    calls: Arc<RwLock<Vec<Vec<ChatMessage>>>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.script.write().unwrap().push_back(Ok(content.into()));
        self
    }

    /// Queue an error.
    pub fn with_error(self, error: ModelError) -> Self {
        self.script.write().unwrap().push_back(Err(error));
        self
    }

    /// Response served once the script is exhausted.
    pub fn with_default_response(mut self, content: impl Into<String>) -> Self {
        self.default_response = Some(content.into());
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Messages of every call so far.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn complete(&self, messages: &[ChatMessage], _config: &ModelConfig) -> ModelResult<String> {
        self.calls.write().unwrap().push(messages.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.write().unwrap().pop_front();
        match (scripted, &self.default_response) {
            (Some(result), _) => result,
            (None, Some(content)) => Ok(content.clone()),
            (None, None) => Err(ModelError::Fatal("mock script exhausted".into())),
        }
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// A fetcher serving canned HTML.
///
/// URLs without a canned page come back as fetch errors.
#[derive(Default)]
pub struct MockFetcher {
    pages: Arc<RwLock<HashMap<String, String>>>,
    calls: Arc<RwLock<Vec<Vec<String>>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.write().unwrap().insert(url.into(), html.into());
        self
    }

    pub fn with_failure(self, url: impl Into<String>) -> Self {
        self.pages
            .write()
            .unwrap()
            .insert(url.into(), fetch_error("mock failure"));
        self
    }

    /// URL batches passed to `fetch_all`.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.read().unwrap().clone()
    }

    /// Shared handle to the call log, usable after the fetcher is moved.
    pub fn calls_handle(&self) -> Arc<RwLock<Vec<Vec<String>>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch_all(
        &self,
        urls: &[String],
        _concurrency: usize,
        cancel: &CancelToken,
    ) -> IndexMap<String, String> {
        self.calls.write().unwrap().push(urls.to_vec());

        let pages = self.pages.read().unwrap();
        let mut out = IndexMap::new();
        for url in urls {
            if out.contains_key(url) {
                continue;
            }
            let body = if cancel.is_canceled() {
                fetch_error("canceled")
            } else {
                pages
                    .get(url)
                    .cloned()
                    .unwrap_or_else(|| fetch_error("no canned page"))
            };
            out.insert(url.clone(), body);
        }
        out
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// An extractor that turns each request into an item titled with its text.
///
/// Per-URL delays, failures, panics and empty results can be scripted.
#[derive(Default)]
pub struct MockExtractor {
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    panics: HashSet<String>,
    empty: HashSet<String>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, url: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(url.into(), delay);
        self
    }

    pub fn with_failure(mut self, url: impl Into<String>) -> Self {
        self.failures.insert(url.into());
        self
    }

    pub fn with_panic(mut self, url: impl Into<String>) -> Self {
        self.panics.insert(url.into());
        self
    }

    /// Return `Ok(None)` for this URL.
    pub fn with_no_result(mut self, url: impl Into<String>) -> Self {
        self.empty.insert(url.into());
        self
    }

    /// URLs in the order extraction started.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, request: ScrapeRequest, _cancel: &CancelToken) -> Result<Option<ScrapedItem>> {
        self.calls.write().unwrap().push(request.url.clone());

        if let Some(delay) = self.delays.get(&request.url) {
            tokio::time::sleep(*delay).await;
        }
        if self.panics.contains(&request.url) {
            panic!("mock extractor panic for {}", request.url);
        }
        if self.failures.contains(&request.url) {
            return Err(ScrapeError::Model(ModelError::Fatal(format!(
                "mock failure for {}",
                request.url
            ))));
        }
        if self.empty.contains(&request.url) {
            return Ok(None);
        }

        Ok(Some(ScrapedItem::new(request.url).with_title(request.text)))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// Record of a hook call.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    Started(usize),
    Progress { done: usize, total: usize },
    ItemProcessed { url: String },
    Error { url: String, message: String },
    Failed(String),
    Completed { succeeded: usize, failed: usize, duration_sec: f64 },
}

/// Job hooks that record every call.
#[derive(Default, Clone)]
pub struct RecordingHooks {
    events: Arc<RwLock<Vec<HookEvent>>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events.read().unwrap().clone()
    }

    pub fn started(&self) -> Vec<usize> {
        self.collect(|e| match e {
            HookEvent::Started(total) => Some(*total),
            _ => None,
        })
    }

    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.collect(|e| match e {
            HookEvent::Progress { done, total } => Some((*done, *total)),
            _ => None,
        })
    }

    pub fn errors(&self) -> Vec<String> {
        self.collect(|e| match e {
            HookEvent::Error { url, .. } => Some(url.clone()),
            _ => None,
        })
    }

    pub fn failures(&self) -> Vec<String> {
        self.collect(|e| match e {
            HookEvent::Failed(reason) => Some(reason.clone()),
            _ => None,
        })
    }

    pub fn completed(&self) -> Vec<(usize, usize, f64)> {
        self.collect(|e| match e {
            HookEvent::Completed {
                succeeded,
                failed,
                duration_sec,
            } => Some((*succeeded, *failed, *duration_sec)),
            _ => None,
        })
    }

    fn collect<T>(&self, f: impl Fn(&HookEvent) -> Option<T>) -> Vec<T> {
        self.events.read().unwrap().iter().filter_map(f).collect()
    }

    fn record(&self, event: HookEvent) {
        self.events.write().unwrap().push(event);
    }
}

impl JobHooks for RecordingHooks {
    fn on_started(&self, total: usize) {
        self.record(HookEvent::Started(total));
    }

    fn on_progress(&self, done: usize, total: usize) {
        self.record(HookEvent::Progress { done, total });
    }

    fn on_item_processed(&self, item: &ScrapedItem) {
        self.record(HookEvent::ItemProcessed {
            url: item.url.clone(),
        });
    }

    fn on_error(&self, url: &str, error: &ScrapeError) {
        self.record(HookEvent::Error {
            url: url.to_string(),
            message: error.to_string(),
        });
    }

    fn on_failed(&self, reason: &str) {
        self.record(HookEvent::Failed(reason.to_string()));
    }

    fn on_completed(&self, succeeded: usize, failed: usize, duration_sec: f64) {
        self.record(HookEvent::Completed {
            succeeded,
            failed,
            duration_sec,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_model_script_then_default() {
        let model = MockModel::new()
            .with_response("first")
            .with_default_response("again");
        let config = ModelConfig::default();
        let msgs = vec![ChatMessage::user("hi")];

        assert_eq!(model.complete(&msgs, &config).await.unwrap(), "first");
        assert_eq!(model.complete(&msgs, &config).await.unwrap(), "again");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_model_exhausted_is_fatal() {
        let model = MockModel::new();
        let err = model
            .complete(&[ChatMessage::user("hi")], &ModelConfig::default())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
