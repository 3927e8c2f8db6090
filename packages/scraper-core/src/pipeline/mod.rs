//! Pipeline orchestration: fetch, parse, extract.
//!
//! A run always hands back `(items, stats)`. Cancellation and per-item
//! failures show up in the stats and the hooks, never as a top-level error.

pub mod hooks;
pub mod pool;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::agents::{extractor_for, ExtractorDeps};
use crate::ai::OpenAIModel;
use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::error::Result;
use crate::fetchers::HttpFetcher;
use crate::parsers::HtmlParser;
use crate::traits::extractor::Extractor;
use crate::traits::fetcher::{is_fetch_error, Fetcher};
use crate::traits::parser::PageParser;
use crate::types::item::ScrapedItem;
use crate::types::request::ScrapeInput;
use crate::types::stats::ScrapeStats;

pub use hooks::{JobHooks, NoopHooks};
pub use pool::{WorkerPool, WorkerPoolConfig};

use hooks::call_hook;

pub const CANCELED_BEFORE_START: &str = "Scrape canceled before start.";
pub const CANCELED_BEFORE_POOL: &str = "Scrape canceled before worker pool start.";

/// Per-run options.
#[derive(Clone)]
pub struct PipelineOptions {
    pub cancel: Option<CancelToken>,
    pub hooks: Option<Arc<dyn JobHooks>>,
    pub take_screenshot: bool,
    pub preserve_order: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            cancel: None,
            hooks: None,
            take_screenshot: false,
            preserve_order: true,
        }
    }
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn JobHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_screenshots(mut self, take_screenshot: bool) -> Self {
        self.take_screenshot = take_screenshot;
        self
    }

    pub fn with_preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }
}

/// Fetcher, parser and extractor wired together for one settings snapshot.
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn PageParser>,
    extractor: Arc<dyn Extractor>,
    settings: Settings,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn PageParser>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            fetcher,
            parser,
            extractor,
            settings,
        }
    }

    /// Default collaborators: HTTP fetcher, HTML parser, and the extractor
    /// for `settings.agent_mode`.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let fetcher = HttpFetcher::new(settings.request_timeout)?;

        let mut deps = ExtractorDeps::from_settings(&settings);
        if settings.agent_mode.uses_model() {
            deps = deps.with_model(Arc::new(OpenAIModel::from_settings(&settings)?));
        }
        let extractor = extractor_for(settings.agent_mode, &deps)?;

        Ok(Self::new(
            settings,
            Arc::new(fetcher),
            Arc::new(HtmlParser::new()),
            extractor,
        ))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Scrape `urls` and return the items with run statistics.
    pub async fn run(&self, urls: &[String], options: PipelineOptions) -> (Vec<ScrapedItem>, ScrapeStats) {
        let start = Instant::now();
        let num_urls = urls.len();
        let cancel = options.cancel.clone().unwrap_or_default();
        let hooks = options.hooks.as_ref();

        if cancel.is_canceled() {
            info!(num_urls, "Scrape canceled before start");
            call_hook(hooks, "on_failed", |h| h.on_failed(CANCELED_BEFORE_START));
            return (Vec::new(), ScrapeStats::new(num_urls, 0, start.elapsed(), true));
        }

        debug!(num_urls, "Fetching pages");
        let pages = self
            .fetcher
            .fetch_all(urls, self.settings.fetch_concurrency, &cancel)
            .await;
        info!(fetched = pages.len(), "Fetch complete");

        let inputs: Vec<ScrapeInput> = pages
            .iter()
            .filter(|(_, html)| !is_fetch_error(html))
            .filter_map(|(url, html)| {
                let text = self.parser.extract_main_text(html);
                if text.trim().is_empty() {
                    debug!(url = %url, "Page has no text; skipping");
                    return None;
                }
                let hints = self.parser.extract_metadata_hints(html, url);
                Some(ScrapeInput::new(url.clone(), text).with_hints(hints))
            })
            .collect();
        info!(
            valid = inputs.len(),
            skipped = num_urls.saturating_sub(inputs.len()),
            "Prepared scrape inputs"
        );

        call_hook(hooks, "on_started", |h| h.on_started(inputs.len()));

        if inputs.is_empty() {
            call_hook(hooks, "on_completed", |h| h.on_completed(0, num_urls, 0.0));
            let stats = ScrapeStats::new(num_urls, 0, start.elapsed(), cancel.is_canceled());
            return (Vec::new(), stats);
        }

        if cancel.is_canceled() {
            info!(num_urls, "Scrape canceled before worker pool start");
            call_hook(hooks, "on_failed", |h| h.on_failed(CANCELED_BEFORE_POOL));
            return (Vec::new(), ScrapeStats::new(num_urls, 0, start.elapsed(), true));
        }

        let config = self.pool_config(&options, cancel.clone());
        debug!(
            count = inputs.len(),
            uses_model = self.settings.agent_mode.uses_model(),
            "Starting extraction"
        );
        let items = WorkerPool::new(self.extractor.clone(), config).run(inputs).await;

        let stats = ScrapeStats::new(num_urls, items.len(), start.elapsed(), cancel.is_canceled());
        info!(
            total = stats.num_urls,
            success = stats.num_success,
            failed = stats.num_failed,
            duration_sec = stats.duration_sec,
            canceled = stats.was_canceled,
            "Scrape finished"
        );
        call_hook(hooks, "on_completed", |h| {
            h.on_completed(stats.num_success, stats.num_failed, stats.duration_sec)
        });

        (items, stats)
    }

    /// Run with default options and keep only the items.
    pub async fn scrape(&self, urls: &[String]) -> Vec<ScrapedItem> {
        self.run(urls, PipelineOptions::default()).await.0
    }

    fn pool_config(&self, options: &PipelineOptions, cancel: CancelToken) -> WorkerPoolConfig {
        let mut config = WorkerPoolConfig::new(self.settings.extraction_concurrency())
            .with_screenshots(options.take_screenshot || self.settings.screenshot_enabled)
            .with_preserve_order(options.preserve_order)
            .with_cancel(cancel);

        if let Some(hooks) = &options.hooks {
            let h = hooks.clone();
            config = config.on_progress(move |done, total| h.on_progress(done, total));
            let h = hooks.clone();
            config = config.on_item_processed(move |item| h.on_item_processed(item));
            let h = hooks.clone();
            config = config.on_error(move |url, error| h.on_error(url, error));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockExtractor, MockFetcher, RecordingHooks};

    fn pipeline(fetcher: MockFetcher) -> Pipeline {
        Pipeline::new(
            Settings::default(),
            Arc::new(fetcher),
            Arc::new(HtmlParser::new()),
            Arc::new(MockExtractor::new()),
        )
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|u| u.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fetch_failures_are_filtered() {
        let fetcher = MockFetcher::new()
            .with_page("https://a.test", "<html><body><p>Alpha</p></body></html>")
            .with_failure("https://b.test");

        let (items, stats) = pipeline(fetcher)
            .run(&urls(&["https://a.test", "https://b.test"]), PipelineOptions::new())
            .await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://a.test");
        assert_eq!(stats.num_urls, 2);
        assert_eq!(stats.num_success, 1);
        assert_eq!(stats.num_failed, 1);
        assert!(!stats.was_canceled);
    }

    #[tokio::test]
    async fn test_pre_canceled_run_skips_fetching() {
        let fetcher = MockFetcher::new().with_page("https://a.test", "<p>Alpha</p>");
        let calls = fetcher.calls_handle();
        let hooks = Arc::new(RecordingHooks::new());
        let cancel = CancelToken::new();
        cancel.cancel();

        let options = PipelineOptions::new()
            .with_cancel(cancel)
            .with_hooks(hooks.clone());
        let (items, stats) = pipeline(fetcher).run(&urls(&["https://a.test"]), options).await;

        assert!(items.is_empty());
        assert!(stats.was_canceled);
        assert!(calls.read().unwrap().is_empty());
        assert_eq!(hooks.failures(), vec![CANCELED_BEFORE_START.to_string()]);
    }

    #[tokio::test]
    async fn test_nothing_to_extract_completes_with_zero() {
        let fetcher = MockFetcher::new().with_failure("https://a.test");
        let hooks = Arc::new(RecordingHooks::new());

        let (items, stats) = pipeline(fetcher)
            .run(
                &urls(&["https://a.test"]),
                PipelineOptions::new().with_hooks(hooks.clone()),
            )
            .await;

        assert!(items.is_empty());
        assert_eq!(stats.num_failed, 1);
        assert_eq!(hooks.started(), vec![0]);
        assert_eq!(hooks.completed(), vec![(0, 1, 0.0)]);
    }
}
