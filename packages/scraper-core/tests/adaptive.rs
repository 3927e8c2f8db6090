//! Integration tests for the adaptive retry engine.
//!
//! A scripted model stands in for the LLM so each test controls exactly what
//! every pass returns.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper_core::testing::MockModel;
use scraper_core::{
    AdaptiveExtractor, CancelToken, ExtractorDeps, ModelError, RetryPolicy, ScrapeRequest,
    Screenshotter,
};

const URL: &str = "https://shop.example.com/products/widget";

/// Screenshotter that counts captures.
#[derive(Default)]
struct CountingScreenshotter {
    captures: AtomicUsize,
}

#[async_trait]
impl Screenshotter for CountingScreenshotter {
    async fn capture(&self, url: &str, output_dir: &Path) -> Option<PathBuf> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Some(output_dir.join(format!("{}.png", url.len())))
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        attempts: 1,
        backoff_min: Duration::ZERO,
        backoff_max: Duration::ZERO,
        timeout: Duration::from_secs(5),
    }
}

/// Helper to build an adaptive engine over a scripted model.
fn engine(model: Arc<MockModel>, max_attempts: u32) -> AdaptiveExtractor {
    engine_with_screenshots(model, max_attempts, Arc::new(CountingScreenshotter::default()))
}

fn engine_with_screenshots(
    model: Arc<MockModel>,
    max_attempts: u32,
    screenshotter: Arc<CountingScreenshotter>,
) -> AdaptiveExtractor {
    let backend = ExtractorDeps::default()
        .with_model(model)
        .with_screenshotter(screenshotter)
        .with_retry_policy(fast_policy())
        .llm_backend()
        .unwrap();
    AdaptiveExtractor::new(backend, max_attempts)
}

fn request() -> ScrapeRequest {
    ScrapeRequest::new(URL, "Widget\nA sturdy widget for everyday use.\n$10.00").unwrap()
}

#[tokio::test]
async fn test_stable_answers_exit_within_two_attempts() {
    let model = Arc::new(
        MockModel::new()
            .with_default_response(r#"{"title": "Widget", "price": "$10", "page_type": "product"}"#),
    );

    let (item, ctx) = engine(model.clone(), 5).run(&request(), &CancelToken::none()).await;

    let item = item.expect("a valid item");
    assert_eq!(item.title.as_deref(), Some("Widget"));
    assert_eq!(item.price, Some(10.0));
    assert!(model.call_count() <= 2);
    assert_eq!(ctx.attempts as usize, model.call_count());
}

#[tokio::test]
async fn test_complete_answer_gets_one_discovery_pass() {
    let model = Arc::new(
        MockModel::new()
            .with_response(
                r#"{"title": "Widget", "price": 10, "description": "A sturdy widget", "page_type": "product"}"#,
            )
            .with_default_response(
                r#"{"title": "Widget", "price": 10, "description": "A sturdy widget", "color": "red", "page_type": "product"}"#,
            ),
    );

    let (item, ctx) = engine(model.clone(), 5).run(&request(), &CancelToken::none()).await;

    assert_eq!(model.call_count(), 2);
    assert!(ctx.has_done_discovery);
    let item = item.unwrap();
    assert_eq!(item.extras.get("color"), Some(&serde_json::json!("red")));
}

#[tokio::test]
async fn test_invalid_high_score_does_not_replace_valid_item() {
    let model = Arc::new(
        MockModel::new()
            .with_response(r#"{"title": "Alpha", "page_type": "product"}"#)
            .with_default_response(
                r#"{"title": "Alpha", "price": -5, "description": "Long description", "page_type": "product"}"#,
            ),
    );

    let (item, ctx) = engine(model.clone(), 3).run(&request(), &CancelToken::none()).await;

    assert_eq!(model.call_count(), 3);
    assert!(ctx.best_score > ctx.best_valid_score);
    let item = item.unwrap();
    assert_eq!(item.title.as_deref(), Some("Alpha"));
    assert_eq!(item.price, None);
}

#[tokio::test]
async fn test_unparseable_answers_use_every_attempt_then_give_up() {
    let model = Arc::new(MockModel::new().with_default_response("I am not able to help with that."));

    let (item, ctx) = engine(model.clone(), 3).run(&request(), &CancelToken::none()).await;

    assert!(item.is_none());
    assert_eq!(model.call_count(), 3);
    assert!(ctx.best_fields.is_none());
}

#[tokio::test]
async fn test_fatal_model_error_stops_the_loop() {
    let model = Arc::new(
        MockModel::new()
            .with_error(ModelError::Fatal("401 unauthorized".into()))
            .with_default_response(r#"{"title": "Never"}"#),
    );

    let (item, _) = engine(model.clone(), 4).run(&request(), &CancelToken::none()).await;

    assert!(item.is_none());
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn test_canceled_token_makes_no_calls() {
    let model = Arc::new(MockModel::new().with_default_response(r#"{"title": "Widget"}"#));
    let cancel = CancelToken::new();
    cancel.cancel();

    let (item, ctx) = engine(model.clone(), 4).run(&request(), &cancel).await;

    assert!(item.is_none());
    assert_eq!(ctx.attempts, 0);
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn test_screenshot_is_taken_once() {
    let model = Arc::new(
        MockModel::new()
            .with_default_response(r#"{"title": "Widget", "price": "$10", "page_type": "product"}"#),
    );
    let shots = Arc::new(CountingScreenshotter::default());

    let (item, _) = engine_with_screenshots(model, 5, shots.clone())
        .run(&request().with_screenshot(true), &CancelToken::none())
        .await;

    assert!(item.unwrap().screenshot_path.is_some());
    assert_eq!(shots.captures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_prompt_lists_missing_fields() {
    let model = Arc::new(
        MockModel::new()
            .with_default_response(r#"{"title": "Widget", "page_type": "product"}"#),
    );

    engine(model.clone(), 2).run(&request(), &CancelToken::none()).await;

    let calls = model.calls();
    assert_eq!(calls.len(), 2);
    let retry = &calls[1];
    assert_eq!(retry.len(), 3);
    let prompt = &retry[2].content;
    assert!(prompt.contains("price"));
    assert!(prompt.contains("description"));
}

#[tokio::test]
async fn test_placeholder_fields_are_not_requested_again() {
    let model = Arc::new(
        MockModel::new()
            .with_response(r#"{"title": "Widget", "price": "n/a", "page_type": "product"}"#)
            .with_default_response(
                r#"{"title": "Widget", "description": "Long D", "color": "red", "page_type": "product"}"#,
            ),
    );

    let (item, ctx) = engine(model.clone(), 3).run(&request(), &CancelToken::none()).await;

    assert!(item.is_some());
    assert!(ctx.unavailable_fields.contains("price"));

    // The second answer dropped `price`; the third prompt must not ask for it.
    let calls = model.calls();
    assert_eq!(calls.len(), 3);
    let prompt = &calls[2][2].content;
    assert!(!prompt.contains("price"));
}
