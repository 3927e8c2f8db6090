//! End-to-end tests: fetch, parse, extract, and job tracking.

use std::sync::Arc;
use std::time::Duration;

use scraper_core::agents::RuleBasedExtractor;
use scraper_core::parsers::HtmlParser;
use scraper_core::testing::{HookEvent, MockExtractor, MockFetcher, RecordingHooks};
use scraper_core::traits::screenshot::NoopScreenshotter;
use scraper_core::{
    AgentMode, CancelToken, JobRequest, JobRunner, JobStatus, JobStore, Pipeline, PipelineOptions,
    Settings,
};

const KETTLE_HTML: &str = r#"<html><head>
<meta name="description" content="A stainless steel kettle"></head>
<body><script>var tracking = 1;</script>
<h1>Blue Kettle</h1>
<p>A stainless steel kettle that boils water quickly and quietly.</p>
<p>29,99 €</p>
</body></html>"#;

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|u| u.to_string()).collect()
}

#[tokio::test]
async fn test_rule_based_pipeline_end_to_end() {
    let settings = Settings::default().with_agent_mode(AgentMode::RuleBased);
    let fetcher = MockFetcher::new()
        .with_page("https://shop.test/products/kettle", KETTLE_HTML)
        .with_failure("https://shop.test/missing");
    let extractor = RuleBasedExtractor::new(Arc::new(NoopScreenshotter), "screenshots");
    let pipeline = Pipeline::new(
        settings,
        Arc::new(fetcher),
        Arc::new(HtmlParser::new()),
        Arc::new(extractor),
    );
    let hooks = Arc::new(RecordingHooks::new());

    let (items, stats) = pipeline
        .run(
            &urls(&["https://shop.test/products/kettle", "https://shop.test/missing"]),
            PipelineOptions::new().with_hooks(hooks.clone()),
        )
        .await;

    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.title.as_deref(), Some("Blue Kettle"));
    assert_eq!(item.price, Some(29.99));
    assert_eq!(stats.num_urls, 2);
    assert_eq!(stats.num_success, 1);
    assert_eq!(stats.num_failed, 1);

    assert_eq!(hooks.started(), vec![1]);
    assert_eq!(hooks.progress().first(), Some(&(0, 1)));
    assert_eq!(hooks.progress().last(), Some(&(1, 1)));
    let completed = hooks.completed();
    assert_eq!(completed.len(), 1);
    assert_eq!((completed[0].0, completed[0].1), (1, 1));
    assert!(hooks
        .events()
        .contains(&HookEvent::ItemProcessed { url: "https://shop.test/products/kettle".into() }));
}

#[tokio::test]
async fn test_batch_output_follows_input_order() {
    let list = ["https://a.test", "https://b.test", "https://c.test"];
    let mut fetcher = MockFetcher::new();
    for url in list {
        fetcher = fetcher.with_page(url, format!("<p>Page {}</p>", url));
    }
    let extractor = MockExtractor::new()
        .with_delay("https://a.test", Duration::from_millis(40))
        .with_delay("https://b.test", Duration::from_millis(20));
    let pipeline = Pipeline::new(
        Settings::default().with_agent_mode(AgentMode::RuleBased),
        Arc::new(fetcher),
        Arc::new(HtmlParser::new()),
        Arc::new(extractor),
    );

    let items = pipeline.scrape(&urls(&list)).await;

    let got: Vec<&str> = items.iter().map(|i| i.url.as_str()).collect();
    assert_eq!(got, list.to_vec());
}

#[tokio::test]
async fn test_extraction_errors_reach_hooks() {
    let fetcher = MockFetcher::new()
        .with_page("https://ok.test", "<p>Fine</p>")
        .with_page("https://bad.test", "<p>Broken</p>");
    let pipeline = Pipeline::new(
        Settings::default(),
        Arc::new(fetcher),
        Arc::new(HtmlParser::new()),
        Arc::new(MockExtractor::new().with_failure("https://bad.test")),
    );
    let hooks = Arc::new(RecordingHooks::new());

    let (items, stats) = pipeline
        .run(
            &urls(&["https://ok.test", "https://bad.test"]),
            PipelineOptions::new().with_hooks(hooks.clone()),
        )
        .await;

    assert_eq!(items.len(), 1);
    assert_eq!(stats.num_failed, 1);
    assert_eq!(hooks.errors(), vec!["https://bad.test".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_flag_canceled_mid_run_reports_cancellation() {
    let list = ["https://a.test", "https://b.test", "https://c.test"];
    let mut fetcher = MockFetcher::new();
    let mut extractor = MockExtractor::new();
    for url in list {
        fetcher = fetcher.with_page(url, "<p>Body</p>");
        extractor = extractor.with_delay(url, Duration::from_millis(100));
    }
    let pipeline = Pipeline::new(
        Settings::default().with_llm_concurrency(1),
        Arc::new(fetcher),
        Arc::new(HtmlParser::new()),
        Arc::new(extractor),
    );

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let (items, stats) = pipeline
        .run(&urls(&list), PipelineOptions::new().with_cancel(cancel))
        .await;

    assert_eq!(items.len(), 1);
    assert!(stats.was_canceled);
    assert_eq!(stats.num_failed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_job_canceled_while_running_stays_canceled() {
    let list = ["https://a.test", "https://b.test", "https://c.test"];
    let mut fetcher = MockFetcher::new();
    let mut extractor = MockExtractor::new();
    for url in list {
        fetcher = fetcher.with_page(url, "<p>Body</p>");
        extractor = extractor.with_delay(url, Duration::from_millis(100));
    }
    let pipeline = Pipeline::new(
        Settings::default().with_llm_concurrency(1),
        Arc::new(fetcher),
        Arc::new(HtmlParser::new()),
        Arc::new(extractor),
    );
    let store = Arc::new(JobStore::new());
    let runner = JobRunner::new(store.clone(), pipeline);

    let job = runner.submit(JobRequest::new(urls(&list)), "alice").unwrap();
    let id = job.id.to_string();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(store.get(&id).unwrap().status, JobStatus::Running);
    assert!(store.cancel(&id, "alice"));

    runner.wait_all().await;

    let job = store.get(&id).unwrap();
    assert_eq!(job.status, JobStatus::Canceled);
    assert_eq!(job.canceled_by.as_deref(), Some("alice"));
    assert!(job.result.is_none());
    assert!(job.progress < 1.0);
}

#[tokio::test]
async fn test_job_progress_reaches_one_on_success() {
    let fetcher = MockFetcher::new()
        .with_page("https://a.test", "<p>One</p>")
        .with_page("https://b.test", "<p>Two</p>");
    let pipeline = Pipeline::new(
        Settings::default(),
        Arc::new(fetcher),
        Arc::new(HtmlParser::new()),
        Arc::new(MockExtractor::new()),
    );
    let store = Arc::new(JobStore::new());
    let runner = JobRunner::new(store.clone(), pipeline);

    let job = runner
        .submit(JobRequest::new(urls(&["https://a.test", "https://b.test"])), "bob")
        .unwrap();
    runner.wait_all().await;

    let job = store.get(&job.id.to_string()).unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.progress, 1.0);
    assert_eq!(job.result.unwrap()["items"].as_array().unwrap().len(), 2);
}
