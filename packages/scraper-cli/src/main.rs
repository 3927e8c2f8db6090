//! Batch Scrape CLI
//!
//! Scrapes a list of URLs with the configured agent mode and prints
//! `{"items": [...], "stats": {...}}` to stdout. Logs go to stderr.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use scraper_core::{AgentMode, CancelToken, Pipeline, PipelineOptions, Settings};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "agentic-scrape", about = "Extract structured items from web pages")]
struct Args {
    /// URLs to scrape
    urls: Vec<String>,

    /// File with one URL per line (blank lines and # comments are skipped)
    #[arg(long)]
    file: Option<PathBuf>,

    /// rule_based, llm_fixed, llm_dynamic or llm_dynamic_adaptive
    #[arg(long, value_parser = parse_agent_mode)]
    agent_mode: Option<AgentMode>,

    #[arg(long)]
    fetch_concurrency: Option<usize>,

    #[arg(long)]
    llm_concurrency: Option<usize>,

    /// Adaptive passes per URL
    #[arg(long)]
    schema_retries: Option<u32>,

    /// Capture a screenshot per extracted page
    #[arg(long)]
    screenshot: bool,

    /// Emit items in completion order instead of input order
    #[arg(long)]
    unordered: bool,
}

fn parse_agent_mode(s: &str) -> std::result::Result<AgentMode, String> {
    s.parse().map_err(|e| format!("{}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let settings = build_settings(&args)?;
    init_logging(&settings);

    let urls = collect_urls(&args)?;
    if urls.is_empty() {
        bail!("no URLs given; pass them as arguments or with --file");
    }

    let pipeline = Pipeline::from_settings(settings).context("Failed to set up the scrape pipeline")?;
    tracing::info!(
        urls = urls.len(),
        agent_mode = %pipeline.settings().agent_mode,
        "Starting batch scrape"
    );

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing in-flight pages");
            on_interrupt.cancel();
        }
    });

    let options = PipelineOptions::new()
        .with_cancel(cancel)
        .with_screenshots(args.screenshot)
        .with_preserve_order(!args.unordered);
    let (items, stats) = pipeline.run(&urls, options).await;

    let output = json!({ "items": items, "stats": stats });
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to serialize output")?
    );
    Ok(())
}

/// Env settings with command-line overrides, validated.
fn build_settings(args: &Args) -> Result<Settings> {
    let mut settings = Settings::from_env().context("Invalid configuration in environment")?;

    if let Some(mode) = args.agent_mode {
        settings = settings.with_agent_mode(mode);
    }
    if let Some(n) = args.fetch_concurrency {
        settings = settings.with_fetch_concurrency(n);
    }
    if let Some(n) = args.llm_concurrency {
        settings = settings.with_llm_concurrency(n);
    }
    if let Some(n) = args.schema_retries {
        settings = settings.with_schema_retries(n);
    }
    if args.screenshot {
        settings = settings.with_screenshots(true);
    }

    settings.validate().context("Invalid command-line overrides")?;
    Ok(settings)
}

fn init_logging(settings: &Settings) {
    let level = if settings.is_verbose() {
        "debug"
    } else {
        settings.log_level.as_str()
    };
    let fallback = format!("{level},scraper_core={level}");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .init();
}

fn collect_urls(args: &Args) -> Result<Vec<String>> {
    let mut urls: Vec<String> = args.urls.iter().map(|u| u.trim().to_string()).collect();

    if let Some(path) = &args.file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read URL file {}", path.display()))?;
        urls.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    urls.retain(|u| !u.is_empty());
    Ok(urls)
}
