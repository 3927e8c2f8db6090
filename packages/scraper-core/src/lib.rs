//! Concurrent Scrape Orchestration
//!
//! Turns a list of URLs into structured [`ScrapedItem`]s: pages are fetched
//! concurrently, reduced to text, and handed to an extraction strategy
//! running in a bounded worker pool. Long runs can be tracked as jobs in an
//! in-memory [`JobStore`] with cooperative cancellation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use scraper_core::{Pipeline, PipelineOptions, Settings};
//!
//! let settings = Settings::from_env()?;
//! let pipeline = Pipeline::from_settings(settings)?;
//! let (items, stats) = pipeline.run(&urls, PipelineOptions::default()).await;
//! ```
//!
//! # Modules
//!
//! - [`pipeline`] - Orchestration and the worker pool
//! - [`jobs`] - Job records, store and background runner
//! - [`agents`] - Extraction strategies, including the adaptive retry engine
//! - [`json_repair`] - Tolerant parsing of model output
//! - [`fields`] - Field scoring and normalization
//! - [`traits`] - Collaborator seams (fetcher, parser, model, screenshotter)
//! - [`testing`] - Mock implementations for testing

pub mod agents;
pub mod ai;
pub mod cancel;
pub mod config;
pub mod error;
pub mod fetchers;
pub mod fields;
pub mod jobs;
pub mod json_repair;
pub mod parsers;
pub mod pipeline;
pub mod security;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use agents::{extractor_for, AdaptiveExtractor, ExtractorDeps, RetryPolicy};
pub use cancel::CancelToken;
pub use config::Settings;
pub use error::{JobStoreError, ModelError, Result, ScrapeError, SettingsError, ValidationError};
pub use jobs::{Job, JobListQuery, JobPage, JobRequest, JobRunner, JobStatus, JobStore, JobUpdate};
pub use pipeline::{JobHooks, Pipeline, PipelineOptions, WorkerPool, WorkerPoolConfig};
pub use security::ApiKey;
pub use traits::{
    extractor::Extractor,
    fetcher::Fetcher,
    model::{ChatMessage, ModelClient, ModelConfig},
    parser::PageParser,
    screenshot::Screenshotter,
};
pub use types::{
    item::ScrapedItem,
    request::{AgentMode, ContextHints, ScrapeInput, ScrapeRequest},
    stats::ScrapeStats,
};
