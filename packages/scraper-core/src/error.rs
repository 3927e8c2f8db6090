//! Error types for the scrape engine.
//!
//! Malformed model output is never an error here: the JSON repair parser
//! turns it into `None`. Errors are reserved for transport failures, schema
//! mismatches, caller contract violations, and configuration problems.

use thiserror::Error;

/// Top-level errors for scrape operations.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// Fetching a page failed
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Model call failed after the retry budget was spent
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Candidate did not match the item schema
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Operation was cancelled cooperatively
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid request (blank text, bad URL)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] SettingsError),

    /// Missing credentials for a model-backed mode
    #[error("{0}")]
    MissingCredentials(String),

    /// Extraction panicked inside a worker
    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    /// Job store contract error
    #[error("job store error: {0}")]
    JobStore(#[from] JobStoreError),

    /// JSON serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by a text-generation backend.
///
/// The split between transient and fatal drives the bounded backoff wrapper:
/// only transient failures are retried.
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    /// Network failure, timeout, rate limit, or 5xx
    #[error("transient model error: {0}")]
    Transient(String),

    /// Authentication, bad request, or unparseable response
    #[error("fatal model error: {0}")]
    Fatal(String),

    /// Backend answered with no content
    #[error("model returned empty content")]
    EmptyResponse,
}

impl ModelError {
    /// Whether the backoff wrapper should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Transient(_))
    }
}

/// Schema validation failures for scraped items.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("field {field} must be a string")]
    NotAString { field: String },

    #[error("expected a JSON object")]
    NotAnObject,
}

/// Caller contract violations in the job store.
///
/// These indicate a bug in the caller and are never swallowed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobStoreError {
    #[error("invalid job status: {0}")]
    InvalidStatus(String),

    #[error("progress must be within [0.0, 1.0], got {0}")]
    ProgressOutOfRange(f64),

    #[error("updated_at must be timezone-aware")]
    NaiveTimestamp,
}

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("{name} out of range: {value} (expected {expected})")]
    OutOfRange {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Result type for scrape operations.
pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Result type for job store operations.
pub type JobStoreResult<T> = std::result::Result<T, JobStoreError>;

/// Result type for model calls.
pub type ModelResult<T> = std::result::Result<T, ModelError>;
