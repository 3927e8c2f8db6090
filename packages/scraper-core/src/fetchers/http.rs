//! reqwest-backed fetcher with bounded concurrency and fixed-delay retries.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use governor::{Quota, RateLimiter};
use indexmap::{IndexMap, IndexSet};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{Result, ScrapeError};
use crate::traits::fetcher::{fetch_error, Fetcher};

pub const FETCH_RETRY_ATTEMPTS: u32 = 3;
pub const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Fetches pages over HTTP.
///
/// ```rust,ignore
/// let fetcher = HttpFetcher::new(Duration::from_secs(10))?.with_rate_limit(5);
/// let pages = fetcher.fetch_all(&urls, 10, &CancelToken::none()).await;
/// ```
pub struct HttpFetcher {
    client: reqwest::Client,
    limiter: Option<Arc<DefaultRateLimiter>>,
    attempts: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    /// Build a fetcher with browser-like headers and a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| ScrapeError::Fetch(format!("failed to build http client: {}", e)))?;

        Ok(Self::with_client(client))
    }

    /// Use a preconfigured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            limiter: None,
            attempts: FETCH_RETRY_ATTEMPTS,
            retry_delay: FETCH_RETRY_DELAY,
        }
    }

    /// Throttle request starts to `per_second`. Zero disables throttling.
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.limiter = NonZeroU32::new(per_second)
            .map(|n| Arc::new(RateLimiter::direct(Quota::per_second(n))));
        self
    }

    /// Override the retry budget and delay.
    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<String, String> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }
        response.text().await.map_err(|e| e.to_string())
    }

    /// Fetch one URL, returning the body or a failure marker.
    async fn fetch_with_retries(&self, url: &str, cancel: &CancelToken) -> String {
        let mut last_error = String::from("no attempts made");

        for attempt in 1..=self.attempts {
            if cancel.is_canceled() {
                return fetch_error("canceled");
            }

            match self.fetch_once(url).await {
                Ok(body) => {
                    debug!(url = %url, attempt, bytes = body.len(), "Fetched page");
                    return body;
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "Fetch attempt failed");
                    last_error = e;
                }
            }

            if attempt < self.attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_delay) => {}
                    _ = cancel.cancelled() => return fetch_error("canceled"),
                }
            }
        }

        fetch_error(last_error)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_all(
        &self,
        urls: &[String],
        concurrency: usize,
        cancel: &CancelToken,
    ) -> IndexMap<String, String> {
        let unique: IndexSet<&String> = urls.iter().collect();

        let semaphore = Semaphore::new(concurrency.max(1));
        info!(urls = unique.len(), concurrency = concurrency.max(1), "Fetching pages");

        let fetches = unique.iter().map(|url| {
            let semaphore = &semaphore;
            async move {
                let body = match semaphore.acquire().await {
                    Ok(_permit) => self.fetch_with_retries(url, cancel).await,
                    Err(_) => fetch_error("semaphore closed"),
                };
                ((*url).clone(), body)
            }
        });

        join_all(fetches).await.into_iter().collect()
    }
}
