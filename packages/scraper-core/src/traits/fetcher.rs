//! Page acquisition.

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::cancel::CancelToken;

/// Prefix marking a fetch failure in place of page HTML.
pub const FETCH_ERROR_PREFIX: &str = "__FETCH_ERROR__";

/// Whether a fetched body is actually a failure marker.
pub fn is_fetch_error(body: &str) -> bool {
    body.starts_with(FETCH_ERROR_PREFIX)
}

/// Build a failure marker for `reason`.
pub fn fetch_error(reason: impl std::fmt::Display) -> String {
    format!("{}: {}", FETCH_ERROR_PREFIX, reason)
}

/// Fetches many URLs concurrently.
///
/// Failures are reported in-band as [`fetch_error`] text, never as errors, so
/// the pipeline can filter them uniformly. The returned map has one entry per
/// distinct URL, in first-seen order.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_all(
        &self,
        urls: &[String],
        concurrency: usize,
        cancel: &CancelToken,
    ) -> IndexMap<String, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_marker() {
        let marker = fetch_error("timeout");
        assert_eq!(marker, "__FETCH_ERROR__: timeout");
        assert!(is_fetch_error(&marker));
        assert!(!is_fetch_error("<html></html>"));
    }
}
