//! Per-run statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counts and timing for one pipeline run. Always returned, even when empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeStats {
    pub num_urls: usize,
    pub num_success: usize,
    pub num_failed: usize,
    /// Wall-clock seconds, rounded to 2 decimals
    pub duration_sec: f64,
    pub was_canceled: bool,
}

impl ScrapeStats {
    pub fn new(num_urls: usize, num_success: usize, elapsed: Duration, was_canceled: bool) -> Self {
        Self {
            num_urls,
            num_success,
            num_failed: num_urls.saturating_sub(num_success),
            duration_sec: round_secs(elapsed),
            was_canceled,
        }
    }
}

fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}
