//! Bounded exponential backoff around a single model call.

use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::error::ModelError;
use crate::traits::model::{ChatMessage, ModelClient, ModelConfig};

/// Retry budget for one logical model call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total calls, including the first
    pub attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// Per-call timeout
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            attempts: settings.retry_attempts.max(1),
            backoff_min: settings.retry_backoff_min,
            backoff_max: settings.retry_backoff_max,
            timeout: settings.request_timeout,
        }
    }

    /// Jittered delay after the `n`th failure (0-based).
    ///
    /// The ceiling grows as `min * 2^n`, capped at `max`; the delay is drawn
    /// uniformly between `min` and that ceiling.
    pub fn delay_for(&self, n: u32) -> Duration {
        let min = self.backoff_min.as_secs_f64();
        let max = self.backoff_max.as_secs_f64().max(min);
        let ceiling = (min * 2f64.powi(n.min(30) as i32)).min(max);
        Duration::from_secs_f64(min + fastrand::f64() * (ceiling - min))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Call the model, retrying transient failures.
///
/// Returns the trimmed content, or `None` when the call failed fatally,
/// the budget ran out, the answer was empty, or `cancel` fired mid-backoff.
pub async fn call_with_backoff(
    model: &dyn ModelClient,
    messages: &[ChatMessage],
    config: &ModelConfig,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Option<String> {
    let attempts = policy.attempts.max(1);

    for attempt in 0..attempts {
        let outcome = match tokio::time::timeout(policy.timeout, model.complete(messages, config)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Transient(format!(
                "model call timed out after {:?}",
                policy.timeout
            ))),
        };

        match outcome {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    warn!(attempt, "Model returned empty content");
                    return None;
                }
                return Some(trimmed.to_string());
            }
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt);
                debug!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Retrying model call");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return None,
                }
            }
            Err(e) => {
                warn!(attempt, error = %e, "Model call failed");
                return None;
            }
        }
    }

    None
}
