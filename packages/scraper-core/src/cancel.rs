//! Cooperative cancellation.
//!
//! A [`CancelToken`] composes an externally settable flag (a
//! [`CancellationToken`]) with a caller-supplied predicate over outside state,
//! typically "does the job store say this job is CANCELED?". The token never
//! owns the job or the flag's lifetime; it only answers whether the current
//! unit of work should stop.
//!
//! Cancellation is polled, never forced: work already handed to a network
//! call is left to finish or time out on its own.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Result, ScrapeError};

/// How often [`CancelToken::cancelled`] re-evaluates the predicate.
pub const PREDICATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Flag plus predicate. Cheap to clone; clones observe the same flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Option<CancellationToken>,
    predicate: Option<Predicate>,
}

impl CancelToken {
    /// A token that is never canceled.
    pub fn none() -> Self {
        Self::default()
    }

    /// Create a token backed by a fresh flag.
    pub fn new() -> Self {
        Self::default().with_flag(CancellationToken::new())
    }

    /// Attach an externally owned flag.
    pub fn with_flag(mut self, flag: CancellationToken) -> Self {
        self.flag = Some(flag);
        self
    }

    /// Attach a predicate polled alongside the flag.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// The flag, if any. Calling `cancel()` on it cancels every clone.
    pub fn flag(&self) -> Option<&CancellationToken> {
        self.flag.as_ref()
    }

    /// Set the flag. No-op for tokens without one.
    pub fn cancel(&self) {
        if let Some(flag) = &self.flag {
            flag.cancel();
        }
    }

    /// Whether the unit of work should stop.
    ///
    /// A predicate that panics is treated as "not canceled".
    pub fn is_canceled(&self) -> bool {
        if self.flag.as_ref().is_some_and(|f| f.is_cancelled()) {
            return true;
        }
        match &self.predicate {
            Some(predicate) => match catch_unwind(AssertUnwindSafe(|| predicate())) {
                Ok(canceled) => canceled,
                Err(_) => {
                    warn!("cancel predicate panicked; treating as not canceled");
                    false
                }
            },
            None => false,
        }
    }

    /// Return `Err(ScrapeError::Cancelled)` if canceled.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(ScrapeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once the token is canceled. Never resolves for [`CancelToken::none`].
    pub async fn cancelled(&self) {
        match (&self.flag, &self.predicate) {
            (None, None) => std::future::pending::<()>().await,
            (Some(flag), None) => flag.cancelled().await,
            (flag, Some(_)) => loop {
                if self.is_canceled() {
                    return;
                }
                match flag {
                    Some(flag) => {
                        tokio::select! {
                            _ = flag.cancelled() => return,
                            _ = tokio::time::sleep(PREDICATE_POLL_INTERVAL) => {}
                        }
                    }
                    None => tokio::time::sleep(PREDICATE_POLL_INTERVAL).await,
                }
            },
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("has_flag", &self.flag.is_some())
            .field("has_predicate", &self.predicate.is_some())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_none_is_never_canceled() {
        let token = CancelToken::none();
        assert!(!token.is_canceled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_flag_cancels_all_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_canceled());
        assert!(matches!(clone.check(), Err(ScrapeError::Cancelled)));
    }

    #[test]
    fn test_predicate_is_consulted() {
        let state = Arc::new(AtomicBool::new(false));
        let observed = state.clone();
        let token = CancelToken::none().with_predicate(move || observed.load(Ordering::SeqCst));

        assert!(!token.is_canceled());
        state.store(true, Ordering::SeqCst);
        assert!(token.is_canceled());
    }

    #[test]
    fn test_panicking_predicate_counts_as_not_canceled() {
        let token = CancelToken::none().with_predicate(|| panic!("boom"));
        assert!(!token.is_canceled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_predicate() {
        let state = Arc::new(AtomicBool::new(false));
        let observed = state.clone();
        let token = CancelToken::new().with_predicate(move || observed.load(Ordering::SeqCst));

        let setter = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            setter.store(true, Ordering::SeqCst);
        });

        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("token should resolve once the predicate flips");
    }
}
