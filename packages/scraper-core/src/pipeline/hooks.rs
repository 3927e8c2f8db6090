//! Job visibility hooks.
//!
//! Every method is best effort: the pipeline calls them through
//! [`call_hook`], so a panicking hook is logged and the run carries on.

use std::sync::Arc;

use crate::error::ScrapeError;
use crate::types::item::ScrapedItem;

use super::pool::guarded;

/// Observer for one pipeline run. All methods default to no-ops.
pub trait JobHooks: Send + Sync {
    /// Extraction is about to start over `total` inputs.
    fn on_started(&self, _total: usize) {}

    fn on_progress(&self, _done: usize, _total: usize) {}

    fn on_item_processed(&self, _item: &ScrapedItem) {}

    fn on_error(&self, _url: &str, _error: &ScrapeError) {}

    /// The run stopped early (cancellation or a pipeline-level failure).
    fn on_failed(&self, _reason: &str) {}

    fn on_completed(&self, _succeeded: usize, _failed: usize, _duration_sec: f64) {}
}

/// Hooks that ignore everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl JobHooks for NoopHooks {}

/// Invoke `f` on the hooks, if any, swallowing panics.
pub(crate) fn call_hook(hooks: Option<&Arc<dyn JobHooks>>, name: &str, f: impl FnOnce(&dyn JobHooks)) {
    if let Some(hooks) = hooks {
        guarded(name, || f(&**hooks));
    }
}
