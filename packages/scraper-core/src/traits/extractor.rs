//! Extraction strategy seam. One implementation per agent mode.

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::types::item::ScrapedItem;
use crate::types::request::ScrapeRequest;

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract one item. `Ok(None)` means the page yielded nothing usable.
    ///
    /// Multi-pass strategies poll `cancel` between passes.
    async fn extract(&self, request: ScrapeRequest, cancel: &CancelToken) -> Result<Option<ScrapedItem>>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}
