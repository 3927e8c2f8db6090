//! HTML to text and context hints.

use crate::types::request::ContextHints;

pub trait PageParser: Send + Sync {
    /// Visible text of the page, one non-empty line per block.
    fn extract_main_text(&self, html: &str) -> String;

    /// Page-type guess, meta summary, breadcrumbs and URL segments.
    fn extract_metadata_hints(&self, html: &str, url: &str) -> ContextHints;
}
