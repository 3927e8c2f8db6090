//! Heuristic extraction without model calls.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::traits::extractor::Extractor;
use crate::traits::screenshot::Screenshotter;
use crate::types::item::ScrapedItem;
use crate::types::request::ScrapeRequest;

pub const DESCRIPTION_MIN_LENGTH: usize = 30;
pub const DESCRIPTION_MAX_LENGTH: usize = 500;

static NUM_THEN_CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:[.,]\d{3})*[.,]?\d{1,4})\s*[€$]").expect("valid regex")
});
static CURRENCY_THEN_NUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[€$]\s*(\d{1,3}(?:[.,]\d{3})*(?:[.,]?\d{1,4})?)").expect("valid regex")
});
static PARAGRAPH_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));

/// First non-empty line.
pub fn guess_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn looks_like_price(line: &str) -> bool {
    NUM_THEN_CURRENCY.is_match(line) || CURRENCY_THEN_NUM.is_match(line)
}

/// First paragraph of a reasonable length, with trailing price lines removed.
pub fn guess_description(text: &str) -> Option<String> {
    PARAGRAPH_SPLIT.split(text).find_map(|paragraph| {
        let mut lines: Vec<&str> = paragraph.trim().lines().collect();
        while lines.last().is_some_and(|line| looks_like_price(line)) {
            lines.pop();
        }
        let candidate = lines.join("\n").trim().to_string();
        let len = candidate.chars().count();
        (DESCRIPTION_MIN_LENGTH..=DESCRIPTION_MAX_LENGTH)
            .contains(&len)
            .then_some(candidate)
    })
}

/// First price-like amount next to a € or $ sign.
///
/// With both separators present, commas are thousands separators; otherwise
/// a comma is the decimal point.
pub fn guess_price(text: &str) -> Option<f64> {
    let captured = NUM_THEN_CURRENCY
        .captures(text)
        .or_else(|| CURRENCY_THEN_NUM.captures(text))
        .and_then(|c| c.get(1))?
        .as_str();

    let normalized = if captured.contains(',') && captured.contains('.') {
        captured.replace(',', "")
    } else {
        captured.replace(',', ".")
    };
    normalized.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// [`Extractor`] for [`crate::types::request::AgentMode::RuleBased`].
pub struct RuleBasedExtractor {
    screenshotter: Arc<dyn Screenshotter>,
    screenshot_dir: PathBuf,
}

impl RuleBasedExtractor {
    pub fn new(screenshotter: Arc<dyn Screenshotter>, screenshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            screenshotter,
            screenshot_dir: screenshot_dir.into(),
        }
    }
}

#[async_trait]
impl Extractor for RuleBasedExtractor {
    async fn extract(&self, request: ScrapeRequest, _cancel: &CancelToken) -> Result<Option<ScrapedItem>> {
        let title = guess_title(&request.text);
        let description = guess_description(&request.text);
        let price = guess_price(&request.text);
        debug!(url = %request.url, ?title, ?price, has_description = description.is_some(), "Rule-based guesses");

        if title.is_none() && description.is_none() && price.is_none() {
            warn!(url = %request.url, "Rule-based extraction found no fields");
            return Ok(None);
        }

        let mut item = ScrapedItem::new(request.url.clone());
        item.title = title;
        item.description = description;
        item.price = price;

        if request.take_screenshot {
            item.screenshot_path = self
                .screenshotter
                .capture(&request.url, &self.screenshot_dir)
                .await
                .map(|p| p.to_string_lossy().into_owned());
        }

        Ok(Some(item.validated()?))
    }

    fn name(&self) -> &'static str {
        "rule_based"
    }
}
