//! Single model call with the hint-enriched prompt.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::prompts::{build_prompt, PromptStyle};
use super::LlmBackend;
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::fields::{detect_unavailable_fields, normalize_fields, normalize_keys, score_nonempty_fields};
use crate::json_repair;
use crate::traits::extractor::Extractor;
use crate::traits::model::ChatMessage;
use crate::types::item::ScrapedItem;
use crate::types::request::ScrapeRequest;

pub struct DynamicExtractor {
    backend: LlmBackend,
}

impl DynamicExtractor {
    pub fn new(backend: LlmBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Extractor for DynamicExtractor {
    async fn extract(&self, request: ScrapeRequest, cancel: &CancelToken) -> Result<Option<ScrapedItem>> {
        let prompt = build_prompt(
            &request.text,
            &request.url,
            PromptStyle::Enhanced,
            request.hints.as_ref(),
        );
        let messages = [ChatMessage::user(prompt)];

        let Some(content) = self.backend.call(&messages, cancel).await else {
            return Ok(None);
        };
        let Some(raw) = json_repair::parse(&content) else {
            warn!(url = %request.url, "Could not parse model output");
            return Ok(None);
        };

        let mut raw = normalize_keys(raw);
        raw.insert("url".into(), Value::String(request.url.clone()));
        let unavailable = detect_unavailable_fields(&raw);
        info!(
            url = %request.url,
            score = score_nonempty_fields(&raw),
            unavailable = unavailable.len(),
            "Field discovery score"
        );

        let mut fields = normalize_fields(&raw);
        if request.take_screenshot {
            if let Some(path) = self.backend.screenshot(&request.url).await {
                fields.insert("screenshot_path".into(), Value::String(path));
            }
        }

        match ScrapedItem::from_fields(&fields) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Model output failed validation");
                Ok(None)
            }
        }
    }

    fn name(&self) -> &'static str {
        "llm_dynamic"
    }
}
