//! Single model call with a fixed field list.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::prompts::{clip, FIXED_SYSTEM_PROMPT, PROMPT_TEXT_LIMIT};
use super::LlmBackend;
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::json_repair;
use crate::traits::extractor::Extractor;
use crate::traits::model::ChatMessage;
use crate::types::item::ScrapedItem;
use crate::types::request::ScrapeRequest;

pub struct FixedExtractor {
    backend: LlmBackend,
}

impl FixedExtractor {
    pub fn new(backend: LlmBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Extractor for FixedExtractor {
    async fn extract(&self, request: ScrapeRequest, cancel: &CancelToken) -> Result<Option<ScrapedItem>> {
        let messages = [
            ChatMessage::system(FIXED_SYSTEM_PROMPT),
            ChatMessage::user(clip(&request.text, PROMPT_TEXT_LIMIT)),
        ];

        let Some(content) = self.backend.call(&messages, cancel).await else {
            return Ok(None);
        };
        let Some(mut fields) = json_repair::parse(&content) else {
            warn!(url = %request.url, "Could not parse model output");
            return Ok(None);
        };

        if request.take_screenshot {
            if let Some(path) = self.backend.screenshot(&request.url).await {
                fields.insert("screenshot_path".into(), Value::String(path));
            }
        }
        fields.insert("url".into(), Value::String(request.url.clone()));

        match ScrapedItem::from_fields(&fields) {
            Ok(item) => {
                info!(url = %request.url, "Extracted item");
                Ok(Some(item))
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Model output failed validation");
                Ok(None)
            }
        }
    }

    fn name(&self) -> &'static str {
        "llm_fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ExtractorDeps;
    use crate::testing::MockModel;
    use crate::traits::model::Role;
    use std::sync::Arc;

    fn extractor(model: Arc<MockModel>) -> FixedExtractor {
        let deps = ExtractorDeps::default().with_model(model);
        FixedExtractor::new(deps.llm_backend().unwrap())
    }

    #[tokio::test]
    async fn test_fixed_extraction() {
        let model = Arc::new(MockModel::new().with_response(
            "```json\n{\"title\": \"Mouse\", \"price\": \"$49.90\", \"author\": null}\n```",
        ));
        let request = ScrapeRequest::new("https://shop.example.com/m", "Mouse $49.90").unwrap();

        let item = extractor(model.clone())
            .extract(request, &CancelToken::none())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(item.url, "https://shop.example.com/m");
        assert_eq!(item.title.as_deref(), Some("Mouse"));
        assert_eq!(item.price, Some(49.9));

        let calls = model.calls();
        assert_eq!(calls[0][0].role, Role::System);
        assert_eq!(calls[0][1].content, "Mouse $49.90");
    }

    #[tokio::test]
    async fn test_unparseable_output_is_none() {
        let model = Arc::new(MockModel::new().with_response("I could not find anything"));
        let request = ScrapeRequest::new("https://x.com", "text").unwrap();
        let out = extractor(model).extract(request, &CancelToken::none()).await.unwrap();
        assert!(out.is_none());
    }
}
