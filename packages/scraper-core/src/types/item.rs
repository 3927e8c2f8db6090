//! Scraped item - the validated output of one extraction.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::ValidationError;
use crate::fields::parse_price;
use crate::json_repair::JsonObject;

/// Fields with a fixed place in [`ScrapedItem`]; everything else is an extra.
pub const KNOWN_FIELDS: &[&str] = &[
    "url",
    "title",
    "description",
    "price",
    "author",
    "date_published",
    "screenshot_path",
];

/// A structured record extracted from one page.
///
/// Known fields are typed. Any other key the extractor produced lands in
/// `extras`, in the order it was observed, and is flattened back to the top
/// level when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedItem {
    /// Source page (http or https)
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Non-negative price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_published: Option<String>,

    /// Path to a screenshot of the page, if one was captured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,

    /// Additional fields outside the fixed schema
    #[serde(flatten)]
    pub extras: IndexMap<String, Value>,
}

impl ScrapedItem {
    /// Create an item with only a URL. Use [`ScrapedItem::validated`] when the
    /// URL comes from untrusted input.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            price: None,
            author: None,
            date_published: None,
            screenshot_path: None,
            extras: IndexMap::new(),
        }
    }

    /// Validate the URL and return the item.
    pub fn validated(self) -> Result<Self, ValidationError> {
        validate_url(&self.url)?;
        if let Some(price) = self.price {
            if !price.is_finite() || price < 0.0 {
                return Err(ValidationError::InvalidPrice(price.to_string()));
            }
        }
        Ok(self)
    }

    /// Validate a loosely-typed field map against the item schema.
    ///
    /// - `url` is required and must be http(s)
    /// - known string fields must be strings; blank strings become `None`
    /// - `price` accepts numbers or strings with currency noise, and must be >= 0
    /// - other non-null keys are kept as extras
    pub fn from_fields(fields: &JsonObject) -> Result<Self, ValidationError> {
        let url = match fields.get("url") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Null) | None => return Err(ValidationError::MissingField("url")),
            Some(_) => {
                return Err(ValidationError::NotAString {
                    field: "url".to_string(),
                })
            }
        };
        validate_url(&url)?;

        let mut item = Self::new(url);
        item.title = optional_string(fields, "title")?;
        item.description = optional_string(fields, "description")?;
        item.author = optional_string(fields, "author")?;
        item.date_published = optional_string(fields, "date_published")?;
        item.screenshot_path = optional_string(fields, "screenshot_path")?;
        item.price = optional_price(fields.get("price"))?;

        for (key, value) in fields {
            if KNOWN_FIELDS.contains(&key.as_str()) || value.is_null() {
                continue;
            }
            item.extras.insert(key.clone(), value.clone());
        }

        Ok(item)
    }

    /// Whether any content field was found.
    pub fn has_content(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.price.is_some()
            || self.author.is_some()
            || self.date_published.is_some()
            || !self.extras.is_empty()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_screenshot_path(mut self, path: impl Into<String>) -> Self {
        self.screenshot_path = Some(path.into());
        self
    }

    /// Add an extra field.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

fn validate_url(raw: &str) -> Result<(), ValidationError> {
    let parsed = Url::parse(raw).map_err(|_| ValidationError::InvalidUrl(raw.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        _ => Err(ValidationError::InvalidUrl(raw.to_string())),
    }
}

fn optional_string(fields: &JsonObject, key: &str) -> Result<Option<String>, ValidationError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(_) => Err(ValidationError::NotAString {
            field: key.to_string(),
        }),
    }
}

fn optional_price(value: Option<&Value>) -> Result<Option<f64>, ValidationError> {
    let price = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => parse_price(s),
        Some(other) => return Err(ValidationError::InvalidPrice(other.to_string())),
    };

    match price {
        Some(p) if p.is_finite() && p >= 0.0 => Ok(Some(p)),
        _ => Err(ValidationError::InvalidPrice(
            value.map(|v| v.to_string()).unwrap_or_default(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_fields_splits_known_and_extras() {
        let item = ScrapedItem::from_fields(&fields(json!({
            "url": "https://shop.example.com/p/1",
            "title": "  Mouse ",
            "price": "$49.90",
            "color": "graphite",
            "rating": 4.5,
            "warranty": null,
        })))
        .unwrap();

        assert_eq!(item.title.as_deref(), Some("Mouse"));
        assert_eq!(item.price, Some(49.9));
        assert_eq!(item.extras.get("color"), Some(&json!("graphite")));
        assert!(!item.extras.contains_key("warranty"));
        assert_eq!(item.extras.keys().collect::<Vec<_>>(), vec!["color", "rating"]);
    }

    #[test]
    fn test_from_fields_requires_http_url() {
        let err = ScrapedItem::from_fields(&fields(json!({"title": "x"}))).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("url"));

        let err = ScrapedItem::from_fields(&fields(json!({"url": "ftp://example.com"}))).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidUrl(_)));
    }

    #[test]
    fn test_from_fields_rejects_negative_price() {
        let err = ScrapedItem::from_fields(&fields(json!({
            "url": "https://example.com",
            "price": -3
        })))
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPrice(_)));
    }

    #[test]
    fn test_from_fields_rejects_non_string_title() {
        let err = ScrapedItem::from_fields(&fields(json!({
            "url": "https://example.com",
            "title": ["a", "b"]
        })))
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::NotAString {
                field: "title".into()
            }
        );
    }

    #[test]
    fn test_serialization_flattens_extras() {
        let item = ScrapedItem::new("https://example.com")
            .with_title("Hello")
            .with_extra("color", "red");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["color"], "red");
        assert_eq!(value["title"], "Hello");
        assert!(value.get("price").is_none());
    }
}
