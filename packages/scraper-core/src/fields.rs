//! Field canonicalization, placeholder detection, and completeness scoring.
//!
//! The adaptive engine compares extraction attempts by a weighted score:
//! every known field contributes its importance weight, every other present
//! field contributes [`UNKNOWN_FIELD_WEIGHT`].

use std::collections::BTreeSet;

use serde_json::Value;

use crate::json_repair::JsonObject;

/// Score contributed by a present field with no declared weight.
pub const UNKNOWN_FIELD_WEIGHT: f64 = 0.3;

/// Importance weights for well-known fields.
pub const FIELD_WEIGHTS: &[(&str, f64)] = &[
    ("title", 3.0),
    ("price", 3.0),
    ("summary", 2.0),
    ("description", 2.0),
    ("author", 2.0),
    ("company", 2.0),
    ("job_title", 2.0),
    ("location", 1.0),
    ("date", 1.0),
    ("date_published", 1.0),
    ("date_posted", 1.0),
];

/// Syntactic "no value" markers, compared trimmed and lower-cased.
pub const PLACEHOLDER_VALUES: &[&str] = &["not specified", "n/a", "none", "unknown", "-", ""];

/// Required fields when the page type is unknown.
pub const IMPORTANT_FIELDS: &[&str] = &["title", "description", "price", "author", "date_published"];

/// Alias → canonical field name.
pub const FIELD_SYNONYMS: &[(&str, &str)] = &[
    ("name", "title"),
    ("headline", "title"),
    ("product_name", "title"),
    ("desc", "description"),
    ("details", "description"),
    ("product_description", "description"),
    ("cost", "price"),
    ("amount", "price"),
    ("price_usd", "price"),
    ("writer", "author"),
    ("byline", "author"),
    ("by", "author"),
    ("published", "date_published"),
    ("publish_date", "date_published"),
    ("published_date", "date_published"),
    ("date_posted_at", "date_published"),
    ("employer", "company"),
    ("organization", "company"),
    ("company_name", "company"),
    ("position", "job_title"),
    ("role", "job_title"),
];

/// Fields trimmed and checked for placeholders during normalization.
const TEXT_FIELDS: &[&str] = &[
    "title",
    "description",
    "author",
    "summary",
    "job_title",
    "company",
    "location",
    "job_type",
    "application_deadline",
];

/// Fields trimmed but kept verbatim otherwise.
const PLAIN_STRING_FIELDS: &[&str] = &["url", "date_published"];

/// Weight for a known field, or `None`.
pub fn field_weight(name: &str) -> Option<f64> {
    FIELD_WEIGHTS
        .iter()
        .find(|(field, _)| *field == name)
        .map(|(_, weight)| *weight)
}

/// Required fields for a page type (`product`, `job`, `blog`).
pub fn required_fields(page_type: &str) -> Option<&'static [&'static str]> {
    match page_type.trim().to_ascii_lowercase().as_str() {
        "product" => Some(&["title", "price", "description"]),
        "job" => Some(&["job_title", "company", "location", "date_posted"]),
        "blog" => Some(&["title", "author", "date", "summary"]),
        _ => None,
    }
}

/// Required set for a page type, falling back to [`IMPORTANT_FIELDS`].
pub fn required_or_important(page_type: &str) -> BTreeSet<String> {
    required_fields(page_type)
        .unwrap_or(IMPORTANT_FIELDS)
        .iter()
        .map(|f| f.to_string())
        .collect()
}

/// Null or the empty string.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Whether a value is a placeholder like `"N/A"`.
pub fn is_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            PLACEHOLDER_VALUES.contains(&lowered.as_str())
        }
        _ => false,
    }
}

/// Rename aliased keys to their canonical names. Later keys win on collision.
pub fn normalize_keys(raw: JsonObject) -> JsonObject {
    let mut out = JsonObject::new();
    for (key, value) in raw {
        let lowered = key.to_lowercase();
        let canonical = FIELD_SYNONYMS
            .iter()
            .find(|(alias, _)| *alias == lowered)
            .map(|(_, canonical)| canonical.to_string())
            .unwrap_or(key);
        out.insert(canonical, value);
    }
    out
}

/// Keys whose values are placeholders. These are never re-requested.
pub fn detect_unavailable_fields(raw: &JsonObject) -> BTreeSet<String> {
    raw.iter()
        .filter(|(_, v)| is_placeholder(v))
        .map(|(k, _)| k.clone())
        .collect()
}

/// Keys with real values: non-empty and not placeholders.
pub fn observed_fields(raw: &JsonObject, unavailable: &BTreeSet<String>) -> BTreeSet<String> {
    raw.iter()
        .filter(|(k, v)| !is_empty_value(v) && !unavailable.contains(*k))
        .map(|(k, _)| k.clone())
        .collect()
}

/// Normalize values by declared type. Unknown keys pass through.
pub fn normalize_fields(raw: &JsonObject) -> JsonObject {
    raw.iter()
        .map(|(key, value)| (key.clone(), normalize_value(key, value)))
        .collect()
}

fn normalize_value(key: &str, value: &Value) -> Value {
    if key == "price" {
        return match value {
            Value::Number(n) => n
                .as_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Value::String(s) => parse_price(s)
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }

    if PLAIN_STRING_FIELDS.contains(&key) {
        return coerce_to_string(value);
    }

    if TEXT_FIELDS.contains(&key) {
        if is_placeholder(value) {
            return Value::Null;
        }
        return coerce_to_string(value);
    }

    value.clone()
}

/// Trimmed string form of a non-null value. Arrays join their elements with `", "`.
fn coerce_to_string(value: &Value) -> Value {
    let text = match value {
        Value::Null => return Value::Null,
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string().trim().to_string(),
    };
    Value::String(text)
}

/// Parse a price out of text with currency noise (`"$1,299.00"`, `"12,50 €"`).
///
/// With both separators present, commas are thousands separators. A lone
/// comma followed by exactly three digits is a thousands separator too;
/// otherwise it is the decimal point.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = if cleaned.contains(',') && cleaned.contains('.') {
        cleaned.replace(',', "")
    } else if let Some(idx) = cleaned.rfind(',') {
        let tail = &cleaned[idx + 1..];
        if tail.len() == 3 && idx > 0 {
            cleaned.replace(',', "")
        } else {
            cleaned.replace(',', ".")
        }
    } else {
        cleaned
    };

    normalized.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Weighted completeness score of the non-empty entries in `data`.
pub fn score_nonempty_fields(data: &JsonObject) -> f64 {
    data.iter()
        .filter(|(_, v)| !is_empty_value(v))
        .map(|(k, _)| field_weight(k).unwrap_or(UNKNOWN_FIELD_WEIGHT))
        .sum()
}

/// Field names ordered heaviest first; ties break alphabetically.
pub fn sort_by_weight<'a, I>(fields: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut sorted: Vec<String> = fields.into_iter().cloned().collect();
    sorted.sort_by(|a, b| {
        let wa = field_weight(a).unwrap_or(0.0);
        let wb = field_weight(b).unwrap_or(0.0);
        wb.total_cmp(&wa).then_with(|| a.cmp(b))
    });
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn obj(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_score_known_fields() {
        let data = obj(json!({"title": "T", "price": 1}));
        assert_eq!(score_nonempty_fields(&data), 6.0);
    }

    #[test]
    fn test_score_ignores_empty_values() {
        let data = obj(json!({"title": "T", "author": "", "summary": null}));
        assert_eq!(score_nonempty_fields(&data), 3.0);
    }

    #[test]
    fn test_normalize_keys_maps_synonyms() {
        let data = normalize_keys(obj(json!({"Cost": "$5", "headline": "Hi", "color": "red"})));
        assert_eq!(data["price"], "$5");
        assert_eq!(data["title"], "Hi");
        assert_eq!(data["color"], "red");
        assert!(!data.contains_key("Cost"));
    }

    #[test]
    fn test_non_string_text_values_become_strings() {
        let raw = obj(json!({
            "author": ["Ann", " Bob "],
            "date_published": 2024,
            "summary": true,
            "title": null
        }));
        let normalized = normalize_fields(&raw);
        assert_eq!(normalized["author"], "Ann, Bob");
        assert_eq!(normalized["date_published"], "2024");
        assert_eq!(normalized["summary"], "true");
        assert_eq!(normalized["title"], Value::Null);
    }

    #[test]
    fn test_placeholders_detected_and_nulled() {
        let raw = obj(json!({"title": " N/A ", "author": "Ann", "location": "unknown"}));
        let unavailable = detect_unavailable_fields(&raw);
        assert!(unavailable.contains("title"));
        assert!(unavailable.contains("location"));
        assert!(!unavailable.contains("author"));

        let normalized = normalize_fields(&raw);
        assert_eq!(normalized["title"], Value::Null);
        assert_eq!(normalized["author"], "Ann");
    }

    #[test]
    fn test_observed_excludes_placeholders_and_empties() {
        let raw = obj(json!({"title": "n/a", "author": "Ann", "summary": ""}));
        let unavailable = detect_unavailable_fields(&raw);
        let observed = observed_fields(&raw, &unavailable);
        assert_eq!(observed.into_iter().collect::<Vec<_>>(), vec!["author".to_string()]);
    }

    #[test]
    fn test_price_normalization() {
        let normalized = normalize_fields(&obj(json!({"price": "$1,299.99"})));
        assert_eq!(normalized["price"], json!(1299.99));

        let normalized = normalize_fields(&obj(json!({"price": "free"})));
        assert_eq!(normalized["price"], Value::Null);
    }

    #[test]
    fn test_parse_price_separators() {
        assert_eq!(parse_price("12,50 €"), Some(12.5));
        assert_eq!(parse_price("$1,299"), Some(1299.0));
        assert_eq!(parse_price("1,234.56"), Some(1234.56));
        assert_eq!(parse_price("99"), Some(99.0));
        assert_eq!(parse_price("call us"), None);
    }

    #[test]
    fn test_required_fields_by_page_type() {
        assert_eq!(required_fields("product"), Some(&["title", "price", "description"][..]));
        assert!(required_fields("recipe").is_none());
        assert!(required_or_important("").contains("date_published"));
    }

    #[test]
    fn test_sort_by_weight_heaviest_first() {
        let fields: BTreeSet<String> = ["location", "title", "author", "color"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(sort_by_weight(&fields), vec!["title", "author", "location", "color"]);
    }

    proptest! {
        #[test]
        fn prop_unknown_field_adds_exactly_point_three(key in "x_[a-z]{1,10}") {
            let base = obj(json!({"title": "T", "price": 1}));
            let mut extended = base.clone();
            extended.insert(key, json!("value"));

            let delta = score_nonempty_fields(&extended) - score_nonempty_fields(&base);
            prop_assert!((delta - UNKNOWN_FIELD_WEIGHT).abs() < 1e-9);
        }
    }
}
