//! Prompts for the model-backed extractors.
//!
//! First-attempt prompts come in a simple and an enhanced flavour; the
//! enhanced one carries context hints and, for short pages, a few-shot
//! example. Retry prompts name the missing fields heaviest first.

use std::collections::BTreeSet;

use tracing::debug;

use crate::fields::{sort_by_weight, IMPORTANT_FIELDS};
use crate::json_repair::JsonObject;
use crate::types::request::ContextHints;

/// Page text sent to the model is clipped to this many characters.
pub const PROMPT_TEXT_LIMIT: usize = 4000;
/// The few-shot example is only added below this text length.
pub const MAX_TEXT_FOR_FEWSHOT: usize = 2000;
/// Length cap of the best-fields preview in retry prompts.
pub const RETRY_PREVIEW_LIMIT: usize = 700;

/// System message for the adaptive conversation.
pub const ADAPTIVE_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that extracts structured data in JSON format.";

/// System message for the fixed-schema extractor.
pub const FIXED_SYSTEM_PROMPT: &str = "You are a web extraction assistant. \
Your job is to extract key data from webpage content. \
Return only a JSON object with the following fields: \
- title (string or null) \
- description (string or null) \
- price (float or null) \
- author (string or null) \
- date_published (string or null) \
All values must be valid JSON. If a field is not found, return null for it.";

const FEW_SHOT_EXAMPLE: &str = r#"
Example:

Page Type: product
Extracted JSON:
{
  "url": "https://example.com/product123",
  "page_type": "product",
  "title": "Logitech MX Master 3",
  "price": "$99.99",
  "description": "Wireless mouse with ergonomic design."
}
"#;

const SCHEMA_BLOCK: &str = r#"
Template JSON schema (example fields):
- url (str)
- page_type (str)
- title (str)
- price (str)
- summary (str)
- author (str)
- company (str)
- location (str)
- date (str)
...

These are just illustrative fields. Depending on the context,
extract additional relevant fields that are clearly presented on the page.
"#;

const EXTRACTION_GUIDANCE: &str = "\
- Don't limit yourself to common fields (e.g., title, price, author), also extract other
relevant attributes you can infer from the page that would be useful
(e.g., for a product page: product features and specifications, ratings, etc)";

const NULL_GUIDANCE: &str = "\
- If any field is unavailable or missing from the page (e.g., 'Not specified', 'N/A', etc.),
return it as syntactic null. Do not guess or hallucinate values.";

const KEY_VALUE_GUIDANCE: &str = "\
- If the page includes key-value pairs, such as product specifications,
bullet points, or labeled sections, extract each as a separate field in the JSON output.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptStyle {
    #[default]
    Simple,
    /// Adds context hints and, for short pages, a few-shot example
    Enhanced,
}

/// First char-boundary-safe prefix of `text` with at most `limit` chars.
pub fn clip(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Build the first-attempt prompt.
pub fn build_prompt(
    text: &str,
    url: &str,
    style: PromptStyle,
    hints: Option<&ContextHints>,
) -> String {
    let base = format!(
        "You are a smart web content extraction agent.
Your goal is to extract as much useful information
(as structured fields) as possible, from the web page below.
The extraction should be based on the type of the web page (product, blog, job) and its context.
Based on the inferred page type and context, choose the most relevant fields to extract.

Instructions:
- Infer the page_type (e.g. product, blog, job) and context.
- Decide which fields are useful to add to results, based on context.
{guidance}
- Extract the entire page for semantically meaningful fields as possible.
{nulls}
- The following fields are especially important:
{important}, but don't hesitate to add more relevant
fields and explore for more fields.
- Return as a valid JSON object.
{key_values}

Your goal is to extract as much relevant information and more useful fields as possible.

Mandatory fields: url, page_type.
{schema}",
        guidance = EXTRACTION_GUIDANCE,
        nulls = NULL_GUIDANCE,
        important = IMPORTANT_FIELDS.join(", "),
        key_values = KEY_VALUE_GUIDANCE,
        schema = SCHEMA_BLOCK.trim_end(),
    );

    let (example_block, context_block) = match style {
        PromptStyle::Simple => (String::new(), String::new()),
        PromptStyle::Enhanced => {
            let hint = |key: &str| hint_or_na(hints, key);
            debug!(
                url = %url,
                page_type = hint("page"),
                breadcrumbs = hint("breadcrumbs"),
                "Using context hints"
            );
            let context = format!(
                "Extra context:\n- Page Type: {}\n- Meta tags: {}\n- Breadcrumbs: {}\n- URL segments: {}\n",
                hint("page"),
                hint("meta"),
                hint("breadcrumbs"),
                hint("url_segments"),
            );
            let example = if text.chars().count() < MAX_TEXT_FOR_FEWSHOT {
                FEW_SHOT_EXAMPLE.to_string()
            } else {
                String::new()
            };
            (example, context)
        }
    };

    format!(
        "{}\n\n{}\n{}\n\nPage URL: {}\n\nPage Content:\n{}",
        base,
        example_block.trim(),
        context_block.trim(),
        url,
        clip(text, PROMPT_TEXT_LIMIT),
    )
}

fn hint_or_na<'a>(hints: Option<&'a ContextHints>, key: &str) -> &'a str {
    hints
        .and_then(|h| h.get(key))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .unwrap_or("N/A")
}

/// Pretty JSON preview, cut at [`RETRY_PREVIEW_LIMIT`] chars.
pub fn truncate_fields(fields: &JsonObject) -> String {
    let raw = serde_json::to_string_pretty(fields).unwrap_or_else(|_| "{}".to_string());
    if raw.chars().count() <= RETRY_PREVIEW_LIMIT {
        raw
    } else {
        format!("{}\n... (truncated)", clip(&raw, RETRY_PREVIEW_LIMIT))
    }
}

/// Prompt asking for the missing fields while inviting enrichment.
pub fn build_retry_prompt(best_fields: &JsonObject, missing: &BTreeSet<String>) -> String {
    let ordered = sort_by_weight(missing);
    let listed = if ordered.is_empty() {
        "None".to_string()
    } else {
        ordered.join(", ")
    };

    format!(
        "We previously extracted the following fields from the URL:
{preview}

We would like to both recover the following important missing fields,
and explore the page for any additional structured data:
{listed}.

Instructions:
- Re-analyze the page carefully.
- Fill in the missing required fields listed above.
{nulls}
- If previously returned values were null and are still not available on
the page, leave them as null.
- Include any additional relevant or useful fields if not already present.
- Explore all sections of page.
- Use your judgment based on the page type and context to
choose the most relevant fields to extract.
{guidance}
- Create new field names as needed when encountering novel information.
{key_values}

Your goal is to extract as much relevant information and more useful fields as possible.
",
        preview = truncate_fields(best_fields),
        listed = listed,
        nulls = NULL_GUIDANCE,
        guidance = EXTRACTION_GUIDANCE,
        key_values = KEY_VALUE_GUIDANCE,
    )
}

/// Retry prompt when fields are missing, otherwise an enrichment or generic prompt.
pub fn build_retry_or_fallback_prompt(
    best_fields: Option<&JsonObject>,
    missing: &BTreeSet<String>,
) -> String {
    if !missing.is_empty() {
        debug!(missing = ?missing, "Building retry prompt");
        let empty = JsonObject::new();
        return build_retry_prompt(best_fields.unwrap_or(&empty), missing);
    }

    match best_fields {
        Some(best) if !best.is_empty() => {
            debug!("Building enrichment prompt");
            format!(
                "We previously extracted the following fields:
{}

Instructions:
- Analyze the content again and extract any additional useful or contextually relevant fields.
- If possible, improve or extend previously extracted fields (do not just repeat them).
- Use your judgment based on the page type and context, to add more fields.
- Create new field names as needed when encountering novel information.

Return as a valid JSON object.
",
                truncate_fields(best)
            )
        }
        _ => "Analyze the content and extract all useful, relevant, or structured fields. \
Use your best judgment to infer fields based on page context and type. \
Don't limit yourself to common fields (e.g., title, price, author), also extract other \
relevant attributes you can infer from the page that would be useful. \
Create new field names as needed when encountering novel information. \
Return as a valid JSON object."
            .to_string(),
    }
}
