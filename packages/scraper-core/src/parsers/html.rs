//! Regex-based HTML parser.
//!
//! Good enough for text extraction and hint gathering on ordinary pages. It
//! does not build a DOM, so deeply nested markup of the same tag inside a
//! breadcrumb container is cut at the first closing tag.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::traits::parser::PageParser;
use crate::types::request::ContextHints;

/// Meta names/properties worth passing to the model.
pub const USEFUL_META_KEYS: &[&str] = &[
    "title",
    "description",
    "keywords",
    "author",
    "og:title",
    "og:description",
    "og:site_name",
    "og:type",
    "article:published_time",
    "twitter:title",
    "twitter:description",
];

static NON_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>|<noscript\b[^>]*>.*?</noscript>|<!--.*?-->")
        .expect("valid regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));
static META_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid regex"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").expect("valid regex"));
static H1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1>").expect("valid regex"));
static BREADCRUMB_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<([a-z][a-z0-9]*)\b[^>]*\b(?:class|id)\s*=\s*["'][^"']*breadcrumb[^"']*["'][^>]*>"#)
        .expect("valid regex")
});
static NAV_BREADCRUMB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<nav\b[^>]*aria-label\s*=\s*["']breadcrumb["'][^>]*>(.*?)</nav>"#).expect("valid regex")
});
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Default [`PageParser`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlParser;

impl HtmlParser {
    pub fn new() -> Self {
        Self
    }
}

impl PageParser for HtmlParser {
    fn extract_main_text(&self, html: &str) -> String {
        let cleaned = NON_CONTENT.replace_all(html, "");
        let separated = TAG.replace_all(&cleaned, "\n");
        decode_entities(&separated)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn extract_metadata_hints(&self, html: &str, url: &str) -> ContextHints {
        let meta = meta_summary(html);
        let crumbs = breadcrumbs(html);

        let parsed = Url::parse(url).ok();
        let path = parsed.as_ref().map(|u| u.path().to_string()).unwrap_or_default();
        let url_segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" / ");
        let last_segment = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let domain = parsed
            .as_ref()
            .and_then(|u| {
                u.host_str().map(|host| match u.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                })
            })
            .unwrap_or_default()
            .to_lowercase();

        let page_title = first_capture_text(&TITLE, html);
        let first_h1 = first_capture_text(&H1, html);
        let page = guess_page_type(url, &page_title, &first_h1);

        debug!(url = %url, page_type = page, breadcrumbs = crumbs.len(), "Extracted context hints");

        let mut hints = ContextHints::new();
        hints.insert("meta".into(), meta);
        hints.insert("breadcrumbs".into(), crumbs.join(" > "));
        hints.insert("url_segments".into(), url_segments);
        hints.insert("context_domain".into(), domain);
        hints.insert("url_last_segment".into(), last_segment);
        hints.insert("page_title".into(), page_title);
        hints.insert("first_h1".into(), first_h1);
        hints.insert("page".into(), page.to_string());
        hints
    }
}

/// Naive page-type inference over URL, title and first heading.
pub fn guess_page_type(url: &str, title: &str, h1: &str) -> &'static str {
    let combined = format!("{} {} {}", url, title, h1).to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| combined.contains(n));

    if has(&["product", "shop"]) {
        "product"
    } else if has(&["job", "career", "apply"]) {
        "job"
    } else if has(&["blog", "post", "article"]) {
        "blog"
    } else {
        "unknown"
    }
}

fn meta_summary(html: &str) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();

    for tag in META_TAG.find_iter(html) {
        let mut key = None;
        let mut content = None;
        for attr in ATTRIBUTE.captures_iter(tag.as_str()) {
            let value = attr
                .get(2)
                .or_else(|| attr.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match attr[1].to_ascii_lowercase().as_str() {
                "name" if key.is_none() => key = Some(value.to_string()),
                "property" if key.is_none() => key = Some(value.to_string()),
                "content" => content = Some(decode_entities(value)),
                _ => {}
            }
        }

        if let (Some(k), Some(v)) = (key, content) {
            if USEFUL_META_KEYS.contains(&k.as_str()) && !v.is_empty() {
                match pairs.iter_mut().find(|(existing, _)| *existing == k) {
                    Some(entry) => entry.1 = v,
                    None => pairs.push((k, v)),
                }
            }
        }
    }

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("; ")
}

fn breadcrumbs(html: &str) -> Vec<String> {
    let mut texts: Vec<String> = Vec::new();

    for open in BREADCRUMB_OPEN.captures_iter(html) {
        let (Some(whole), Some(tag)) = (open.get(0), open.get(1)) else {
            continue;
        };
        let rest = &html[whole.end()..];
        let closing = format!("</{}", tag.as_str().to_ascii_lowercase());
        let end = rest.to_ascii_lowercase().find(&closing).unwrap_or(rest.len());
        let text = visible_text(&rest[..end]);
        if !text.is_empty() && !texts.contains(&text) {
            texts.push(text);
        }
    }

    if texts.is_empty() {
        if let Some(nav) = NAV_BREADCRUMB.captures(html).and_then(|c| c.get(1)) {
            let text = visible_text(nav.as_str());
            if !text.is_empty() {
                texts.push(text);
            }
        }
    }

    texts
}

fn first_capture_text(re: &Regex, html: &str) -> String {
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| visible_text(m.as_str()))
        .unwrap_or_default()
}

/// Tags stripped, entities decoded, whitespace collapsed.
fn visible_text(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, " ");
    let decoded = decode_entities(&stripped);
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
