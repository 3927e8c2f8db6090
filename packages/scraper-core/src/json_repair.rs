//! Best-effort recovery of JSON objects from free-text model output.
//!
//! [`parse`] runs an ordered fallback chain and returns the first stage that
//! yields a JSON object:
//!
//! 1. strict parse of the whole text
//! 2. the largest balanced top-level `{...}` span, scanned with string
//!    literals treated as opaque
//! 3. truncation repair: close a dangling string, then append the missing
//!    `]` and `}` characters
//! 4. lenient sanitation: strip code fences, clamp to the outer braces, drop
//!    trailing commas, quote bare keys, and swap single quotes when the text is
//!    overwhelmingly single-quoted
//!
//! Every stage is a pure function. Total failure is `None`, never an error.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// A parsed JSON object.
pub type JsonObject = Map<String, Value>;

/// Swap `'` for `"` only below this many double quotes...
pub const DOUBLE_QUOTE_THRESHOLD: usize = 2;
/// ...and above this many single quotes.
pub const SINGLE_QUOTE_THRESHOLD: usize = 2;

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```(?:json)?\s*").expect("valid regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```$").expect("valid regex"));
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([\]}])").expect("valid regex"));
static BARE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*):").expect("valid regex")
});

/// Recover a JSON object from `text`, or `None` if every stage fails.
pub fn parse(text: &str) -> Option<JsonObject> {
    if let Some(obj) = parse_strict(text) {
        return Some(obj);
    }
    debug!(length = text.len(), "strict JSON parse failed, trying repair");

    if let Some(obj) = largest_balanced_object(text).and_then(parse_strict) {
        debug!("recovered JSON from balanced span");
        return Some(obj);
    }

    if let Some(obj) = close_truncated(text).and_then(|s| parse_strict(&s)) {
        debug!("recovered JSON via truncation repair");
        return Some(obj);
    }

    let sanitized = sanitize(text);
    let obj = parse_strict(&sanitized);
    if obj.is_some() {
        debug!("recovered JSON via sanitation");
    }
    obj
}

/// Stage 1: the whole text must be a JSON object.
pub fn parse_strict(text: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Walks characters while tracking whether we are inside a string literal.
struct Scanner {
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    fn new() -> Self {
        Self {
            in_string: false,
            escaped: false,
        }
    }

    /// Feed one char; returns `true` if it is structural (outside any string).
    fn feed(&mut self, ch: char) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' {
                self.escaped = true;
            } else if ch == '"' {
                self.in_string = false;
            }
            return false;
        }
        if ch == '"' {
            self.in_string = true;
            return false;
        }
        true
    }
}

/// Stage 2: span from the first top-level `{` to the last brace that brings
/// depth back to zero.
pub fn largest_balanced_object(text: &str) -> Option<&str> {
    let mut scanner = Scanner::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut best_end = None;

    for (i, ch) in text.char_indices() {
        if !scanner.feed(ch) {
            continue;
        }
        match ch {
            '{' => {
                if depth == 0 && start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 && start.is_some() {
                    best_end = Some(i);
                }
            }
            _ => {}
        }
    }

    match (start, best_end) {
        (Some(s), Some(e)) if e > s => Some(&text[s..=e]),
        _ => None,
    }
}

/// Stage 3: append whatever closes a payload cut off mid-stream.
///
/// Returns `None` when the text has no JSON punctuation at all or when
/// nothing needs closing.
pub fn close_truncated(text: &str) -> Option<String> {
    let s = text.trim_end();
    if !s.contains(['{', '[', '"']) {
        return None;
    }

    let mut scanner = Scanner::new();
    let mut open_braces = 0usize;
    let mut open_brackets = 0usize;
    for ch in s.chars() {
        if !scanner.feed(ch) {
            continue;
        }
        match ch {
            '{' => open_braces += 1,
            '}' => open_braces = open_braces.saturating_sub(1),
            '[' => open_brackets += 1,
            ']' => open_brackets = open_brackets.saturating_sub(1),
            _ => {}
        }
    }

    let mut tail = String::new();
    if scanner.in_string {
        if scanner.escaped {
            // A lone trailing backslash would escape the closing quote.
            tail.push('\\');
        }
        tail.push('"');
    }
    tail.extend(std::iter::repeat(']').take(open_brackets));
    tail.extend(std::iter::repeat('}').take(open_braces));

    if tail.is_empty() {
        return None;
    }
    Some(format!("{s}{tail}"))
}

/// Stage 4: lenient cleanup of common formatting slips.
pub fn sanitize(text: &str) -> String {
    let mut cleaned = text.trim().to_string();

    if cleaned.starts_with("```") {
        cleaned = LEADING_FENCE.replace(&cleaned, "").into_owned();
    }
    if cleaned.ends_with("```") {
        cleaned = TRAILING_FENCE.replace(&cleaned, "").into_owned();
    }

    if let (Some(first), Some(last)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if first < last {
            cleaned = cleaned[first..=last].to_string();
        }
    }

    cleaned = TRAILING_COMMA.replace_all(&cleaned, "$1").into_owned();
    cleaned = BARE_KEY.replace_all(&cleaned, r#"${1}"${2}"${3}:"#).into_owned();

    let doubles = cleaned.matches('"').count();
    let singles = cleaned.matches('\'').count();
    if doubles < DOUBLE_QUOTE_THRESHOLD && singles > SINGLE_QUOTE_THRESHOLD {
        cleaned = cleaned.replace('\'', "\"");
    }

    cleaned
}
