//! Recovery of JSON from free-form model output.
//!
//! Models wrap JSON in markdown fences, prefix it with prose or break it across lines.
//! [`clean_json_response`] tries, in order:
//!
//! 1. the whole (fence stripped) text
//! 2. the outermost `[...]` span
//! 3. the outermost `{...}` span
//! 4. the whole text with line breaks collapsed into spaces
//!
//! and returns the first candidate that parses.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::utils::truncate_text;

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").expect("valid regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n?```\s*$").expect("valid regex"));

/// Strip surrounding whitespace and markdown code fence markers.
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let start = LEADING_FENCE.find(text).map_or(0, |m| m.end());
    let text = &text[start..];
    let end = TRAILING_FENCE.find(text).map_or(text.len(), |m| m.start());
    text[..end].trim()
}

pub fn clean_json_response(response_text: &str) -> Option<Value> {
    let text = strip_code_fences(response_text);
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }
    if let Some(value) = parse_span(text, '[', ']') {
        return Some(value);
    }
    if let Some(value) = parse_span(text, '{', '}') {
        return Some(value);
    }
    match serde_json::from_str(&text.replace(['\n', '\r'], " ")) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(
                "all json parsing attempts failed: {}, text: {}",
                e,
                truncate_text(response_text, 200)
            );
            None
        }
    }
}

fn parse_span(text: &str, open: char, close: char) -> Option<Value> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    let span = &text[start..=end];
    match serde_json::from_str(span) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("candidate {}...{} did not parse: {}", open, close, e);
            None
        }
    }
}
