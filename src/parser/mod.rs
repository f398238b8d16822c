//! Response parser for structured model output.
//!
//! Parsing is a pure function of `(text, schema)`:
//! 1. extract a JSON object or array from the raw text
//! 2. decode it
//! 3. validate and coerce it against a [`Schema`], then deserialize into `T`
//!
//! The bounded LLM-assisted repair lives in [`repair`] and only calls back
//! into [`parse`]; no retry logic lives here.

pub mod repair;
pub mod schema;

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use repair::{parse_with_repair, ParseFailure, Parsed, RepairOptions};
pub use schema::{validate_value, Field, Schema};

/// Why a parse attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("No JSON object or array found in response")]
    NoJson,

    #[error("Invalid JSON: {0}")]
    Json(String),

    #[error("Schema validation failed: {0}")]
    Schema(String),

    #[error("Unexpected structure: {0}")]
    Deserialize(String),
}

fn fenced_block() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
    })
}

/// Find the JSON payload in free text.
///
/// Prefers the first fenced code block whose contents start like JSON;
/// otherwise the first bracket-balanced `{...}` or `[...]` substring, falling
/// back to the span up to the last matching closer when brackets never balance.
pub fn extract_json(text: &str) -> Option<&str> {
    for captures in fenced_block().captures_iter(text) {
        if let Some(body) = captures.get(1) {
            let body = body.as_str().trim();
            if body.starts_with('{') || body.starts_with('[') {
                return Some(body);
            }
        }
    }

    let start = text.find(['{', '['])?;
    let open = text[start..].chars().next()?;
    let close = if open == '{' { '}' } else { ']' };

    if let Some(end) = balanced_end(&text[start..]) {
        return Some(&text[start..start + end]);
    }

    let last = text.rfind(close)?;
    (last > start).then(|| &text[start..=last])
}

/// Byte length of the balanced bracket expression at the start of `s`,
/// skipping brackets inside string literals.
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract, decode, validate and deserialize in one pure step.
pub fn parse<T: DeserializeOwned>(text: &str, schema: &Schema) -> Result<T, ParseError> {
    let json = extract_json(text).ok_or(ParseError::NoJson)?;
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| ParseError::Json(e.to_string()))?;
    let coerced = validate_value(&value, schema).map_err(ParseError::Schema)?;
    serde_json::from_value(coerced).map_err(|e| ParseError::Deserialize(e.to_string()))
}
