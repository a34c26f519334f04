//! Pulls the structured result out of free-text AI responses.
//!
//! Completion responses are not schema-checked upstream: the object may be
//! wrapped in prose or a code fence, truncated, or missing entirely. Every
//! response goes through [`extract_object`] and callers branch on the error.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

pub type JsonObject = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no JSON object found in response")]
    NotFound,
    #[error("malformed JSON object: {0}")]
    Malformed(String),
}

/// Locates the first top-level balanced `{...}` region and parses it.
pub fn extract_object(text: &str) -> Result<JsonObject, ParseError> {
    let start = text.find('{').ok_or(ParseError::NotFound)?;
    let region = balanced_region(&text[start..])
        .ok_or_else(|| ParseError::Malformed("unbalanced braces".to_string()))?;

    match serde_json::from_str::<Value>(region) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ParseError::Malformed("not an object".to_string())),
        Err(e) => Err(ParseError::Malformed(e.to_string())),
    }
}

/// Extracts the object and decodes it into `T`. A shape mismatch is reported
/// as `Malformed`.
pub fn extract_as<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let object = extract_object(text)?;
    serde_json::from_value(Value::Object(object)).map_err(|e| ParseError::Malformed(e.to_string()))
}

// `text` starts with '{'. Braces inside string literals do not count.
fn balanced_region(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
