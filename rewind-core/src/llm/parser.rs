//! Response parsing: extract the first balanced JSON object from model
//! output, normalize common defects, validate against the response schema.

use serde_json::Value;
use thiserror::Error;

use crate::llm::response::LlmResponse;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("empty response")]
    Empty,

    #[error("no JSON object found in response")]
    NoJson,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("schema validation failed: {0}")]
    Schema(String),
}

/// Parse raw model text into a validated [`LlmResponse`].
///
/// Tolerates surrounding prose and markdown code fences. Confidence is
/// clamped to [0, 1]; the decision string is lowercased; a missing or
/// malformed `risk_flags` becomes an empty list.
pub fn parse_response(raw: &str) -> Result<LlmResponse, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let json_str = extract_json(trimmed).ok_or(ParseError::NoJson)?;
    let mut value: Value =
        serde_json::from_str(&json_str).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    preprocess(&mut value);

    serde_json::from_value(value).map_err(|e| ParseError::Schema(e.to_string()))
}

/// Find the first JSON object in the text: pure JSON, fenced blocks, or a
/// balanced-brace scan over embedded prose.
fn extract_json(text: &str) -> Option<String> {
    if text.starts_with('{') && text.ends_with('}') {
        return Some(text.to_string());
    }

    if let Some(fenced) = extract_fenced(text) {
        return Some(fenced);
    }

    // Balanced-brace scan. Candidates that fail to parse are skipped and
    // the scan continues.
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut start = None;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start {
                            let candidate = &text[s..=i];
                            if serde_json::from_str::<Value>(candidate).is_ok() {
                                return Some(candidate.to_string());
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_fenced(text: &str) -> Option<String> {
    for marker in ["```json", "```"] {
        if let Some(open) = text.find(marker) {
            let body_start = open + marker.len();
            if let Some(close) = text[body_start..].find("```") {
                let body = text[body_start..body_start + close].trim();
                if body.starts_with('{') && body.ends_with('}') {
                    return Some(body.to_string());
                }
            }
        }
    }
    None
}

/// Normalize the extracted object before schema validation.
fn preprocess(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    if let Some(conf) = obj.get("confidence") {
        let clamped = match conf.as_f64() {
            Some(c) => c.clamp(0.0, 1.0),
            None => 0.5,
        };
        obj.insert("confidence".into(), json_f64(clamped));
    }

    if let Some(decision) = obj.get("decision").and_then(Value::as_str) {
        let normalized = decision.trim().to_lowercase();
        obj.insert("decision".into(), Value::String(normalized));
    }

    match obj.get("risk_flags") {
        Some(Value::Array(_)) => {}
        _ => {
            obj.insert("risk_flags".into(), Value::Array(Vec::new()));
        }
    }

    if let Some(notes) = obj.get("notes") {
        if !notes.is_null() && !notes.is_string() {
            obj.insert("notes".into(), Value::String(notes.to_string()));
        }
    }
}

fn json_f64(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
