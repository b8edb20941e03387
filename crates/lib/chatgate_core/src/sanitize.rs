//! Chat request sanitization.
//!
//! Turns an untrusted JSON body into a bounded upstream payload. Out-of-range
//! numbers are clamped and oversized content is truncated; only a missing
//! message list or a disallowed model is refused.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::ChatLimits;

pub const MIN_MAX_TOKENS: i64 = 50;
pub const MAX_MAX_TOKENS: i64 = 2000;
pub const MIN_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 2.0;
pub const DEFAULT_TEMPERATURE: f64 = 0.2;

/// Sanitization failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("{0}")]
    BadRequest(&'static str),

    #[error("Model '{0}' is not allowed")]
    ModelNotAllowed(String),
}

/// Roles accepted from callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// The payload forwarded upstream, in the upstream API's field names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizedChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: i64,
}

/// Parse a raw request body; anything but a JSON object is a bad request.
pub fn parse_body(body: &str) -> Result<Value, SanitizeError> {
    match serde_json::from_str::<Value>(body) {
        Ok(value @ Value::Object(_)) => Ok(value),
        _ => Err(SanitizeError::BadRequest("Invalid JSON")),
    }
}

/// The requested model, defaulted and checked against the allow-list.
pub fn resolve_model(raw: &Value, limits: &ChatLimits) -> Result<String, SanitizeError> {
    let model = raw
        .get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(&limits.default_model)
        .to_string();

    if !limits.allowed_models.is_empty() {
        let wanted = model.to_lowercase();
        if !limits
            .allowed_models
            .iter()
            .any(|m| m.to_lowercase() == wanted)
        {
            return Err(SanitizeError::ModelNotAllowed(model));
        }
    }
    Ok(model)
}

/// Normalize and bound a parsed chat request.
pub fn sanitize(raw: &Value, limits: &ChatLimits) -> Result<SanitizedChatRequest, SanitizeError> {
    let model = resolve_model(raw, limits)?;

    let entries: &[Value] = match raw.get("messages") {
        None | Some(Value::Null) => &[],
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => return Err(SanitizeError::BadRequest("messages must be an array")),
    };

    let messages: Vec<ChatMessage> = entries
        .iter()
        .take(limits.max_messages)
        .filter_map(|entry| sanitize_message(entry, limits.max_message_chars))
        .collect();
    if messages.is_empty() {
        return Err(SanitizeError::BadRequest("messages is required"));
    }

    Ok(SanitizedChatRequest {
        model,
        messages,
        temperature: coerce_temperature(raw.get("temperature")),
        max_tokens: coerce_max_tokens(raw.get("max_tokens"), limits.default_max_tokens),
    })
}

fn sanitize_message(entry: &Value, max_chars: usize) -> Option<ChatMessage> {
    let obj = entry.as_object()?;
    let role = obj.get("role").and_then(Value::as_str).and_then(Role::parse)?;
    let content = coerce_content(obj.get("content"));
    if content.is_empty() {
        return None;
    }
    Some(ChatMessage {
        role,
        content: truncate_chars(content, max_chars),
    })
}

fn coerce_content(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn truncate_chars(content: String, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => content[..cut].to_string(),
        None => content,
    }
}

fn coerce_max_tokens(value: Option<&Value>, default: i64) -> i64 {
    let n = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(Value::Bool(b)) => Some(i64::from(*b)),
        _ => None,
    };
    n.unwrap_or(default).clamp(MIN_MAX_TOKENS, MAX_MAX_TOKENS)
}

fn coerce_temperature(value: Option<&Value>) -> f64 {
    let t = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    t.filter(|t: &f64| !t.is_nan())
        .unwrap_or(DEFAULT_TEMPERATURE)
        .clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}
