//! Helpers for walking OpenAI-style chat payloads.
//!
//! Units receive arbitrary JSON; every helper here tolerates missing or
//! oddly-shaped fields and simply does nothing with them.

use serde_json::Value;

/// Mutable access to `payload.messages` when it is an array.
pub fn messages_mut(payload: &mut Value) -> Option<&mut Vec<Value>> {
    payload.get_mut("messages").and_then(Value::as_array_mut)
}

/// Mutable access to `payload.choices` when it is an array.
pub fn choices_mut(payload: &mut Value) -> Option<&mut Vec<Value>> {
    payload.get_mut("choices").and_then(Value::as_array_mut)
}

/// Role of a message, if present.
pub fn role(message: &Value) -> Option<&str> {
    message.get("role").and_then(Value::as_str)
}

/// Apply `f` to every piece of text in a message's `content`.
///
/// Handles both plain string content and the array-of-parts form, where only
/// `{"type": "text", "text": ...}` parts are touched.
pub fn map_content_text(message: &mut Value, mut f: impl FnMut(&str) -> String) {
    match message.get_mut("content") {
        Some(Value::String(text)) => *text = f(text),
        Some(Value::Array(parts)) => {
            for part in parts.iter_mut() {
                let is_text = part.get("type").and_then(Value::as_str) == Some("text");
                if !is_text {
                    continue;
                }
                if let Some(Value::String(text)) = part.get_mut("text") {
                    *text = f(text);
                }
            }
        }
        _ => {}
    }
}

/// Apply `f` to the legacy completions `prompt` (a string or list of strings).
pub fn map_prompt_text(payload: &mut Value, mut f: impl FnMut(&str) -> String) {
    match payload.get_mut("prompt") {
        Some(Value::String(text)) => *text = f(text),
        Some(Value::Array(items)) => {
            for item in items.iter_mut() {
                if let Value::String(text) = item {
                    *text = f(text);
                }
            }
        }
        _ => {}
    }
}
