//! Pirate persona: instructs the model on the way out, marks replies on the
//! way back.

use super::payload::{choices_mut, messages_mut, role};
use super::MiddlewareUnit;
use crate::core::Result;
use crate::settings::SettingsSnapshot;
use serde_json::Value;

/// Instruction prepended to the last user message.
pub const INSTRUCTION_PREFIX: &str = "Respond like a pirate. ";

/// Marker appended to assistant content in responses.
pub const RESPONSE_MARKER: &str = "\n\n[Told to respond like a pirate]";

#[derive(Debug, Default, Clone, Copy)]
pub struct Persona;

impl Persona {
    pub fn new() -> Self {
        Self
    }

    pub fn boxed() -> Box<dyn MiddlewareUnit> {
        Box::new(Self::new())
    }

    fn prefix_message(message: &mut Value) {
        let Some(obj) = message.as_object_mut() else {
            return;
        };
        match obj.get_mut("content") {
            Some(Value::String(text)) => {
                *text = format!("{INSTRUCTION_PREFIX}{text}");
            }
            Some(Value::Array(parts)) => {
                let first_text = parts
                    .iter_mut()
                    .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                    .find_map(|p| match p.get_mut("text") {
                        Some(Value::String(text)) => Some(text),
                        _ => None,
                    });
                if let Some(text) = first_text {
                    *text = format!("{INSTRUCTION_PREFIX}{text}");
                }
            }
            _ => {
                obj.insert(
                    "content".to_string(),
                    Value::String(INSTRUCTION_PREFIX.to_string()),
                );
            }
        }
    }

    fn append_marker(target: &mut Value) {
        let Some(obj) = target.as_object_mut() else {
            return;
        };
        match obj.get_mut("content") {
            Some(Value::String(text)) => text.push_str(RESPONSE_MARKER),
            Some(Value::Null) | None => {
                obj.insert(
                    "content".to_string(),
                    Value::String(RESPONSE_MARKER.to_string()),
                );
            }
            Some(_) => {}
        }
    }
}

impl MiddlewareUnit for Persona {
    fn name(&self) -> &'static str {
        "persona"
    }

    fn description(&self) -> &'static str {
        "Asks the model to respond like a pirate"
    }

    fn process_request(&self, mut payload: Value, _settings: &SettingsSnapshot) -> Result<Value> {
        if let Some(messages) = messages_mut(&mut payload) {
            if let Some(last_user) = messages.iter_mut().rev().find(|m| role(m) == Some("user")) {
                Self::prefix_message(last_user);
            }
        }
        Ok(payload)
    }

    fn process_response(&self, mut payload: Value, _settings: &SettingsSnapshot) -> Result<Value> {
        let Some(choices) = choices_mut(&mut payload) else {
            return Ok(payload);
        };

        for choice in choices.iter_mut() {
            let finished = choice
                .get("finish_reason")
                .map(|r| !r.is_null())
                .unwrap_or(false);

            if let Some(message) = choice.get_mut("message").filter(|m| m.is_object()) {
                if let Some(Value::String(text)) = message.get_mut("content") {
                    text.push_str(RESPONSE_MARKER);
                }
                continue;
            }

            // Stream chunk: mark the final delta only
            if finished {
                if let Some(delta) = choice.get_mut("delta") {
                    Self::append_marker(delta);
                }
            }
        }
        Ok(payload)
    }
}
