//! Applies operator overrides to outbound requests: system prompt prefix,
//! temperature and max token limits.
//!
//! Overrides come from the call's settings snapshot. Blank values mean "leave
//! the request alone"; values that do not parse are ignored with a warning.

use super::payload::{messages_mut, role};
use super::MiddlewareUnit;
use crate::core::Result;
use crate::settings::SettingsSnapshot;
use serde_json::{json, Value};

pub const SYSTEM_PROMPT_PREFIX: &str = "system_prompt_prefix";
pub const TEMPERATURE_OVERRIDE: &str = "temperature_override";
pub const MAX_TOKENS_LIMIT: &str = "max_tokens_limit";

#[derive(Debug, Default, Clone, Copy)]
pub struct RequestShaping;

impl RequestShaping {
    pub fn new() -> Self {
        Self
    }

    pub fn boxed() -> Box<dyn MiddlewareUnit> {
        Box::new(Self::new())
    }

    fn prefix_system_prompts(payload: &mut Value, prefix: &str) {
        let Some(messages) = messages_mut(payload) else {
            return;
        };
        for message in messages.iter_mut().filter(|m| role(m) == Some("system")) {
            if let Some(Value::String(content)) = message.get_mut("content") {
                *content = format!("{prefix}\n{content}");
            }
        }
    }
}

impl MiddlewareUnit for RequestShaping {
    fn name(&self) -> &'static str {
        "request_shaping"
    }

    fn description(&self) -> &'static str {
        "Applies system prompt prefix, temperature and max token overrides"
    }

    fn process_request(&self, mut payload: Value, settings: &SettingsSnapshot) -> Result<Value> {
        if !payload.is_object() {
            return Ok(payload);
        }

        if let Some(prefix) = settings.text(SYSTEM_PROMPT_PREFIX).filter(|p| !p.is_empty()) {
            Self::prefix_system_prompts(&mut payload, prefix);
        }

        if let Some(raw) = settings.non_empty_text(TEMPERATURE_OVERRIDE) {
            match raw.parse::<f64>() {
                Ok(temperature) if temperature.is_finite() => {
                    payload["temperature"] = json!(temperature);
                }
                _ => {
                    tracing::warn!(unit = self.name(), value = %raw, "Ignoring invalid temperature override");
                }
            }
        }

        if let Some(raw) = settings.non_empty_text(MAX_TOKENS_LIMIT) {
            match raw.parse::<i64>() {
                Ok(limit) => {
                    payload["max_tokens"] = json!(limit);
                }
                Err(_) => {
                    tracing::warn!(unit = self.name(), value = %raw, "Ignoring invalid max tokens limit");
                }
            }
        }

        Ok(payload)
    }
}
