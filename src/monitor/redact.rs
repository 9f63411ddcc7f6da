//! Redaction hook applied to payloads before they are stored or broadcast.

use serde_json::Value;
use std::collections::HashSet;

/// Replacement written over redacted values.
pub const MASK: &str = "***";

/// Strips sensitive data from a payload copy owned by the monitor.
pub trait Redactor: Send + Sync {
    fn redact(&self, payload: Value) -> Value;
}

/// Leaves payloads unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityRedactor;

impl Redactor for IdentityRedactor {
    fn redact(&self, payload: Value) -> Value {
        payload
    }
}

/// Masks the values of the listed object keys at any depth.
#[derive(Debug, Clone, Default)]
pub struct FieldRedactor {
    fields: HashSet<String>,
}

impl FieldRedactor {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    fn walk(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if self.fields.contains(key) {
                        *child = Value::String(MASK.to_string());
                    } else {
                        self.walk(child);
                    }
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|item| self.walk(item)),
            _ => {}
        }
    }
}

impl Redactor for FieldRedactor {
    fn redact(&self, mut payload: Value) -> Value {
        if !self.fields.is_empty() {
            self.walk(&mut payload);
        }
        payload
    }
}
