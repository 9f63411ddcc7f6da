//! Per-call settings snapshot.

use crate::core::config::str_to_bool;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Partial settings update returned by a middleware unit.
pub type SettingsPatch = Map<String, Value>;

/// Copy of the runtime settings taken once per call.
///
/// Owned by a single call: units may merge patches into it during the request
/// phase and the response phase of that same call, and nothing else observes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsSnapshot {
    values: Map<String, Value>,
}

impl SettingsSnapshot {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Boolean lookup with an explicit default for absent keys.
    ///
    /// Strings are parsed leniently (`true`/`1`/`yes`/`on`), numbers are true
    /// when non-zero, and `null` counts as absent.
    pub fn flag(&self, name: &str, default: bool) -> bool {
        match self.values.get(name) {
            None | Some(Value::Null) => default,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => str_to_bool(s),
            Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(default),
            Some(_) => default,
        }
    }

    /// Text lookup. Non-string values are not coerced.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// Text lookup that treats blank strings as unset.
    pub fn non_empty_text(&self, name: &str) -> Option<&str> {
        self.text(name).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Merge a partial update; keys in `patch` overwrite existing values.
    pub fn merge(&mut self, patch: SettingsPatch) {
        for (key, value) in patch {
            self.values.insert(key, value);
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }
}

impl From<Map<String, Value>> for SettingsSnapshot {
    fn from(values: Map<String, Value>) -> Self {
        Self::new(values)
    }
}
