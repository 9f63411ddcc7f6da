//! Runtime settings: schema, per-call snapshots and the settings provider.
//!
//! Settings are the operator-tunable knobs consulted by middleware units
//! (`use_<unit>` toggles, overrides). The provider hands out a fresh
//! [`SettingsSnapshot`] for every call.

pub mod snapshot;

pub use snapshot::{SettingsPatch, SettingsSnapshot};

use crate::core::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;

/// Kind of value a setting holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    Text,
    Boolean,
    Dropdown,
}

/// Static description of one setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SettingKind,
    #[serde(rename = "default_value")]
    pub default: Value,
    pub description: String,
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

impl Setting {
    pub fn text(name: &str, default: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SettingKind::Text,
            default: json!(default),
            description: description.to_string(),
            options: None,
        }
    }

    pub fn boolean(name: &str, default: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SettingKind::Boolean,
            default: json!(default),
            description: description.to_string(),
            options: None,
        }
    }

    pub fn dropdown(name: &str, default: &str, description: &str, options: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: SettingKind::Dropdown,
            default: json!(default),
            description: description.to_string(),
            options: Some(options.iter().map(|o| o.to_string()).collect()),
        }
    }

    /// Check that `value` fits this setting's kind.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        match self.kind {
            SettingKind::Boolean if value.is_boolean() => Ok(()),
            SettingKind::Boolean => Err(format!("'{}' expects a boolean", self.name)),
            SettingKind::Text if value.is_string() => Ok(()),
            SettingKind::Text => Err(format!("'{}' expects a string", self.name)),
            SettingKind::Dropdown => {
                let options = self.options.as_deref().unwrap_or_default();
                match value.as_str() {
                    Some(v) if options.iter().any(|o| o == v) => Ok(()),
                    _ => Err(format!(
                        "'{}' expects one of: {}",
                        self.name,
                        options.join(", ")
                    )),
                }
            }
        }
    }
}

/// Settings owned by the relay itself, independent of registered units.
pub fn core_settings() -> Vec<Setting> {
    vec![
        Setting::text(
            "max_tokens_limit",
            "2048",
            "Maximum tokens allowed (Ollama default)",
        ),
        Setting::text(
            "temperature_override",
            "",
            "Override temperature (leave empty to use request value)",
        ),
        Setting::text(
            "system_prompt_prefix",
            "",
            "Prefix to add to system prompts",
        ),
        Setting::dropdown(
            "response_format",
            "json",
            "Response format",
            &["json", "text", "markdown"],
        ),
    ]
}

/// Source of per-call settings snapshots.
pub trait SettingsProvider: Send + Sync {
    /// Current value of every setting, copied for one call.
    fn get_all(&self) -> SettingsSnapshot;
}

/// In-memory settings provider validated against a schema.
pub struct InMemorySettings {
    schema: Vec<Setting>,
    values: RwLock<Map<String, Value>>,
}

impl InMemorySettings {
    /// Seed values from schema defaults, then apply `overrides`.
    ///
    /// Overrides naming unknown settings or carrying the wrong kind of value
    /// are skipped with a warning.
    pub fn new(schema: Vec<Setting>, overrides: &HashMap<String, Value>) -> Self {
        let mut values: Map<String, Value> = schema
            .iter()
            .map(|s| (s.name.clone(), s.default.clone()))
            .collect();

        for (name, value) in overrides {
            match schema.iter().find(|s| &s.name == name) {
                Some(setting) => match setting.validate(value) {
                    Ok(()) => {
                        values.insert(name.clone(), value.clone());
                    }
                    Err(reason) => {
                        tracing::warn!(setting = %name, reason = %reason, "Ignoring invalid setting override");
                    }
                },
                None => {
                    tracing::warn!(setting = %name, "Ignoring override for unknown setting");
                }
            }
        }

        Self {
            schema,
            values: RwLock::new(values),
        }
    }

    pub fn schema(&self) -> &[Setting] {
        &self.schema
    }

    /// Validate and apply a partial update. Either every key is applied or none.
    pub fn update(&self, patch: SettingsPatch) -> Result<SettingsSnapshot> {
        for (name, value) in &patch {
            let setting = self
                .schema
                .iter()
                .find(|s| &s.name == name)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown setting: {}", name)))?;
            setting.validate(value).map_err(AppError::BadRequest)?;
        }

        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        for (name, value) in patch {
            values.insert(name, value);
        }
        tracing::info!("Settings updated");
        Ok(SettingsSnapshot::new(values.clone()))
    }
}

impl SettingsProvider for InMemorySettings {
    fn get_all(&self) -> SettingsSnapshot {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        SettingsSnapshot::new(values.clone())
    }
}
