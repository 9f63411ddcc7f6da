//! Middleware pipeline for request/response payload transformation.
//!
//! A pipeline is an ordered, fixed list of [`MiddlewareUnit`]s built once at
//! startup from an explicit registry of constructors. Every call runs the
//! request phase before forwarding upstream and the response phase on the
//! reply (or on every chunk of a streamed reply).
//!
//! ```text
//! Client payload
//!     ↓
//! [unit 1: process_request] → merge update_settings into snapshot
//!     ↓
//! [unit N: process_request]
//!     ↓
//! Upstream client
//!     ↓
//! [unit 1: process_response] → merge update_settings into snapshot
//!     ↓
//! [unit N: process_response]
//!     ↓
//! Client response
//! ```
//!
//! Each unit contributes one boolean setting, `use_<name>`, defaulting to
//! true: a unit whose key is absent from the snapshot is enabled. Enablement
//! is checked per unit per phase, so a unit switched off by an earlier unit's
//! `update_settings` is skipped from then on.
//!
//! A unit error aborts the pipeline for that call. There is no isolation
//! between units and no rollback of earlier transformations.

pub mod content_filter;
pub mod payload;
pub mod persona;
pub mod request_logging;
pub mod request_shaping;

pub use content_filter::ContentFilter;
pub use persona::Persona;
pub use request_logging::RequestLogging;
pub use request_shaping::RequestShaping;

use crate::core::error::Phase;
use crate::core::metrics::get_metrics;
use crate::core::{AppError, Result};
use crate::settings::{Setting, SettingsPatch, SettingsSnapshot};
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// Middleware Unit Trait
// ============================================================================

/// A named, independently enablable payload transformation.
///
/// Units must be stateless across calls: anything a unit needs to remember
/// within a call goes through the settings snapshot via [`update_settings`].
/// Given the same payload and snapshot a unit must produce the same output.
///
/// [`update_settings`]: MiddlewareUnit::update_settings
pub trait MiddlewareUnit: Send + Sync {
    /// Unit name; also forms the `use_<name>` setting.
    fn name(&self) -> &'static str;

    /// Human-readable description shown alongside the setting.
    fn description(&self) -> &'static str;

    /// Name of the boolean setting that toggles this unit.
    fn setting_name(&self) -> String {
        format!("use_{}", self.name())
    }

    /// Enabled unless the snapshot explicitly says otherwise.
    fn is_enabled(&self, settings: &SettingsSnapshot) -> bool {
        settings.flag(&self.setting_name(), true)
    }

    /// Transform the outbound request payload.
    fn process_request(&self, payload: Value, _settings: &SettingsSnapshot) -> Result<Value> {
        Ok(payload)
    }

    /// Transform a response payload or a single stream chunk.
    fn process_response(&self, payload: Value, _settings: &SettingsSnapshot) -> Result<Value> {
        Ok(payload)
    }

    /// Optional settings patch merged into the call's snapshot after this
    /// unit runs in either phase.
    fn update_settings(&self, _settings: &SettingsSnapshot) -> Option<SettingsPatch> {
        None
    }
}

// ============================================================================
// Unit Registry
// ============================================================================

/// Constructor for a registered unit.
pub type UnitConstructor = fn() -> Box<dyn MiddlewareUnit>;

/// Built-in units in execution order.
pub const DEFAULT_UNITS: &[UnitConstructor] = &[
    ContentFilter::boxed,
    Persona::boxed,
    RequestLogging::boxed,
    RequestShaping::boxed,
];

/// Description of a registered unit, as exposed by the settings API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitInfo {
    pub name: String,
    pub description: String,
    pub setting_name: String,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Ordered chain of middleware units.
pub struct MiddlewarePipeline {
    units: Vec<Box<dyn MiddlewareUnit>>,
}

impl MiddlewarePipeline {
    /// Create a pipeline from already constructed units, kept in the given order.
    pub fn new(units: Vec<Box<dyn MiddlewareUnit>>) -> Self {
        Self { units }
    }

    /// Build a pipeline by invoking each constructor in order.
    pub fn from_registry(registry: &[UnitConstructor]) -> Self {
        Self::new(registry.iter().map(|construct| construct()).collect())
    }

    /// Pipeline with the built-in units.
    pub fn with_default_units() -> Self {
        Self::from_registry(DEFAULT_UNITS)
    }

    /// Pipeline with no units; both phases are identity.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Unit names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.units.iter().map(|u| u.name()).collect()
    }

    pub fn unit_info(&self) -> Vec<UnitInfo> {
        self.units
            .iter()
            .map(|u| UnitInfo {
                name: u.name().to_string(),
                description: u.description().to_string(),
                setting_name: u.setting_name(),
            })
            .collect()
    }

    /// The `use_<name>` toggles contributed by the registered units.
    pub fn setting_schema(&self) -> Vec<Setting> {
        self.units
            .iter()
            .map(|u| {
                Setting::boolean(
                    &u.setting_name(),
                    true,
                    &format!("Enable {}", u.description()),
                )
            })
            .collect()
    }

    /// Run the request phase over `payload`, merging settings patches into
    /// `settings` as units run.
    pub fn process_request(&self, payload: Value, settings: &mut SettingsSnapshot) -> Result<Value> {
        self.run_phase(Phase::Request, payload, settings)
    }

    /// Run the response phase over `payload` (a full response or one chunk).
    pub fn process_response(
        &self,
        payload: Value,
        settings: &mut SettingsSnapshot,
    ) -> Result<Value> {
        self.run_phase(Phase::Response, payload, settings)
    }

    fn run_phase(
        &self,
        phase: Phase,
        mut payload: Value,
        settings: &mut SettingsSnapshot,
    ) -> Result<Value> {
        for unit in &self.units {
            if !unit.is_enabled(settings) {
                tracing::trace!(unit = unit.name(), %phase, "Unit disabled, skipping");
                continue;
            }

            let result = match phase {
                Phase::Request => unit.process_request(payload, settings),
                Phase::Response => unit.process_response(payload, settings),
            };

            payload = result.map_err(|e| {
                get_metrics()
                    .middleware_failures
                    .with_label_values(&[unit.name()])
                    .inc();
                tracing::warn!(unit = unit.name(), %phase, error = %e, "Middleware unit failed");
                into_middleware_failure(unit.name(), phase, e)
            })?;

            if let Some(patch) = unit.update_settings(settings) {
                tracing::debug!(unit = unit.name(), keys = ?patch.keys().collect::<Vec<_>>(), "Merging settings patch");
                settings.merge(patch);
            }
        }
        Ok(payload)
    }
}

impl Default for MiddlewarePipeline {
    fn default() -> Self {
        Self::with_default_units()
    }
}

fn into_middleware_failure(unit: &str, phase: Phase, err: AppError) -> AppError {
    match err {
        failure @ AppError::MiddlewareFailure { .. } => failure,
        other => AppError::MiddlewareFailure {
            unit: unit.to_string(),
            phase,
            message: other.to_string(),
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    /// Appends its tag to `trace` in both phases.
    struct Tagger(&'static str);

    impl MiddlewareUnit for Tagger {
        fn name(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> &'static str {
            "appends a tag"
        }

        fn process_request(&self, mut payload: Value, _: &SettingsSnapshot) -> Result<Value> {
            push_tag(&mut payload, self.0);
            Ok(payload)
        }

        fn process_response(&self, mut payload: Value, _: &SettingsSnapshot) -> Result<Value> {
            push_tag(&mut payload, self.0);
            Ok(payload)
        }
    }

    fn push_tag(payload: &mut Value, tag: &str) {
        if let Some(trace) = payload.get_mut("trace").and_then(Value::as_array_mut) {
            trace.push(json!(tag));
        }
    }

    /// Switches another unit off for the rest of the call.
    struct Disabler {
        target: &'static str,
    }

    impl MiddlewareUnit for Disabler {
        fn name(&self) -> &'static str {
            "disabler"
        }

        fn description(&self) -> &'static str {
            "turns another unit off"
        }

        fn update_settings(&self, _: &SettingsSnapshot) -> Option<SettingsPatch> {
            let mut patch = SettingsPatch::new();
            patch.insert(format!("use_{}", self.target), json!(false));
            Some(patch)
        }
    }

    struct Failing;

    impl MiddlewareUnit for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn description(&self) -> &'static str {
            "always fails"
        }

        fn process_request(&self, _: Value, _: &SettingsSnapshot) -> Result<Value> {
            Err(AppError::Internal("unit exploded".to_string()))
        }
    }

    fn traced() -> Value {
        json!({"trace": []})
    }

    #[test]
    fn test_units_run_in_registration_order() {
        let pipeline = MiddlewarePipeline::new(vec![
            Box::new(Tagger("a")),
            Box::new(Tagger("b")),
            Box::new(Tagger("c")),
        ]);
        let mut settings = SettingsSnapshot::default();

        let out = pipeline.process_request(traced(), &mut settings).unwrap();
        assert_eq!(out["trace"], json!(["a", "b", "c"]));

        let out = pipeline.process_response(traced(), &mut settings).unwrap();
        assert_eq!(out["trace"], json!(["a", "b", "c"]));
    }

    #[test]
    fn test_disabled_unit_skipped_in_both_phases() {
        let pipeline =
            MiddlewarePipeline::new(vec![Box::new(Tagger("a")), Box::new(Tagger("b"))]);
        let mut settings = SettingsSnapshot::default();
        settings.set("use_a", json!(false));

        let out = pipeline.process_request(traced(), &mut settings).unwrap();
        assert_eq!(out["trace"], json!(["b"]));
        let out = pipeline.process_response(traced(), &mut settings).unwrap();
        assert_eq!(out["trace"], json!(["b"]));
    }

    #[test]
    fn test_settings_patch_visible_to_later_units_and_response_phase() {
        let pipeline = MiddlewarePipeline::new(vec![
            Box::new(Tagger("early")),
            Box::new(Disabler { target: "early" }),
            Box::new(Tagger("late")),
            Box::new(Disabler { target: "late" }),
        ]);
        let mut settings = SettingsSnapshot::default();

        let out = pipeline.process_request(traced(), &mut settings).unwrap();
        // Both taggers ran before their disabler
        assert_eq!(out["trace"], json!(["early", "late"]));
        assert!(!settings.flag("use_early", true));
        assert!(!settings.flag("use_late", true));

        let out = pipeline.process_response(traced(), &mut settings).unwrap();
        assert_eq!(out["trace"], json!([]));
    }

    #[test]
    fn test_patch_skips_later_unit_in_same_phase() {
        let pipeline = MiddlewarePipeline::new(vec![
            Box::new(Disabler { target: "b" }),
            Box::new(Tagger("b")),
        ]);
        let mut settings = SettingsSnapshot::default();
        let out = pipeline.process_request(traced(), &mut settings).unwrap();
        assert_eq!(out["trace"], json!([]));
    }

    #[test]
    fn test_failure_aborts_pipeline() {
        let pipeline = MiddlewarePipeline::new(vec![
            Box::new(Tagger("a")),
            Box::new(Failing),
            Box::new(Tagger("c")),
        ]);
        let mut settings = SettingsSnapshot::default();

        let err = pipeline.process_request(traced(), &mut settings).unwrap_err();
        assert_matches!(
            err,
            AppError::MiddlewareFailure { ref unit, phase: Phase::Request, ref message }
                if unit == "failing" && message.contains("unit exploded")
        );
    }

    #[test]
    fn test_disabled_failing_unit_is_not_invoked() {
        let pipeline = MiddlewarePipeline::new(vec![Box::new(Failing), Box::new(Tagger("a"))]);
        let mut settings = SettingsSnapshot::default();
        settings.set("use_failing", json!(false));

        let out = pipeline.process_request(traced(), &mut settings).unwrap();
        assert_eq!(out["trace"], json!(["a"]));
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let pipeline = MiddlewarePipeline::empty();
        let mut settings = SettingsSnapshot::default();
        let payload = json!({"model": "llama3.1", "messages": []});
        let out = pipeline.process_request(payload.clone(), &mut settings).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_default_registry_order() {
        let pipeline = MiddlewarePipeline::with_default_units();
        assert_eq!(
            pipeline.names(),
            vec!["content_filter", "persona", "request_logging", "request_shaping"]
        );
    }

    #[test]
    fn test_setting_schema_and_unit_info() {
        let pipeline = MiddlewarePipeline::with_default_units();

        let schema = pipeline.setting_schema();
        assert_eq!(schema.len(), pipeline.len());
        assert!(schema.iter().all(|s| s.name.starts_with("use_")));
        assert!(schema.iter().all(|s| s.default == json!(true)));

        let info = pipeline.unit_info();
        assert_eq!(info[1].name, "persona");
        assert_eq!(info[1].setting_name, "use_persona");
    }

    #[test]
    fn test_default_pipeline_deterministic() {
        let pipeline = MiddlewarePipeline::with_default_units();
        let payload = json!({
            "model": "llama3.1",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "How do I HACK a malware sample?"}
            ]
        });

        let mut first_settings = SettingsSnapshot::default();
        let mut second_settings = SettingsSnapshot::default();
        let first = pipeline
            .process_request(payload.clone(), &mut first_settings)
            .unwrap();
        let second = pipeline.process_request(payload, &mut second_settings).unwrap();

        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }
}
