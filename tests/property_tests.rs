//! Property-based tests for the relay.
//!
//! These tests use proptest to check properties that should hold for all
//! inputs: call store ordering and bounds, pipeline determinism and unit
//! enablement.

use llm_relay::{
    monitor::{CallRecord, CallStatus, CallStore},
    pipeline::{MiddlewarePipeline, DEFAULT_UNITS},
    settings::SettingsSnapshot,
};
use proptest::prelude::*;
use serde_json::{json, Value};

fn record(id: String) -> CallRecord {
    CallRecord::pending(
        id,
        "127.0.0.1".to_string(),
        "POST".to_string(),
        "/v1/chat/completions".to_string(),
        json!({}),
        json!({}),
    )
}

/// Generate a chat message
fn message_strategy() -> impl Strategy<Value = Value> {
    (
        prop_oneof![Just("system"), Just("user"), Just("assistant")],
        "[a-zA-Z ]{0,40}",
    )
        .prop_map(|(role, content)| json!({"role": role, "content": content}))
}

/// Generate a chat payload
fn payload_strategy() -> impl Strategy<Value = Value> {
    prop::collection::vec(message_strategy(), 0..6)
        .prop_map(|messages| json!({"model": "llama3.1", "messages": messages}))
}

/// Generate settings with random unit toggles
fn settings_strategy() -> impl Strategy<Value = SettingsSnapshot> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(a, b, c, d)| {
        let mut settings = SettingsSnapshot::default();
        settings.set("use_content_filter", json!(a));
        settings.set("use_persona", json!(b));
        settings.set("use_request_logging", json!(c));
        settings.set("use_request_shaping", json!(d));
        settings
    })
}

proptest! {
    /// Property: the store is most-recent-first and never exceeds capacity
    #[test]
    fn prop_store_ordering_and_bound(capacity in 1usize..20, inserts in 0usize..100) {
        let mut store = CallStore::new(capacity);
        for i in 0..inserts {
            store.insert(record(i.to_string()));
        }

        let ids: Vec<usize> = store
            .iter_recent()
            .map(|r| r.id.parse().unwrap())
            .collect();

        prop_assert!(ids.len() <= capacity);
        prop_assert_eq!(ids.len(), inserts.min(capacity));
        let expected: Vec<usize> = (0..inserts).rev().take(capacity).collect();
        prop_assert_eq!(ids, expected);
    }

    /// Property: every retained record is reachable by id, every evicted one is not
    #[test]
    fn prop_store_index_consistent(capacity in 1usize..20, inserts in 0usize..100) {
        let mut store = CallStore::new(capacity);
        for i in 0..inserts {
            store.insert(record(i.to_string()));
        }
        for i in 0..inserts {
            let retained = i + capacity >= inserts;
            prop_assert_eq!(store.get(&i.to_string()).is_some(), retained);
        }
    }

    /// Property: same units, input and settings produce byte-identical output
    #[test]
    fn prop_pipeline_deterministic(payload in payload_strategy(), settings in settings_strategy()) {
        let pipeline = MiddlewarePipeline::from_registry(DEFAULT_UNITS);

        let mut first_settings = settings.clone();
        let mut second_settings = settings;
        let first = pipeline.process_request(payload.clone(), &mut first_settings).unwrap();
        let second = pipeline.process_request(payload, &mut second_settings).unwrap();

        prop_assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    /// Property: with every unit disabled both phases are identity
    #[test]
    fn prop_all_disabled_is_identity(payload in payload_strategy()) {
        let pipeline = MiddlewarePipeline::with_default_units();
        let mut settings = SettingsSnapshot::default();
        for name in pipeline.names() {
            settings.set(format!("use_{}", name), json!(false));
        }

        let out = pipeline.process_request(payload.clone(), &mut settings).unwrap();
        prop_assert_eq!(&out, &payload);

        let response = json!({"choices": [{"message": {"role": "assistant", "content": "x"}}]});
        let out = pipeline.process_response(response.clone(), &mut settings).unwrap();
        prop_assert_eq!(out, response);
    }

    /// Property: a wire-serialized record parses back to the same record
    #[test]
    fn prop_record_wire_round_trip(
        id in "[a-f0-9-]{1,36}",
        secs in 1_000_000_000u32..2_000_000_000u32,
        duration in proptest::option::of(0u32..100_000),
        error in proptest::option::of("[a-z ]{1,20}"),
    ) {
        let mut original = record(id);
        original.timestamp = f64::from(secs);
        original.duration_ms = duration.map(f64::from);
        original.status = if error.is_some() { CallStatus::Error } else { CallStatus::Completed };
        original.error = error;

        let wire = serde_json::to_string(&original).unwrap();
        let parsed: CallRecord = serde_json::from_str(&wire).unwrap();
        prop_assert_eq!(parsed, original);
    }
}
