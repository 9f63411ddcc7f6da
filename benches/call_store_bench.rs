//! Benchmarks for call tracking and the record store.
//!
//! Run with: cargo bench --bench call_store_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use llm_relay::{
    core::init_metrics,
    monitor::{CallRecord, CallStore, CallTracker, EventBroadcaster, NoopSink},
};
use serde_json::json;
use std::sync::Arc;

fn record(id: String) -> CallRecord {
    CallRecord::pending(
        id,
        "127.0.0.1".to_string(),
        "POST".to_string(),
        "/v1/chat/completions".to_string(),
        json!({"model": "llama3.1"}),
        json!({"model": "llama3.1"}),
    )
}

fn bench_store_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_insert");

    for capacity in [100, 1000, 10_000].iter() {
        let ids: Vec<String> = (0..*capacity * 2).map(|i| format!("call-{}", i)).collect();

        group.throughput(Throughput::Elements(ids.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &ids, |b, ids| {
            b.iter(|| {
                let mut store = CallStore::new(*capacity);
                for id in ids {
                    black_box(store.insert(record(id.clone())));
                }
            });
        });
    }

    group.finish();
}

fn bench_store_list(c: &mut Criterion) {
    let mut store = CallStore::new(1000);
    for i in 0..1500 {
        store.insert(record(i.to_string()));
    }

    c.bench_function("store_iter_recent_50", |b| {
        b.iter(|| black_box(store.iter_recent().take(50).count()));
    });
}

fn bench_tracker_lifecycle(c: &mut Criterion) {
    init_metrics();
    let mut group = c.benchmark_group("tracker_lifecycle");
    let response = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
    let request = json!({"model": "llama3.1", "messages": [{"role": "user", "content": "hi"}]});

    let quiet = CallTracker::new(1000, Arc::new(NoopSink));
    let mut n = 0u64;
    group.bench_function("no_subscribers", |b| {
        b.iter(|| {
            n += 1;
            let id = n.to_string();
            quiet
                .start(&id, "127.0.0.1", "POST", "/v1/chat/completions", &request, &request)
                .unwrap();
            quiet.complete(&id, &response, &response, 1.0);
        });
    });

    let events = Arc::new(EventBroadcaster::new(1024));
    let _rx = events.subscribe();
    let broadcasting = CallTracker::new(1000, events.clone());
    let mut n = 0u64;
    group.bench_function("with_subscriber", |b| {
        b.iter(|| {
            n += 1;
            let id = n.to_string();
            broadcasting
                .start(&id, "127.0.0.1", "POST", "/v1/chat/completions", &request, &request)
                .unwrap();
            broadcasting.complete(&id, &response, &response, 1.0);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_store_insert,
    bench_store_list,
    bench_tracker_lifecycle
);
criterion_main!(benches);
