//! Inbound dispatch benchmark suite.
//!
//! Measures the hot path every gateway frame takes:
//! - Event bus fan-out for `ws:message`
//! - Device callback snapshot and dispatch
//! - Frame parsing
//!
//! Run with: cargo bench --bench dispatch
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::{Value, json};
use telemetry_link::client::{DeviceHandler, SubscriptionRegistry};
use telemetry_link::protocol::InboundFrame;
use telemetry_link::{DeviceId, EventBus};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const LISTENER_COUNTS: &[usize] = &[1, 10, 100];
const DEVICE_COUNTS: &[usize] = &[10, 1_000];

fn sample_frame() -> Value {
    json!({
        "type": "device_data",
        "device_id": 42,
        "timestamp": 1_700_000_000_000_u64,
        "points": [
            {"point_code": "temp", "value": 21.5, "raw_value": 215, "quality": "good"},
            {"point_code": "pressure", "value": 1.013, "raw_value": 1013, "quality": "good"}
        ]
    })
}

// ============================================================================
// Benchmark: Event Bus Emit
// ============================================================================

fn bench_bus_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus_emit");
    let frame = sample_frame();

    for &count in LISTENER_COUNTS {
        let bus: EventBus<Value> = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        for _ in 0..count {
            let hits = Arc::clone(&hits);
            bus.on("ws:message", move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
            });
        }

        group.bench_with_input(BenchmarkId::new("listeners", count), &bus, |b, bus| {
            b.iter(|| bus.emit(black_box("ws:message"), black_box(&frame)));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Device Dispatch
// ============================================================================

fn bench_device_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("device_dispatch");
    let frame = sample_frame();
    let target = DeviceId::from(42u32);

    for &count in DEVICE_COUNTS {
        let mut registry = SubscriptionRegistry::new();
        for n in 0..count {
            registry.subscribe(DeviceId::from(n), DeviceHandler::new(|_| {}));
        }
        registry.subscribe(target.clone(), DeviceHandler::new(|f| {
            let _ = black_box(f);
        }));

        group.bench_with_input(BenchmarkId::new("devices", count), &registry, |b, registry| {
            b.iter(|| {
                let handlers = registry.snapshot(black_box(&target));
                SubscriptionRegistry::dispatch(&handlers, &target, &frame)
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Frame Parsing
// ============================================================================

fn bench_parse(c: &mut Criterion) {
    let text = sample_frame().to_string();

    c.bench_function("parse_device_data", |b| {
        b.iter(|| {
            if let Ok(frame) = InboundFrame::from_text(black_box(&text)) {
                let _ = black_box(frame.parse());
            }
        });
    });
}

criterion_group!(benches, bench_bus_emit, bench_device_dispatch, bench_parse);
criterion_main!(benches);
