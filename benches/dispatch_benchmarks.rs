use std::{
    hint::black_box,
    sync::atomic::{AtomicUsize, Ordering},
};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use topicwire::{HandlerRegistry, InboundMessage, TopicFilter};

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let message = InboundMessage::new("b2c/shop/products/response", "{\"status\":true}");

    for handlers in [1usize, 8, 64] {
        let registry = HandlerRegistry::new();
        for i in 0..handlers {
            let hits = AtomicUsize::new(0);
            registry.add_handler(format!("handler-{i}"), move |msg| {
                if msg.is_on("b2c/shop/products/response") {
                    hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            });
        }

        group.bench_with_input(BenchmarkId::from_parameter(handlers), &registry, |b, registry| {
            b.iter(|| black_box(registry.dispatch(black_box(&message))))
        });
    }
    group.finish();
}

fn bench_topic_filter(c: &mut Criterion) {
    let filter = TopicFilter::new("b2c/+/live-history/#").unwrap();
    c.bench_function("topic_filter_match", |b| {
        b.iter(|| black_box(filter.matches(black_box("b2c/alice/live-history/2025/10"))))
    });
    c.bench_function("topic_filter_miss", |b| {
        b.iter(|| black_box(filter.matches(black_box("b2c/alice/orders/2025"))))
    });
}

criterion_group!(benches, bench_dispatch, bench_topic_filter);
criterion_main!(benches);
