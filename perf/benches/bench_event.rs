use basalt_ipc::prelude::*;
use basalt_perf::BenchNode;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;

fn bench_notify_wait(c: &mut Criterion) {
    let fixture = BenchNode::new();
    let service = fixture
        .node
        .service_builder(&BenchNode::service_name("crit-event"))
        .event()
        .create()
        .expect("failed to create service");
    let listener = service.listener_builder().create().expect("listener");
    let notifier = service.notifier_builder().create().expect("notifier");

    let mut group = c.benchmark_group("event");
    group.throughput(Throughput::Elements(1));

    group.bench_function("notify", |b| {
        b.iter(|| black_box(notifier.notify().expect("notify")));
    });
    listener.try_wait_all(|_| {}).expect("drain");

    group.bench_function("notify + try_wait_one", |b| {
        b.iter(|| {
            notifier.notify_with_custom_event_id(EventId::new(3)).expect("notify");
            black_box(listener.try_wait_one().expect("wait"));
        });
    });

    group.bench_function("notify + timed_wait_one", |b| {
        b.iter(|| {
            notifier.notify().expect("notify");
            black_box(listener.timed_wait_one(Duration::from_millis(10)).expect("wait"));
        });
    });

    group.bench_function("try_wait_one (idle)", |b| {
        b.iter(|| black_box(listener.try_wait_one().expect("wait")));
    });

    group.finish();
}

criterion_group!(benches, bench_notify_wait);
criterion_main!(benches);
