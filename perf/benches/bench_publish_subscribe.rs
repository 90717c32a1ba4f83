use basalt_ipc::prelude::*;
use basalt_perf::BenchNode;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

fn bench_loan_send_receive(c: &mut Criterion) {
    let fixture = BenchNode::new();
    let service = fixture
        .node
        .service_builder(&BenchNode::service_name("crit-pubsub"))
        .publish_subscribe::<u64>()
        .subscriber_max_buffer_size(16)
        .create()
        .expect("failed to create service");
    let subscriber = service.subscriber_builder().create().expect("subscriber");
    let publisher = service.publisher_builder().create().expect("publisher");

    let mut group = c.benchmark_group("publish_subscribe");
    group.throughput(Throughput::Elements(1));

    group.bench_function("loan_uninit + drop", |b| {
        b.iter(|| black_box(publisher.loan_uninit().expect("loan")));
    });

    group.bench_function("send_copy (no receive)", |b| {
        b.iter(|| publisher.send_copy(black_box(1)).expect("send"));
    });
    while subscriber.receive().expect("receive").is_some() {}

    group.bench_function("round_trip", |b| {
        b.iter(|| {
            let sample = publisher.loan_uninit().expect("loan").write_payload(black_box(9));
            sample.send().expect("send");
            black_box(subscriber.receive().expect("receive").map(|s| s[0]));
        });
    });

    group.bench_function("receive (empty)", |b| {
        b.iter(|| black_box(subscriber.receive().expect("receive").is_none()));
    });

    group.finish();
}

fn bench_slice_lengths(c: &mut Criterion) {
    const MAX: usize = 4096;
    let fixture = BenchNode::new();
    let service = fixture
        .node
        .service_builder(&BenchNode::service_name("crit-slices"))
        .publish_subscribe::<u8>()
        .max_slice_len(MAX)
        .create()
        .expect("failed to create service");
    let subscriber = service.subscriber_builder().create().expect("subscriber");
    let publisher = service.publisher_builder().create().expect("publisher");
    let data = vec![0xa5u8; MAX];

    let mut group = c.benchmark_group("publish_subscribe_slice");
    for &len in &[8usize, 64, 512, 4096] {
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter(|| {
                publisher.send_slice_copy(black_box(&data[..len])).expect("send");
                black_box(subscriber.receive().expect("receive").map(|s| s.len()));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_loan_send_receive, bench_slice_lengths);
criterion_main!(benches);
