use basalt_ipc::prelude::*;
use basalt_perf::BenchNode;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

fn bench_round_trip(c: &mut Criterion) {
    let fixture = BenchNode::new();
    let service = fixture
        .node
        .service_builder(&BenchNode::service_name("crit-rr"))
        .request_response::<u64, u64>()
        .max_response_buffer_size(8)
        .create()
        .expect("failed to create service");
    let server = service.server_builder().create().expect("server");
    let client = service.client_builder().create().expect("client");

    let mut group = c.benchmark_group("request_response");
    group.throughput(Throughput::Elements(1));

    group.bench_function("request + one response", |b| {
        b.iter(|| {
            let pending = client.send_copy(black_box(1)).expect("send request");
            if let Some(active) = server.receive().expect("receive request") {
                active.send_copy(*active * 2).expect("send response");
            }
            black_box(pending.receive().expect("receive response").map(|r| *r));
        });
    });

    group.bench_function("request + streamed responses (8)", |b| {
        b.iter(|| {
            let pending = client.send_copy(black_box(1)).expect("send request");
            if let Some(active) = server.receive().expect("receive request") {
                for i in 0..8 {
                    active.send_copy(i).expect("send response");
                }
            }
            while let Some(response) = pending.receive().expect("receive response") {
                black_box(*response);
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_round_trip);
criterion_main!(benches);
