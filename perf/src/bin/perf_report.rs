use std::hint::black_box;

use basalt_ipc::prelude::*;
use basalt_perf::*;

const BATCHES: usize = 2_000;
const BATCH_SIZE: usize = 100;
const WARMUP: usize = 50;

fn main() {
    let json_path = parse_json_arg();
    let fixture = BenchNode::new();
    let mut results: Vec<BenchResult> = Vec::new();

    section_header("publish-subscribe");
    print_table_header();
    publish_subscribe(&fixture, &mut results);

    section_header("event");
    print_table_header();
    event(&fixture, &mut results);

    section_header("request-response");
    print_table_header();
    request_response(&fixture, &mut results);

    let usage = capture_rusage();
    section_header("resources");
    println!("  max rss            {}", format_bytes(usage.max_rss_bytes.max(0) as u64));
    println!("  page faults        {} minor / {} major", usage.minor_faults, usage.major_faults);
    println!(
        "  context switches   {} voluntary / {} involuntary",
        usage.vol_ctx_switches, usage.invol_ctx_switches
    );

    if let Some(path) = json_path {
        let report = serde_json::json!({ "results": results, "resources": usage });
        match serde_json::to_string_pretty(&report) {
            Ok(text) => match std::fs::write(&path, text) {
                Ok(()) => println!("\n  wrote {path}"),
                Err(e) => eprintln!("cannot write {path}: {e}"),
            },
            Err(e) => eprintln!("cannot encode report: {e}"),
        }
    }
}

fn parse_json_arg() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--json" {
            return args.next();
        }
    }
    None
}

fn record(results: &mut Vec<BenchResult>, result: BenchResult) {
    print_result_row(&result);
    results.push(result);
}

fn publish_subscribe(fixture: &BenchNode, results: &mut Vec<BenchResult>) {
    let service = fixture
        .node
        .service_builder(&BenchNode::service_name("report-pubsub"))
        .publish_subscribe::<u64>()
        .max_slice_len(64)
        .subscriber_max_buffer_size(16)
        .create()
        .expect("failed to create service");
    let subscriber = service.subscriber_builder().create().expect("subscriber");
    let publisher = service.publisher_builder().create().expect("publisher");

    record(
        results,
        measure_batched("send_copy + receive (u64)", BATCHES, BATCH_SIZE, WARMUP, || {
            publisher.send_copy(black_box(7)).expect("send");
            black_box(subscriber.receive().expect("receive"));
        }),
    );

    let values = [3u64; 64];
    record(
        results,
        measure_batched("send_slice_copy + receive (64)", BATCHES, BATCH_SIZE, WARMUP, || {
            publisher.send_slice_copy(black_box(&values)).expect("send");
            black_box(subscriber.receive().expect("receive"));
        }),
    );

    record(
        results,
        measure_batched("receive (empty)", BATCHES, BATCH_SIZE, WARMUP, || {
            black_box(subscriber.receive().expect("receive"));
        }),
    );
}

fn event(fixture: &BenchNode, results: &mut Vec<BenchResult>) {
    let service = fixture
        .node
        .service_builder(&BenchNode::service_name("report-event"))
        .event()
        .create()
        .expect("failed to create service");
    let listener = service.listener_builder().create().expect("listener");
    let notifier = service.notifier_builder().create().expect("notifier");

    record(
        results,
        measure_batched("notify + try_wait_one", BATCHES, BATCH_SIZE, WARMUP, || {
            notifier.notify().expect("notify");
            black_box(listener.try_wait_one().expect("wait"));
        }),
    );
}

fn request_response(fixture: &BenchNode, results: &mut Vec<BenchResult>) {
    let service = fixture
        .node
        .service_builder(&BenchNode::service_name("report-rr"))
        .request_response::<u64, u64>()
        .create()
        .expect("failed to create service");
    let server = service.server_builder().create().expect("server");
    let client = service.client_builder().create().expect("client");

    record(
        results,
        measure_batched("request + response round trip", BATCHES, BATCH_SIZE, WARMUP, || {
            let pending = client.send_copy(black_box(1)).expect("send request");
            if let Some(active) = server.receive().expect("receive request") {
                active.send_copy(*active + 1).expect("send response");
            }
            black_box(pending.receive().expect("receive response").map(|r| *r));
        }),
    );
}
