//! Two-process publish-subscribe through shared memory.
//!
//! ```text
//! [Subscriber] --[open_or_create]--[subscribe]----[receive...]-------[done]
//!                                       |              ^   ^   ^
//!                                       v              |   |   |
//! [Publisher]  --[open_or_create]--[wait for peer]--[loan, fill, send...]
//! ```
//!
//! The publisher blocks on a full queue, so every sample must arrive, in
//! order and byte-exact.
//!
//! ```bash
//! cargo test -p basalt-ipc --test e2e_publish_subscribe -- --nocapture
//! ```

use basalt_ipc::prelude::*;
use std::env;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "BASALT_E2E_ROLE";
const ENV_ROOT: &str = "BASALT_E2E_ROOT";
const ROLE_PUBLISHER: &str = "publisher";
const ROLE_SUBSCRIBER: &str = "subscriber";

const SERVICE: &str = "e2e/stream";
const SAMPLE_COUNT: u64 = 20_000;
const SLICE_LEN: usize = 8;
const BUFFER_SIZE: usize = 64;

fn node(root: &Path) -> Node {
    NodeBuilder::new()
        .config(&Config::default().with_root_path(root))
        .create()
        .expect("node")
}

fn open_service(node: &Node) -> basalt_ipc::publish_subscribe::PortFactory<u64> {
    node.service_builder(&ServiceName::new(SERVICE).unwrap())
        .publish_subscribe::<u64>()
        .max_slice_len(SLICE_LEN)
        .subscriber_max_buffer_size(BUFFER_SIZE)
        .enable_safe_overflow(false)
        .open_or_create()
        .expect("service")
}

fn expected(i: u64, k: usize) -> u64 {
    i.wrapping_mul(31).wrapping_add(k as u64)
}

fn run_publisher(root: &Path) {
    let node = node(root);
    let service = open_service(&node);
    let publisher = service
        .publisher_builder()
        .unable_to_deliver_strategy(UnableToDeliverStrategy::Block)
        .create()
        .expect("publisher");

    let deadline = Instant::now() + Duration::from_secs(10);
    while service.dynamic_config().number_of_subscribers() == 0 {
        assert!(Instant::now() < deadline, "publisher: no subscriber showed up");
        std::thread::sleep(Duration::from_millis(1));
    }

    let start = Instant::now();
    for i in 0..SAMPLE_COUNT {
        let sample = publisher
            .loan_slice_uninit(SLICE_LEN)
            .expect("publisher: loan")
            .write_from_fn(|k| expected(i, k));
        assert_eq!(sample.send(), Ok(1));
    }
    log!("[PUBLISHER] sent {SAMPLE_COUNT} samples in {:?}", start.elapsed());
}

fn run_subscriber(root: &Path) {
    let node = node(root);
    let service = open_service(&node);
    let subscriber = service.subscriber_builder().create().expect("subscriber");

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut next = 0u64;
    while next < SAMPLE_COUNT {
        assert!(Instant::now() < deadline, "subscriber: stalled at sample {next}");
        match subscriber.receive().expect("subscriber: receive") {
            Some(sample) => {
                assert_eq!(sample.len(), SLICE_LEN);
                for (k, value) in sample.iter().enumerate() {
                    assert_eq!(*value, expected(next, k), "sample {next} element {k}");
                }
                next += 1;
            }
            None => std::hint::spin_loop(),
        }
    }
    log!("[SUBSCRIBER] received {SAMPLE_COUNT} samples in order");
}

#[test]
fn e2e_two_process_publish_subscribe() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let root = env::var(ENV_ROOT).expect("root not set");
        match role.as_str() {
            ROLE_PUBLISHER => run_publisher(Path::new(&root)),
            ROLE_SUBSCRIBER => run_subscriber(Path::new(&root)),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let exe = env::current_exe().expect("current executable");
    let spawn = |role: &str| {
        Command::new(&exe)
            .arg("--exact")
            .arg("e2e_two_process_publish_subscribe")
            .env(ENV_ROLE, role)
            .env(ENV_ROOT, dir.path())
            .stderr(Stdio::inherit())
            .spawn()
            .expect("spawn child")
    };

    let mut subscriber = spawn(ROLE_SUBSCRIBER);
    let mut publisher = spawn(ROLE_PUBLISHER);

    let publisher_status = publisher.wait().expect("wait for publisher");
    let subscriber_status = subscriber.wait().expect("wait for subscriber");
    assert!(publisher_status.success(), "publisher failed: {publisher_status}");
    assert!(subscriber_status.success(), "subscriber failed: {subscriber_status}");
}
