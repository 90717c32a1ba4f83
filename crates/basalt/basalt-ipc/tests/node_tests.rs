//! Node lifecycle tests, including nodes of processes that died without
//! cleaning up.
//!
//! Dead nodes are produced by re-running this test executable as a child
//! that sets up resources and leaves through `std::process::exit`, skipping
//! every destructor.
//!
//! ```bash
//! cargo test -p basalt-ipc --test node_tests -- --nocapture
//! ```

use basalt_ipc::prelude::*;
use std::env;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "BASALT_NODE_TEST_ROLE";
const ENV_ROOT: &str = "BASALT_NODE_TEST_ROOT";
const ROLE_CRASHING_PUBLISHER: &str = "crashing-publisher";
const ROLE_CRASHING_CLIENT: &str = "crashing-client";

const SERVICE: &str = "node-tests/abandoned";
const REQUEST_SERVICE: &str = "node-tests/abandoned-requests";

fn config(root: &Path) -> Config {
    let mut config = Config::default().with_root_path(root);
    config.node.cleanup_dead_nodes_on_creation = false;
    config
}

/// Opens the service, takes its only publisher slot and exits abruptly.
fn run_crashing_publisher(root: &Path) -> ! {
    let node = NodeBuilder::new()
        .name(&NodeName::new("crasher").unwrap())
        .config(&config(root))
        .create()
        .expect("child: node");
    let service = node
        .service_builder(&ServiceName::new(SERVICE).unwrap())
        .publish_subscribe::<u64>()
        .max_publishers(1)
        .open_or_create()
        .expect("child: service");
    let publisher = service.publisher_builder().create().expect("child: publisher");
    publisher.send_copy(1).expect("child: send");

    log!("[CHILD] node {} exits without cleanup", node.id());
    std::process::exit(0);
}

/// Takes the only client slot, sends one request and exits abruptly.
fn run_crashing_client(root: &Path) -> ! {
    let node = NodeBuilder::new()
        .config(&config(root))
        .create()
        .expect("child: node");
    let service = node
        .service_builder(&ServiceName::new(REQUEST_SERVICE).unwrap())
        .request_response::<u64, u64>()
        .max_clients(1)
        .open()
        .expect("child: service");
    let client = service.client_builder().create().expect("child: client");
    let pending = client.send_copy(7).expect("child: send");
    std::mem::forget(pending);

    log!("[CHILD] node {} exits with a request in flight", node.id());
    std::process::exit(0);
}

/// Runs the child role when the environment asks for it.
fn dispatch_child_role() -> bool {
    let Ok(role) = env::var(ENV_ROLE) else {
        return false;
    };
    let root = env::var(ENV_ROOT).expect("root not set");
    match role.as_str() {
        ROLE_CRASHING_PUBLISHER => run_crashing_publisher(Path::new(&root)),
        ROLE_CRASHING_CLIENT => run_crashing_client(Path::new(&root)),
        other => panic!("unknown role: {other}"),
    }
}

fn spawn_crashing_publisher(test: &str, root: &Path) {
    spawn_child(test, root, ROLE_CRASHING_PUBLISHER);
}

fn spawn_child(test: &str, root: &Path, role: &str) {
    let exe = env::current_exe().expect("current executable");
    let status = Command::new(exe)
        .arg("--exact")
        .arg(test)
        .env(ENV_ROLE, role)
        .env(ENV_ROOT, root)
        .stderr(Stdio::inherit())
        .status()
        .expect("spawn child");
    assert!(status.success(), "child failed: {status}");
}

fn dead_nodes(config: &Config) -> Vec<basalt_ipc::node::DeadNodeView> {
    let mut dead = Vec::new();
    Node::list(config, |state| {
        if let NodeState::Dead(view) = state {
            dead.push(view);
        }
        CallbackProgression::Continue
    })
    .unwrap();
    dead
}

#[test]
fn wait_reports_a_tick_without_signals() {
    let dir = tempfile::tempdir().unwrap();
    let node = NodeBuilder::new().config(&config(dir.path())).create().unwrap();
    assert_eq!(node.wait(Duration::from_millis(5)), NodeEvent::Tick);
}

#[test]
fn dead_node_is_listed_and_its_resources_removed() {
    if dispatch_child_role() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let service_name = ServiceName::new(SERVICE).unwrap();

    spawn_crashing_publisher("dead_node_is_listed_and_its_resources_removed", dir.path());

    let dead = dead_nodes(&config);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].details().map(|d| d.name()), Some("crasher"));
    assert!(!Service::does_exist(&service_name, &config, MessagingPattern::PublishSubscribe).unwrap());

    for view in dead {
        assert_eq!(view.remove_stale_resources(), Ok(true));
    }
    assert!(dead_nodes(&config).is_empty());

    let node = NodeBuilder::new().config(&config).create().unwrap();
    let service = node
        .service_builder(&service_name)
        .publish_subscribe::<u64>()
        .max_publishers(1)
        .create()
        .unwrap();
    assert!(service.publisher_builder().create().is_ok());
}

#[test]
fn ports_of_a_dead_node_are_reclaimed_in_a_live_service() {
    if dispatch_child_role() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let node = NodeBuilder::new().config(&config).create().unwrap();
    let service = node
        .service_builder(&ServiceName::new(SERVICE).unwrap())
        .publish_subscribe::<u64>()
        .max_publishers(1)
        .subscriber_max_buffer_size(4)
        .create()
        .unwrap();
    let subscriber = service.subscriber_builder().create().unwrap();

    spawn_crashing_publisher(
        "ports_of_a_dead_node_are_reclaimed_in_a_live_service",
        dir.path(),
    );

    assert_eq!(subscriber.receive().unwrap().map(|s| s[0]), Some(1));
    assert_eq!(service.dynamic_config().number_of_publishers(), 1);

    let publisher = service.publisher_builder().create().unwrap();
    assert_eq!(service.dynamic_config().number_of_publishers(), 1);
    publisher.send_copy(2).unwrap();
    assert_eq!(subscriber.receive().unwrap().map(|s| s[0]), Some(2));
}

#[test]
fn node_creation_cleans_up_dead_nodes_when_configured() {
    if dispatch_child_role() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut cleaning = config(dir.path());
    cleaning.node.cleanup_dead_nodes_on_creation = true;

    spawn_crashing_publisher(
        "node_creation_cleans_up_dead_nodes_when_configured",
        dir.path(),
    );
    assert_eq!(dead_nodes(&cleaning).len(), 1);

    let _node = NodeBuilder::new().config(&cleaning).create().unwrap();
    assert!(dead_nodes(&cleaning).is_empty());
}

#[test]
fn every_server_learns_of_a_dead_client_reclaimed_elsewhere() {
    if dispatch_child_role() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let node = NodeBuilder::new().config(&config).create().unwrap();
    let service = node
        .service_builder(&ServiceName::new(REQUEST_SERVICE).unwrap())
        .request_response::<u64, u64>()
        .max_clients(1)
        .create()
        .unwrap();
    let first = service.server_builder().create().unwrap();
    let second = service.server_builder().create().unwrap();

    spawn_child(
        "every_server_learns_of_a_dead_client_reclaimed_elsewhere",
        dir.path(),
        ROLE_CRASHING_CLIENT,
    );
    assert_eq!(service.dynamic_config().number_of_clients(), 1);

    // Claiming the only client slot reclaims the dead client.
    let _client = service.client_builder().create().unwrap();

    assert_eq!(first.has_requests(), Err(ConnectionFailure::PeerTerminated));
    assert_eq!(first.has_requests(), Ok(true));
    assert_eq!(second.has_requests(), Err(ConnectionFailure::PeerTerminated));
    assert_eq!(second.has_requests(), Ok(true));

    let orphan = first.receive().unwrap().unwrap();
    assert_eq!(*orphan.payload(), 7);
    assert!(!orphan.is_connected());
}
