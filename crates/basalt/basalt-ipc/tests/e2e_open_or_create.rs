//! Two processes race to `open_or_create` the same service.
//!
//! ```text
//! [Parent]  --[spawn]--[go]------------------[collect reports]--[release]--[reap]
//!                        |                        ^    ^            |
//!                        v                        |    |            v
//! [Racer 0] --[wait]--[open_or_create]--[subscribe]--[report]--[hold]--[exit]
//! [Racer 1] --[wait]--[open_or_create]--[subscribe]--[report]--[hold]--[exit]
//! ```
//!
//! Each racer uses its own default publisher limit. Opening leaves the
//! creator's limits in place, so a racer reports `created` when the service
//! carries its own limit and `opened` otherwise. Both hold their ports until the
//! parent has read both reports.
//!
//! ```bash
//! cargo test -p basalt-ipc --test e2e_open_or_create -- --nocapture
//! ```

use basalt_ipc::prelude::*;
use std::env;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "BASALT_E2E_ROLE";
const ENV_ROOT: &str = "BASALT_E2E_ROOT";
const ENV_RACER: &str = "BASALT_E2E_RACER";
const ROLE_RACER: &str = "racer";

const SERVICE: &str = "e2e/race";
const PARTICIPANTS: usize = 2;
const GO_FILE: &str = "go";
const RELEASE_FILE: &str = "release";
const REPORT_PREFIX: &str = "race-report:";
const CREATED: &str = "created";
const OPENED: &str = "opened";
const TIMEOUT: Duration = Duration::from_secs(10);

fn publisher_limit(racer: usize) -> usize {
    2 + racer
}

fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn run_racer(root: &Path, racer: usize) {
    let mut config = Config::default().with_root_path(root);
    config.defaults.publish_subscribe.max_publishers = publisher_limit(racer);
    config.defaults.publish_subscribe.max_subscribers = PARTICIPANTS;
    let node = NodeBuilder::new().config(&config).create().expect("racer: node");

    wait_for("the start signal", || root.join(GO_FILE).exists());
    let service = node
        .service_builder(&ServiceName::new(SERVICE).unwrap())
        .publish_subscribe::<u64>()
        .open_or_create()
        .expect("racer: open_or_create");
    let _subscriber = service.subscriber_builder().create().expect("racer: subscriber");

    wait_for("the peer's subscriber", || {
        service.dynamic_config().number_of_subscribers() == PARTICIPANTS
    });

    let outcome = if service.static_config().max_publishers() == publisher_limit(racer) {
        CREATED
    } else {
        OPENED
    };
    log!("[RACER {racer}] {outcome} the service");

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{REPORT_PREFIX}{outcome}").expect("racer: report");
    stdout.flush().expect("racer: flush report");
    drop(stdout);

    wait_for("the release signal", || root.join(RELEASE_FILE).exists());
    log!("[RACER {racer}] released");
}

/// Reads the racer's stdout up to its report line; the harness prints its own
/// lines around it.
fn read_report(stdout: &mut BufReader<ChildStdout>) -> String {
    let mut line = String::new();
    loop {
        line.clear();
        let read = stdout.read_line(&mut line).expect("read racer stdout");
        assert!(read > 0, "racer exited without reporting");
        if let Some(outcome) = line.trim().strip_prefix(REPORT_PREFIX) {
            return outcome.to_owned();
        }
    }
}

#[test]
fn e2e_concurrent_open_or_create() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let root = env::var(ENV_ROOT).expect("root not set");
        let racer = env::var(ENV_RACER)
            .expect("racer index not set")
            .parse()
            .expect("racer index");
        match role.as_str() {
            ROLE_RACER => run_racer(Path::new(&root), racer),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let exe = env::current_exe().expect("current executable");

    let mut children: Vec<Child> = (0..PARTICIPANTS)
        .map(|racer| {
            Command::new(&exe)
                .arg("--exact")
                .arg("e2e_concurrent_open_or_create")
                .arg("--nocapture")
                .arg("--quiet")
                .env(ENV_ROLE, ROLE_RACER)
                .env(ENV_ROOT, dir.path())
                .env(ENV_RACER, racer.to_string())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()
                .expect("spawn racer")
        })
        .collect();

    std::fs::write(dir.path().join(GO_FILE), b"").unwrap();

    // Every racer blocks on the release file, so both are still attached
    // while their reports are collected.
    let mut outputs: Vec<_> = children
        .iter_mut()
        .map(|child| BufReader::new(child.stdout.take().expect("racer stdout is piped")))
        .collect();
    let reports: Vec<String> = outputs.iter_mut().map(read_report).collect();
    log!("[PARENT] reports: {reports:?}");

    std::fs::write(dir.path().join(RELEASE_FILE), b"").unwrap();
    for output in &mut outputs {
        io::copy(output, &mut io::sink()).expect("drain racer stdout");
    }
    for mut child in children {
        let status = child.wait().expect("wait for racer");
        assert!(status.success(), "racer failed: {status}");
    }

    let creators = reports.iter().filter(|r| *r == CREATED).count();
    let openers = reports.iter().filter(|r| *r == OPENED).count();
    assert_eq!(creators, 1, "exactly one racer creates: {reports:?}");
    assert_eq!(openers, 1, "exactly one racer opens: {reports:?}");

    let config = Config::default().with_root_path(dir.path());
    assert!(
        !Service::does_exist(
            &ServiceName::new(SERVICE).unwrap(),
            &config,
            MessagingPattern::PublishSubscribe
        )
        .unwrap()
    );
}
