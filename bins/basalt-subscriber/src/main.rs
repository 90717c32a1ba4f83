use anyhow::Context;
use basalt_ipc::prelude::*;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVICE: &str = "basalt/counter";
const MAX_SLICE_LEN: usize = 64;
const CYCLE_TIME: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    let config = Config::global_config();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.global.log_level)),
        )
        .init();

    let service_name = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_SERVICE.to_owned());
    let node = NodeBuilder::new()
        .name(&NodeName::new("basalt-subscriber")?)
        .config(config)
        .create()
        .context("failed to create node")?;

    let service = node
        .service_builder(&ServiceName::new(&service_name)?)
        .publish_subscribe::<u8>()
        .max_slice_len(MAX_SLICE_LEN)
        .open_or_create()
        .with_context(|| format!("failed to open service {service_name}"))?;
    let subscriber = service.subscriber_builder().create()?;

    let wakeup = node
        .service_builder(&ServiceName::new(&format!("{service_name}/wakeup"))?)
        .event()
        .open_or_create()
        .context("failed to open wakeup service")?;
    let listener = wakeup.listener_builder().create()?;

    info!(node = %node.id(), service = %service_name, "subscribed");

    // A zero cycle only polls for termination; the listener does the waiting.
    while node.wait(Duration::ZERO) == NodeEvent::Tick {
        listener.timed_wait_all(|id| debug!(event = id.as_value(), "woken"), CYCLE_TIME)?;
        while let Some(sample) = subscriber.receive()? {
            info!(origin = %sample.origin(), len = sample.len(), payload = ?sample.payload(), "received sample");
        }
    }

    info!("shutting down");
    Ok(())
}
