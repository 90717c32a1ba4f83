use anyhow::Context;
use basalt_ipc::prelude::*;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVICE: &str = "basalt/counter";
const MAX_SLICE_LEN: usize = 64;
const CYCLE_TIME: Duration = Duration::from_secs(1);

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
        .name(&NodeName::new("basalt-publisher")?)
        .config(config)
        .create()
        .context("failed to create node")?;

    let service = node
        .service_builder(&ServiceName::new(&service_name)?)
        .publish_subscribe::<u8>()
        .max_slice_len(MAX_SLICE_LEN)
        .open_or_create()
        .with_context(|| format!("failed to open service {service_name}"))?;
    let publisher = service.publisher_builder().create()?;

    let wakeup = node
        .service_builder(&ServiceName::new(&format!("{service_name}/wakeup"))?)
        .event()
        .open_or_create()
        .context("failed to open wakeup service")?;
    let notifier = wakeup.notifier_builder().create()?;

    info!(node = %node.id(), service = %service_name, "publishing");

    let mut counter = 0u64;
    while node.wait(CYCLE_TIME) == NodeEvent::Tick {
        counter += 1;
        let len = 1 + (counter as usize % MAX_SLICE_LEN);
        let sample = publisher
            .loan_slice_uninit(len)?
            .write_from_fn(|i| counter.wrapping_add(i as u64) as u8);
        let reached = sample.send()?;
        let woken = notifier.notify()?;
        info!(counter, len, reached, woken, "sent sample");
    }

    info!("shutting down");
    Ok(())
}
