use basalt_ipc::prelude::*;
use basalt_ipc::publish_subscribe::{PublisherCreateError, SubscriberCreateError};
use basalt_ipc::service::{ServiceCreateError, ServiceOpenError, ServiceOpenOrCreateError};
use std::time::Duration;
use tempfile::TempDir;

fn setup() -> (TempDir, Node) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default().with_root_path(dir.path());
    let node = NodeBuilder::new().config(&config).create().unwrap();
    (dir, node)
}

fn name(value: &str) -> ServiceName {
    ServiceName::new(value).unwrap()
}

#[test]
fn slices_of_every_length_arrive_byte_exact() {
    const MAX: usize = 16;
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/slices"))
        .publish_subscribe::<u8>()
        .max_slice_len(MAX)
        .create()
        .unwrap();
    let subscriber = service.subscriber_builder().create().unwrap();
    let publisher = service.publisher_builder().create().unwrap();

    for len in 0..=MAX {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 + len) as u8).collect();
        let sample = publisher.loan_slice_uninit(len).unwrap();
        assert_eq!(sample.len(), len);
        assert_eq!(sample.write_from_slice(&data).send().unwrap(), 1);

        let received = subscriber.receive().unwrap().unwrap();
        assert_eq!(received.payload(), data.as_slice());
        assert_eq!(received.origin(), publisher.id());
    }

    assert_eq!(
        publisher.loan_slice_uninit(MAX + 1).err(),
        Some(LoanError::ExceedsMaxLoanSize)
    );
}

#[test]
fn publisher_cannot_ask_for_more_than_the_service_slice_len() {
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/slice-limit"))
        .publish_subscribe::<u8>()
        .max_slice_len(4)
        .create()
        .unwrap();

    assert_eq!(
        service.publisher_builder().max_slice_len(5).create().err(),
        Some(PublisherCreateError::ExceedsMaxSliceLen)
    );
    let publisher = service.publisher_builder().max_slice_len(2).create().unwrap();
    assert_eq!(publisher.max_slice_len(), 2);
    assert_eq!(
        publisher.loan_slice(3).err(),
        Some(LoanError::ExceedsMaxLoanSize)
    );
}

#[test]
fn every_subscriber_gets_the_same_sample() {
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/fanout"))
        .publish_subscribe::<u64>()
        .create()
        .unwrap();
    let first = service.subscriber_builder().create().unwrap();
    let second = service.subscriber_builder().create().unwrap();
    let publisher = service.publisher_builder().create().unwrap();

    assert_eq!(publisher.send_copy(1234).unwrap(), 2);
    assert_eq!(first.receive().unwrap().unwrap()[0], 1234);
    assert_eq!(second.receive().unwrap().unwrap()[0], 1234);
    assert!(!first.has_samples());
}

#[test]
fn samples_keep_publisher_order() {
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/order"))
        .publish_subscribe::<u32>()
        .subscriber_max_buffer_size(8)
        .create()
        .unwrap();
    let subscriber = service.subscriber_builder().create().unwrap();
    let publisher = service.publisher_builder().create().unwrap();

    for i in 0..8 {
        publisher.send_copy(i).unwrap();
    }
    let received: Vec<u32> = std::iter::from_fn(|| subscriber.receive().unwrap().map(|s| s[0]))
        .collect();
    assert_eq!(received, (0..8).collect::<Vec<_>>());
}

#[test]
fn safe_overflow_replaces_the_oldest_sample() {
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/overflow"))
        .publish_subscribe::<u32>()
        .subscriber_max_buffer_size(2)
        .enable_safe_overflow(true)
        .create()
        .unwrap();
    let subscriber = service.subscriber_builder().create().unwrap();
    let publisher = service.publisher_builder().create().unwrap();

    for i in 1..=3 {
        assert_eq!(publisher.send_copy(i).unwrap(), 1);
    }
    assert_eq!(subscriber.receive().unwrap().unwrap()[0], 2);
    assert_eq!(subscriber.receive().unwrap().unwrap()[0], 3);
    assert!(subscriber.receive().unwrap().is_none());
}

#[test]
fn full_queue_without_overflow_discards() {
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/discard"))
        .publish_subscribe::<u32>()
        .subscriber_max_buffer_size(1)
        .enable_safe_overflow(false)
        .create()
        .unwrap();
    let subscriber = service.subscriber_builder().create().unwrap();
    let publisher = service
        .publisher_builder()
        .unable_to_deliver_strategy(UnableToDeliverStrategy::DiscardSample)
        .create()
        .unwrap();

    assert_eq!(publisher.send_copy(1).unwrap(), 1);
    assert_eq!(publisher.send_copy(2), Err(SendError::UnableToDeliver));
    assert_eq!(subscriber.receive().unwrap().unwrap()[0], 1);
    assert!(subscriber.receive().unwrap().is_none());
}

#[test]
fn blocking_publisher_waits_for_room() {
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/block"))
        .publish_subscribe::<u32>()
        .subscriber_max_buffer_size(1)
        .enable_safe_overflow(false)
        .create()
        .unwrap();
    let subscriber = service.subscriber_builder().create().unwrap();
    let publisher = service
        .publisher_builder()
        .unable_to_deliver_strategy(UnableToDeliverStrategy::Block)
        .create()
        .unwrap();

    publisher.send_copy(1).unwrap();
    std::thread::scope(|s| {
        let sender = s.spawn(|| publisher.send_copy(2));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(subscriber.receive().unwrap().unwrap()[0], 1);
        assert_eq!(sender.join().unwrap(), Ok(1));
    });
    assert_eq!(subscriber.receive().unwrap().unwrap()[0], 2);
}

#[test]
fn no_subscriber_means_zero_deliveries() {
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/empty"))
        .publish_subscribe::<u32>()
        .create()
        .unwrap();
    let publisher = service.publisher_builder().create().unwrap();
    assert_eq!(publisher.send_copy(5), Ok(0));
}

#[test]
fn loans_and_borrows_are_limited() {
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/limits"))
        .publish_subscribe::<u64>()
        .publisher_max_loaned_samples(2)
        .subscriber_max_borrowed_samples(1)
        .subscriber_max_buffer_size(4)
        .create()
        .unwrap();
    let subscriber = service.subscriber_builder().create().unwrap();
    let publisher = service.publisher_builder().create().unwrap();

    let a = publisher.loan_uninit().unwrap();
    let b = publisher.loan_uninit().unwrap();
    assert_eq!(publisher.loan_uninit().err(), Some(LoanError::ExceedsMaxLoans));
    drop(a);
    drop(b);

    publisher.send_copy(1).unwrap();
    publisher.send_copy(2).unwrap();
    let held = subscriber.receive().unwrap().unwrap();
    assert_eq!(subscriber.receive().err(), Some(ReceiveError::ExceedsMaxBorrows));
    drop(held);
    assert_eq!(subscriber.receive().unwrap().unwrap()[0], 2);
}

#[test]
fn slots_are_recycled_after_release() {
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/recycle"))
        .publish_subscribe::<u64>()
        .create()
        .unwrap();
    let subscriber = service.subscriber_builder().create().unwrap();
    let publisher = service.publisher_builder().create().unwrap();

    for i in 0..10_000u64 {
        let mut sample = publisher.loan_slice(1).unwrap();
        sample[0] = i;
        sample.send().unwrap();
        assert_eq!(subscriber.receive().unwrap().unwrap()[0], i);
    }
}

#[test]
fn dropped_subscriber_frees_its_queued_samples() {
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/drop-subscriber"))
        .publish_subscribe::<u64>()
        .max_subscribers(1)
        .subscriber_max_buffer_size(2)
        .create()
        .unwrap();
    let publisher = service.publisher_builder().create().unwrap();

    for round in 0..100u64 {
        let subscriber = service.subscriber_builder().create().unwrap();
        publisher.send_copy(round).unwrap();
        publisher.send_copy(round + 1).unwrap();
        drop(subscriber);
    }

    let subscriber = service.subscriber_builder().create().unwrap();
    assert!(subscriber.receive().unwrap().is_none());
    publisher.send_copy(7).unwrap();
    assert_eq!(subscriber.receive().unwrap().unwrap()[0], 7);
}

#[test]
fn port_counts_follow_creation_and_drop() {
    let (_dir, node) = setup();
    let service = node
        .service_builder(&name("pubsub/counts"))
        .publish_subscribe::<u64>()
        .max_subscribers(1)
        .create()
        .unwrap();

    let subscriber = service.subscriber_builder().create().unwrap();
    assert_eq!(
        service.subscriber_builder().create().err(),
        Some(SubscriberCreateError::ExceedsMaxSupportedSubscribers)
    );
    let _publisher = service.publisher_builder().create().unwrap();
    assert_eq!(service.dynamic_config().number_of_subscribers(), 1);
    assert_eq!(service.dynamic_config().number_of_publishers(), 1);

    drop(subscriber);
    assert_eq!(service.dynamic_config().number_of_subscribers(), 0);
}

#[test]
fn open_checks_types_and_overflow() {
    let (_dir, node) = setup();
    let service_name = name("pubsub/compat");
    let _service = node
        .service_builder(&service_name)
        .publish_subscribe::<u64>()
        .enable_safe_overflow(true)
        .subscriber_max_buffer_size(4)
        .create()
        .unwrap();

    assert_eq!(
        node.service_builder(&service_name)
            .publish_subscribe::<u32>()
            .open()
            .err(),
        Some(ServiceOpenError::IncompatibleTypes)
    );
    assert_eq!(
        node.service_builder(&service_name)
            .publish_subscribe::<u64>()
            .enable_safe_overflow(false)
            .open()
            .err(),
        Some(ServiceOpenError::IncompatibleOverflowBehavior)
    );
    assert_eq!(
        node.service_builder(&service_name)
            .publish_subscribe::<u64>()
            .subscriber_max_buffer_size(5)
            .open()
            .err(),
        Some(ServiceOpenError::DoesNotSupportRequestedMinBufferSize)
    );

    let opened = node
        .service_builder(&service_name)
        .publish_subscribe::<u64>()
        .open()
        .unwrap();
    assert_eq!(opened.static_config().subscriber_max_buffer_size(), 4);
}

#[test]
fn open_or_create_shares_one_service() {
    let (_dir, node) = setup();
    let service_name = name("pubsub/shared");
    let created = node
        .service_builder(&service_name)
        .publish_subscribe::<u64>()
        .open_or_create()
        .unwrap();
    let opened = node
        .service_builder(&service_name)
        .publish_subscribe::<u64>()
        .open_or_create()
        .unwrap();

    let subscriber = opened.subscriber_builder().create().unwrap();
    let publisher = created.publisher_builder().create().unwrap();
    publisher.send_copy(99).unwrap();
    assert_eq!(subscriber.receive().unwrap().unwrap()[0], 99);
}

#[test]
fn limits_beyond_the_address_space_are_rejected() {
    let (_dir, node) = setup();
    let service_name = name("pubsub/overflow");

    let slices = node
        .service_builder(&service_name)
        .publish_subscribe::<u64>()
        .max_slice_len(usize::MAX)
        .create();
    assert_eq!(slices.err(), Some(ServiceCreateError::InvalidConfiguration));

    let loans = node
        .service_builder(&service_name)
        .publish_subscribe::<u64>()
        .max_publishers(usize::MAX)
        .publisher_max_loaned_samples(usize::MAX)
        .create();
    assert_eq!(loans.err(), Some(ServiceCreateError::InvalidConfiguration));

    let buffers = node
        .service_builder(&service_name)
        .publish_subscribe::<u64>()
        .subscriber_max_buffer_size(usize::MAX)
        .open_or_create();
    assert_eq!(
        buffers.err(),
        Some(ServiceOpenOrCreateError::Create(ServiceCreateError::InvalidConfiguration))
    );

    node.service_builder(&service_name)
        .publish_subscribe::<u64>()
        .create()
        .unwrap();
}
