//! Outbox staging and relay across a bus outage.

use std::time::Duration;

use event_driven::bus::InMemoryBroker;
use event_driven::outbox::{drain_once, OutboxRelay, OutboxStatus, RelayOptions, StagedPublisher};
use event_driven::producer::{OrderService, UserService};
use event_driven::store::{InMemoryStore, OrderStatus};

use crate::support::{publisher, wait_until};

#[test]
fn staged_events_reach_the_bus_after_an_outage() {
    let broker = InMemoryBroker::new();
    let store = InMemoryStore::new();
    let users = UserService::new(store.clone(), StagedPublisher::new(store.clone()));

    let bus = publisher(&broker);
    broker.set_reachable(false);
    let relay = OutboxRelay::spawn_with(
        store.clone(),
        bus,
        Duration::from_millis(10),
        RelayOptions::default()
            .with_worker_id("relay-test")
            .with_max_attempts(1_000),
    );
    users.create_user("Ada", "ada@example.com").unwrap();
    users.create_user("Bob", "bob@example.com").unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(broker.is_empty());

    broker.set_reachable(true);
    assert!(wait_until(|| broker.find_all_by_type("UserCreated").len() == 2));

    let stats = relay.stop();
    assert_eq!(stats.published, 2);
    assert!(store
        .outbox_records()
        .unwrap()
        .iter()
        .all(|r| r.status == OutboxStatus::Published));
}

#[test]
fn relay_preserves_staging_order() {
    let broker = InMemoryBroker::new();
    let store = InMemoryStore::new();
    let orders = OrderService::new(store.clone(), StagedPublisher::new(store.clone()));

    let id = orders.create_order("7", 12.5).unwrap();
    orders.update_order_status(&id, OrderStatus::Completed).unwrap();

    let drained = drain_once(&store, &publisher(&broker), &RelayOptions::default()).unwrap();
    assert_eq!(drained.published, 3);
    assert_eq!(
        broker.event_types(),
        vec!["OrderCreated", "OrderUpdated", "OrderCompleted"]
    );
}
