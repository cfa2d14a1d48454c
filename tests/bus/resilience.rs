//! Reconnect, exhaustion, shutdown and backpressure.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use event_driven::bus::{
    handler, BusPublisher, BusSubscriber, ConnectOptions, Connection, ConnectionError,
    ConnectionState, DispatchConfig, InMemoryBroker, PublishError, Publisher, ReconnectPolicy,
    SubscribeError, Subscriber,
};
use event_driven::Event;

use crate::support::{connection, pair, wait_until, Collector};

#[test]
fn publish_on_failed_connection_returns_an_error() {
    let broker = InMemoryBroker::new();
    let options = ConnectOptions::new("doomed")
        .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(5), 2))
        .with_heartbeat(None);
    let publisher = BusPublisher::new(
        Connection::open("memory://tests", options, Arc::new(broker.clone())).unwrap(),
    );

    broker.set_reachable(false);
    let first = publisher.publish_event(&Event::order_created("1", "7", 1.0));
    assert!(matches!(
        first,
        Err(PublishError::Connection(ConnectionError::Disconnected { .. }))
    ));

    assert!(wait_until(|| publisher.connection().state() == ConnectionState::Failed));
    broker.set_reachable(true);
    assert!(matches!(
        publisher.publish_event(&Event::order_created("2", "7", 1.0)),
        Err(PublishError::Connection(ConnectionError::Failed { attempts: 2, .. }))
    ));
    assert!(broker.is_empty());
}

#[test]
fn subscriptions_survive_a_bus_restart() {
    let broker = InMemoryBroker::new();
    let (publisher, subscriber) = pair(&broker);
    let collector = Collector::default();
    subscriber.subscribe("UserCreated", collector.handler()).unwrap();

    broker.set_reachable(false);
    assert!(wait_until(|| !subscriber.connection().is_connected()));
    assert!(publisher
        .publish_event(&Event::user_created("1", "Ada", "ada@example.com"))
        .is_err());

    broker.set_reachable(true);
    assert!(wait_until(|| subscriber.connection().is_connected()
        && publisher.connection().is_connected()));
    assert_eq!(broker.subscriber_count("UserCreated"), 1);

    publisher
        .publish_event(&Event::user_created("2", "Bob", "bob@example.com"))
        .unwrap();
    assert!(wait_until(|| collector.len() == 1));
}

#[test]
fn close_is_idempotent_and_prompt() {
    let broker = InMemoryBroker::new();
    let (publisher, subscriber) = pair(&broker);
    subscriber
        .subscribe_all(&["OrderCompleted", "OrderCancelled"], handler(|_| Ok(())))
        .unwrap();

    broker.set_reachable(false);
    let _ = publisher.publish_event(&Event::order_completed("1", "7"));

    let started = Instant::now();
    subscriber.close();
    subscriber.close();
    publisher.close();
    publisher.close();
    assert!(started.elapsed() < Duration::from_millis(500));

    assert!(matches!(
        subscriber.subscribe("OrderCompleted", handler(|_| Ok(()))),
        Err(SubscribeError::Closed)
    ));
    assert!(matches!(
        publisher.publish_event(&Event::order_completed("1", "7")),
        Err(PublishError::Connection(ConnectionError::Closed))
    ));
    subscriber.join(Duration::from_secs(1));

    broker.set_reachable(true);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(subscriber.connection().state(), ConnectionState::Closed);
    assert_eq!(broker.subscriber_count("OrderCompleted"), 0);
}

#[test]
fn full_queue_drops_instead_of_growing() {
    let broker = InMemoryBroker::new();
    let publisher = BusPublisher::new(connection(&broker, "publisher"));
    let subscriber = BusSubscriber::new(
        connection(&broker, "slow-subscriber"),
        DispatchConfig {
            workers: 1,
            queue_capacity: 1,
        },
    )
    .unwrap();
    subscriber
        .subscribe(
            "OrderCreated",
            handler(|_| {
                thread::sleep(Duration::from_millis(50));
                Ok(())
            }),
        )
        .unwrap();

    for i in 0..10 {
        publisher
            .publish_event(&Event::order_created(i.to_string(), "7", 1.0))
            .unwrap();
    }

    let stats = subscriber.stats();
    assert!(stats.dropped > 0);
    assert_eq!(stats.received + stats.dropped, 10);
    assert!(wait_until(|| subscriber.stats().handled == stats.received));
}
