//! Delivery, decoding and handler isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use event_driven::bus::{handler, HandlerError, InMemoryBroker, Publisher, Subscriber};
use event_driven::event::{Event, Payload};
use serde_json::{json, Value};

use crate::support::{pair, wait_until, Collector};

#[test]
fn every_published_event_is_handled_once() {
    let broker = InMemoryBroker::new();
    let (publisher, subscriber) = pair(&broker);
    let collector = Collector::default();
    subscriber.subscribe("OrderCreated", collector.handler()).unwrap();

    for i in 0..50 {
        publisher
            .publish_event(&Event::order_created(i.to_string(), "7", 1.0 + i as f64))
            .unwrap();
    }

    assert!(wait_until(|| collector.len() == 50));
    let mut ids: Vec<u32> = collector
        .events()
        .iter()
        .map(|event| match event.payload() {
            Payload::OrderCreated(p) => p.order_id.parse().unwrap(),
            other => panic!("unexpected payload {other:?}"),
        })
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..50).collect::<Vec<_>>());
    assert_eq!(subscriber.stats().handled, 50);
}

#[test]
fn order_created_arrives_field_for_field() {
    let broker = InMemoryBroker::new();
    let (_publisher, subscriber) = pair(&broker);
    let collector = Collector::default();
    subscriber.subscribe("OrderCreated", collector.handler()).unwrap();

    let wire = json!({
        "event_type": "OrderCreated",
        "payload": {
            "order_id": "42",
            "user_id": "7",
            "amount": 19.99,
            "status": "pending",
            "created_at": "2024-01-01T00:00:00Z"
        },
        "timestamp": "2024-01-01T00:00:00Z"
    });
    broker.inject("OrderCreated", wire.to_string().as_bytes());

    assert!(wait_until(|| collector.len() == 1));
    let event = collector.events().remove(0);
    let at: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
    assert_eq!(event.timestamp(), at);
    match event.payload() {
        Payload::OrderCreated(p) => {
            assert_eq!(p.order_id, "42");
            assert_eq!(p.user_id, "7");
            assert_eq!(p.amount, 19.99);
            assert_eq!(p.status, "pending");
            assert_eq!(p.created_at, at);
        }
        other => panic!("unexpected payload {other:?}"),
    }

    let reencoded: Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
    assert_eq!(reencoded, wire);
}

#[test]
fn malformed_payload_does_not_end_the_subscription() {
    let broker = InMemoryBroker::new();
    let (publisher, subscriber) = pair(&broker);
    let collector = Collector::default();
    subscriber.subscribe("OrderCreated", collector.handler()).unwrap();

    let missing_amount = json!({
        "event_type": "OrderCreated",
        "payload": { "order_id": "1", "user_id": "7", "status": "pending", "created_at": "2024-01-01T00:00:00Z" },
        "timestamp": "2024-01-01T00:00:00Z"
    });
    broker.inject("OrderCreated", missing_amount.to_string().as_bytes());
    broker.inject("OrderCreated", b"\xff\xfe not json");
    publisher.publish_event(&Event::order_created("2", "7", 5.0)).unwrap();

    assert!(wait_until(|| collector.len() == 1));
    assert!(wait_until(|| subscriber.stats().decode_failed == 2));
    assert_eq!(broker.subscriber_count("OrderCreated"), 1);
}

#[test]
fn failing_and_panicking_handlers_leave_workers_running() {
    let broker = InMemoryBroker::new();
    let (publisher, subscriber) = pair(&broker);
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);

    subscriber
        .subscribe(
            "OrderCreated",
            handler(move |event| {
                let Payload::OrderCreated(p) = event.payload() else {
                    return Err(HandlerError::msg("not an order"));
                };
                match p.order_id.as_str() {
                    "panic" => panic!("handler blew up"),
                    "fail" => Err(HandlerError::msg("rejected")),
                    _ => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            }),
        )
        .unwrap();

    for id in ["panic", "fail", "1", "2"] {
        publisher.publish_event(&Event::order_created(id, "7", 1.0)).unwrap();
    }

    assert!(wait_until(|| handled.load(Ordering::SeqCst) == 2));
    assert!(wait_until(|| subscriber.stats().failed == 2));
}

#[test]
fn unknown_event_types_reach_their_subscribers() {
    let broker = InMemoryBroker::new();
    let (_publisher, subscriber) = pair(&broker);
    let collector = Collector::default();
    subscriber.subscribe("InvoiceIssued", collector.handler()).unwrap();

    let wire = json!({
        "event_type": "InvoiceIssued",
        "payload": { "invoice_id": "inv-1" },
        "timestamp": "2024-01-01T00:00:00Z"
    });
    broker.inject("InvoiceIssued", wire.to_string().as_bytes());

    assert!(wait_until(|| collector.len() == 1));
    let event = collector.events().remove(0);
    assert_eq!(event.tag(), "InvoiceIssued");
    assert_eq!(event.event_type(), None);
}
