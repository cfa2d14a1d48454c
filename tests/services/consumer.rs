//! Notification dispatch fed by real producer traffic.

use std::sync::Arc;

use event_driven::bus::{InMemoryBroker, Publisher, Subscriber};
use event_driven::event::Payload;
use event_driven::notification::{NotificationService, RecordingNotifier};
use event_driven::producer::{OrderService, UserService};
use event_driven::store::{InMemoryStore, OrderStatus};
use serde_json::json;

use crate::support::{publisher, subscriber, wait_until};

#[test]
fn bad_cancellation_does_not_block_later_completions() {
    let broker = InMemoryBroker::new();
    let subscriber = subscriber(&broker);
    let notifier = Arc::new(RecordingNotifier::new());
    NotificationService::with_notifier(notifier.clone())
        .start(&subscriber)
        .unwrap();

    let missing_order_id = json!({
        "event_type": "OrderCancelled",
        "payload": { "user_id": "7", "cancelled_at": "2024-01-01T00:00:00Z" },
        "timestamp": "2024-01-01T00:00:00Z"
    });
    broker.inject("OrderCancelled", missing_order_id.to_string().as_bytes());
    publisher(&broker)
        .publish_event(&event_driven::Event::order_completed("42", "7"))
        .unwrap();

    assert!(wait_until(|| notifier.len() == 1));
    let sent = notifier.sent();
    assert_eq!(sent[0].kind, "order_completed");
    assert_eq!(sent[0].message, "Your order #42 has been completed successfully!");
    assert!(wait_until(|| subscriber.stats().failed == 1));
    assert_eq!(broker.subscriber_count("OrderCancelled"), 1);
}

#[test]
fn producers_drive_notifications_end_to_end() {
    let broker = InMemoryBroker::new();
    let subscriber = subscriber(&broker);
    let notifier = Arc::new(RecordingNotifier::new());
    NotificationService::with_notifier(notifier.clone())
        .with_publisher(Arc::new(publisher(&broker)))
        .start(&subscriber)
        .unwrap();

    let store = InMemoryStore::new();
    let users = UserService::new(store.clone(), publisher(&broker));
    let orders = OrderService::new(store, publisher(&broker));

    let user_id = users.create_user("Ada", "ada@example.com").unwrap();
    let order_id = orders.create_order(&user_id, 19.99).unwrap();
    orders
        .update_order_status(&order_id, OrderStatus::Cancelled)
        .unwrap();

    // UserCreated, OrderCreated and OrderCancelled notify; OrderUpdated does not.
    assert!(wait_until(|| notifier.len() == 3));
    let mut kinds: Vec<String> = notifier.sent().into_iter().map(|n| n.kind).collect();
    kinds.sort();
    assert_eq!(kinds, vec!["order_cancelled", "order_confirmation", "welcome"]);

    assert!(wait_until(|| broker.find_all_by_type("NotificationSent").len() == 3));
    for event in broker.find_all_by_type("NotificationSent") {
        match event.payload() {
            Payload::NotificationSent(n) => assert_eq!(n.user_id, user_id),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}

#[test]
fn rejected_delivery_is_reported_as_failed() {
    let broker = InMemoryBroker::new();
    let subscriber = subscriber(&broker);
    let notifier = Arc::new(RecordingNotifier::new().rejecting("13"));
    NotificationService::with_notifier(notifier.clone())
        .with_publisher(Arc::new(publisher(&broker)))
        .start(&subscriber)
        .unwrap();

    publisher(&broker)
        .publish_event(&event_driven::Event::user_created("13", "Eve", "eve@example.com"))
        .unwrap();

    assert!(wait_until(|| broker.find_by_type("NotificationFailed").is_some()));
    assert!(notifier.is_empty());
    assert!(wait_until(|| subscriber.stats().failed == 1));
}
