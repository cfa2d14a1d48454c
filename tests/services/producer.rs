//! Persist-then-publish on the producer side.

use event_driven::bus::InMemoryBroker;
use event_driven::event::{EventType, Payload};
use event_driven::producer::{OrderService, ServiceError, UserService};
use event_driven::store::{InMemoryStore, OrderStatus, StoreError, UserStore};

use crate::support::{capture_logs, publisher, wait_until};

#[test]
fn user_is_created_while_the_bus_is_down() {
    let broker = InMemoryBroker::new();
    let store = InMemoryStore::new();
    let service = UserService::new(store.clone(), publisher(&broker));

    broker.set_reachable(false);
    let (id, logs) = capture_logs(|| service.create_user("Ada", "ada@example.com").unwrap());

    assert!(!id.is_empty());
    assert_eq!(store.get_user(&id).unwrap().name, "Ada");
    assert!(broker.is_empty());

    let lost = logs.on_target("reconciliation", "ERROR");
    assert_eq!(lost.len(), 1);
    let fields = &lost[0]["fields"];
    assert_eq!(fields["entity"], "user");
    assert_eq!(fields["entity_id"], id.as_str());
    assert_eq!(fields["event_type"], "UserCreated");
    assert!(!fields["error"].as_str().unwrap().is_empty());
    let event: serde_json::Value = serde_json::from_str(fields["event"].as_str().unwrap()).unwrap();
    assert_eq!(event["event_type"], "UserCreated");
    assert_eq!(event["payload"]["user_id"], id.as_str());
}

#[test]
fn user_created_event_carries_the_generated_id() {
    let broker = InMemoryBroker::new();
    let service = UserService::new(InMemoryStore::new(), publisher(&broker));

    let id = service.create_user("Ada", "ada@example.com").unwrap();

    let event = broker.find_by_type("UserCreated").unwrap();
    match event.payload() {
        Payload::UserCreated(p) => {
            assert_eq!(p.user_id, id);
            assert_eq!(p.email, "ada@example.com");
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn failed_write_publishes_nothing() {
    let broker = InMemoryBroker::new();
    let store = InMemoryStore::new();
    let service = OrderService::new(store.clone(), publisher(&broker));

    store.set_available(false);
    assert!(matches!(
        service.create_order("7", 10.0),
        Err(ServiceError::Store(StoreError::Unavailable(_)))
    ));
    assert!(broker.is_empty());
}

#[test]
fn completing_an_order_announces_both_events() {
    let broker = InMemoryBroker::new();
    let service = OrderService::new(InMemoryStore::new(), publisher(&broker));

    let id = service.create_order("7", 19.99).unwrap();
    let order = service.update_order_status(&id, OrderStatus::Completed).unwrap();
    assert_eq!(order.status, OrderStatus::Completed);

    assert_eq!(
        broker.event_types(),
        vec!["OrderCreated", "OrderUpdated", "OrderCompleted"]
    );
    match broker.find_by_type("OrderUpdated").unwrap().payload() {
        Payload::OrderUpdated(p) => {
            assert_eq!(p.status, "completed");
            assert_eq!(p.amount, 19.99);
            assert_eq!(p.user_id, "7");
        }
        other => panic!("unexpected payload {other:?}"),
    }
    let completed = broker.find_by_type("OrderCompleted").unwrap();
    assert_eq!(completed.event_type(), Some(EventType::OrderCompleted));
    match completed.payload() {
        Payload::Generic { fields, .. } => {
            assert_eq!(fields.require_str("order_id").unwrap(), id);
            assert!(fields.require_str("completed_at").is_ok());
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn cancellation_is_persisted_even_if_announcements_are_lost() {
    let broker = InMemoryBroker::new();
    let service = OrderService::new(InMemoryStore::new(), publisher(&broker));
    let id = service.create_order("7", 5.0).unwrap();

    broker.set_reachable(false);
    let order = service.update_order_status(&id, OrderStatus::Cancelled).unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(service.get_order(&id).unwrap().status, OrderStatus::Cancelled);
    assert_eq!(broker.event_types(), vec!["OrderCreated"]);
}

#[test]
fn store_without_status_updates_is_reported() {
    let broker = InMemoryBroker::new();
    let service = OrderService::new(
        InMemoryStore::new().without_status_updates(),
        publisher(&broker),
    );
    let id = service.create_order("7", 5.0).unwrap();

    assert_eq!(
        service.update_order_status(&id, OrderStatus::Processing),
        Err(ServiceError::Unsupported("order status updates"))
    );
    assert_eq!(broker.event_types(), vec!["OrderCreated"]);
}

#[test]
fn producer_recovers_once_the_bus_returns() {
    let broker = InMemoryBroker::new();
    let service = UserService::new(InMemoryStore::new(), publisher(&broker));

    broker.set_reachable(false);
    service.create_user("Ada", "ada@example.com").unwrap();
    broker.set_reachable(true);

    assert!(wait_until(|| {
        service.create_user("Bob", "bob@example.com").unwrap();
        !broker.is_empty()
    }));
    assert_eq!(broker.find_all_by_type("UserCreated").len(), 1);
}
