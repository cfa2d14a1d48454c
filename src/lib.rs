//! Event distribution core for small services.
//!
//! Producers persist an entity, then publish a typed [`Event`] to the bus on
//! a best-effort basis. Consumers subscribe per event type and dispatch each
//! message to a handler on a bounded worker pool. The bus connection owns its
//! reconnect loop and restores subscriptions after a redial.
//!
//! ```
//! use std::sync::Arc;
//! use event_driven::bus::{BusPublisher, ConnectOptions, Connection, InMemoryBroker, Publisher};
//! use event_driven::Event;
//!
//! let broker = InMemoryBroker::new();
//! let connection =
//!     Connection::open("memory://doc", ConnectOptions::default(), Arc::new(broker.clone())).unwrap();
//! let publisher = BusPublisher::new(connection);
//!
//! publisher.publish_event(&Event::order_created("42", "7", 19.99)).unwrap();
//! assert_eq!(broker.event_types(), vec!["OrderCreated"]);
//! ```

pub mod bus;
pub mod config;
pub mod event;
pub mod notification;
pub mod outbox;
pub mod producer;
pub mod store;
pub mod telemetry;

pub use bus::{
    BusPublisher, BusSubscriber, Connection, ConnectionError, ConnectionState, EventHandler,
    HandlerError, PublishError, Publisher, SubscribeError, Subscriber,
};
pub use config::{ConfigError, Settings};
pub use event::{DecodeError, EncodeError, Event, EventType, Payload};
pub use notification::{LogNotifier, NotificationService, Notifier};
pub use outbox::{OutboxRelay, StagedPublisher};
pub use producer::{OrderService, ServiceError, UserService};
pub use store::{InMemoryStore, OrderStatus, StoreError};
