//! Event bus: connection management, publishing and subscribing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐                 ┌──────────────────────────────┐
//! │   BusPublisher   │                 │        BusSubscriber         │
//! │ publish(subj, e) │                 │ subscribe(subj, handler)     │
//! └────────┬─────────┘                 │  sink ─▶ bounded queue ─▶ N  │
//!          │                           │          workers: decode,    │
//!          │                           │          handle, count       │
//!          │                           └──────────────┬───────────────┘
//!          ▼                                          ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ Connection: Connected ─▶ Reconnecting{n} ─▶ Connected | Failed      │
//! │             subscriptions restored after every successful redial    │
//! └────────────────────────────────┬────────────────────────────────────┘
//!                                  │ Dialer / Link
//!                 ┌────────────────┴──────────────┐
//!                 ▼                               ▼
//!        ┌─────────────────┐             ┌─────────────────┐
//!        │ InMemoryBroker  │             │   NatsDialer    │
//!        │   memory://     │             │ nats:// (feat.) │
//!        └─────────────────┘             └─────────────────┘
//! ```
//!
//! The subject of every message is the event's type tag. Delivery is
//! at-most-once: nothing is replayed after a reconnect, and a full dispatch
//! queue drops messages.

mod connection;
mod dispatch;
mod in_memory;
#[cfg(feature = "nats")]
mod nats;
mod publisher;
mod subscriber;
pub mod transport;

pub use connection::{
    ConnectOptions, Connection, ConnectionError, ConnectionState, ReconnectPolicy, SubscriptionId,
};
pub use dispatch::{DispatchConfig, DispatchStats};
pub use in_memory::{InMemoryBroker, DEFAULT_LOG_CAPACITY};
#[cfg(feature = "nats")]
pub use nats::NatsDialer;
pub use publisher::{BusPublisher, PublishError, Publisher};
pub use subscriber::{handler, BusSubscriber, EventHandler, HandlerError, SubscribeError, Subscriber};
pub use transport::{Dialer, Link, Message, Sink, TransportError};
