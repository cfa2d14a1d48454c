//! Event envelope and type registry.
//!
//! An [`Event`] is a typed [`Payload`] plus a UTC timestamp. On the wire it
//! is a JSON document with exactly three fields:
//!
//! ```text
//! { "event_type": "OrderCreated", "payload": { ... }, "timestamp": "2024-01-01T00:00:00Z" }
//! ```
//!
//! The registry is the match in `Payload::from_value`: every [`EventType`]
//! maps to either a strict payload struct or a loose [`Fields`] bag.
//! Tags this build does not know survive as [`Payload::Extension`].
//!
//! ```
//! use event_driven::event::{Event, EventType};
//!
//! let event = Event::order_created("42", "7", 19.99);
//! let bytes = event.encode().unwrap();
//! let decoded = Event::decode(&bytes).unwrap();
//! assert_eq!(decoded.event_type(), Some(EventType::OrderCreated));
//! ```

mod envelope;
mod event_type;
mod payload;

pub use envelope::{DecodeError, EncodeError, Event};
pub use event_type::{EventType, Schema, UnknownEventType};
pub use payload::{
    FieldError, Fields, Notification, OrderCreated, OrderUpdated, Payload, UserCreated,
    UserUpdated,
};
