//! The closed set of event-type tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every event kind the services exchange.
///
/// The wire tag (`as_str`) doubles as the bus subject, so publishers and
/// subscribers route on this value without a separate routing table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    UserCreated,
    UserUpdated,
    UserDeleted,
    OrderCreated,
    OrderUpdated,
    OrderCancelled,
    OrderCompleted,
    NotificationSent,
    NotificationFailed,
}

/// How a tag's payload is decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schema {
    /// A dedicated payload struct; missing fields fail the decode.
    Strict,
    /// A generic key/value bag; consumers validate the fields they read.
    Loose,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::UserCreated,
        EventType::UserUpdated,
        EventType::UserDeleted,
        EventType::OrderCreated,
        EventType::OrderUpdated,
        EventType::OrderCancelled,
        EventType::OrderCompleted,
        EventType::NotificationSent,
        EventType::NotificationFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserCreated => "UserCreated",
            EventType::UserUpdated => "UserUpdated",
            EventType::UserDeleted => "UserDeleted",
            EventType::OrderCreated => "OrderCreated",
            EventType::OrderUpdated => "OrderUpdated",
            EventType::OrderCancelled => "OrderCancelled",
            EventType::OrderCompleted => "OrderCompleted",
            EventType::NotificationSent => "NotificationSent",
            EventType::NotificationFailed => "NotificationFailed",
        }
    }

    /// The payload schema registered for this tag.
    pub fn schema(&self) -> Schema {
        match self {
            EventType::UserDeleted | EventType::OrderCancelled | EventType::OrderCompleted => {
                Schema::Loose
            }
            _ => Schema::Strict,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the known tags.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}
