//! The wire envelope: `{ event_type, payload, timestamp }`.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event_type::EventType;
use super::payload::{
    rfc3339, Fields, Notification, OrderCreated, OrderUpdated, Payload, UserCreated, UserUpdated,
};

/// Failure to turn an event into bytes.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode {event_type} event: {source}")]
pub struct EncodeError {
    pub event_type: String,
    #[source]
    pub source: serde_json::Error,
}

/// Failure to decode one message. Never fatal to a subscription.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("{event_type} payload does not match its schema: {source}")]
    Payload {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },
    #[error("{event_type} payload must be an object")]
    NotAnObject { event_type: EventType },
}

#[derive(Serialize)]
struct WireOut<'a> {
    event_type: &'a str,
    payload: Value,
    #[serde(with = "rfc3339")]
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct WireIn {
    event_type: String,
    payload: Value,
    #[serde(with = "rfc3339")]
    timestamp: DateTime<Utc>,
}

/// One domain occurrence as it travels over the bus.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    payload: Payload,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Wrap a payload, stamped with the current UTC second.
    pub fn new(payload: Payload) -> Self {
        Self::at(payload, now())
    }

    pub fn at(payload: Payload, timestamp: DateTime<Utc>) -> Self {
        Self { payload, timestamp }
    }

    pub fn user_created(
        user_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self::new(Payload::UserCreated(UserCreated {
            user_id: user_id.into(),
            name: name.into(),
            email: email.into(),
            created_at: now(),
        }))
    }

    pub fn user_updated(
        user_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self::new(Payload::UserUpdated(UserUpdated {
            user_id: user_id.into(),
            name: name.into(),
            email: email.into(),
            updated_at: now(),
        }))
    }

    /// New orders always start out `pending`.
    pub fn order_created(order_id: impl Into<String>, user_id: impl Into<String>, amount: f64) -> Self {
        Self::new(Payload::OrderCreated(OrderCreated {
            order_id: order_id.into(),
            user_id: user_id.into(),
            amount,
            status: "pending".to_string(),
            created_at: now(),
        }))
    }

    pub fn order_updated(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        amount: f64,
        status: impl Into<String>,
    ) -> Self {
        Self::new(Payload::OrderUpdated(OrderUpdated {
            order_id: order_id.into(),
            user_id: user_id.into(),
            amount,
            status: status.into(),
            updated_at: now(),
        }))
    }

    pub fn order_cancelled(order_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::order_transition(EventType::OrderCancelled, "cancelled_at", order_id, user_id)
    }

    pub fn order_completed(order_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::order_transition(EventType::OrderCompleted, "completed_at", order_id, user_id)
    }

    fn order_transition(
        event_type: EventType,
        stamp_field: &str,
        order_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let fields = Fields::new()
            .with("order_id", order_id.into())
            .with("user_id", user_id.into())
            .with(stamp_field, rfc3339::format(&now()));
        Self::new(Payload::Generic { event_type, fields })
    }

    pub fn notification_sent(
        user_id: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Payload::NotificationSent(notification(user_id, kind, message)))
    }

    pub fn notification_failed(
        user_id: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Payload::NotificationFailed(notification(user_id, kind, message)))
    }

    /// Wire tag of this event; the conventional subject.
    pub fn tag(&self) -> &str {
        self.payload.tag()
    }

    pub fn event_type(&self) -> Option<EventType> {
        self.payload.event_type()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Serialize to the JSON envelope.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let encode_error = |source| EncodeError {
            event_type: self.tag().to_string(),
            source,
        };
        let wire = WireOut {
            event_type: self.tag(),
            payload: self.payload.to_value().map_err(encode_error)?,
            timestamp: self.timestamp,
        };
        serde_json::to_vec(&wire).map_err(encode_error)
    }

    /// Parse a JSON envelope, decoding the payload by its tag.
    ///
    /// Unknown fields are ignored at every level.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireIn = serde_json::from_slice(bytes).map_err(DecodeError::Envelope)?;
        let payload = Payload::from_value(&wire.event_type, wire.payload)?;
        Ok(Self::at(payload, wire.timestamp))
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn notification(
    user_id: impl Into<String>,
    kind: impl Into<String>,
    message: impl Into<String>,
) -> Notification {
    Notification {
        user_id: user_id.into(),
        kind: kind.into(),
        message: message.into(),
        sent_at: now(),
    }
}
