//! Event to notification mapping.

use chrono::{SubsecRound, Utc};

use crate::bus::HandlerError;
use crate::event::{Event, EventType, Fields, Notification, Payload};

/// Tags the consumer knows how to turn into a notification.
pub const SUPPORTED: [EventType; 5] = [
    EventType::UserCreated,
    EventType::UserUpdated,
    EventType::OrderCreated,
    EventType::OrderCompleted,
    EventType::OrderCancelled,
];

pub fn supports(event_type: EventType) -> bool {
    SUPPORTED.contains(&event_type)
}

/// Build the notification for `event`, validating the fields it needs.
pub fn compose(event: &Event) -> Result<Notification, HandlerError> {
    let (user_id, kind, message) = match event.payload() {
        Payload::UserCreated(p) => (
            p.user_id.clone(),
            "welcome",
            format!("Welcome {}! Your account has been created successfully.", p.name),
        ),
        Payload::UserUpdated(p) => (
            p.user_id.clone(),
            "profile_update",
            format!("Your profile has been updated successfully, {}.", p.name),
        ),
        Payload::OrderCreated(p) => (
            p.user_id.clone(),
            "order_confirmation",
            format!(
                "Your order #{} for ${:.2} has been created and is being processed.",
                p.order_id, p.amount
            ),
        ),
        Payload::Generic {
            event_type: EventType::OrderCompleted,
            fields,
        } => {
            let (user_id, order_id) = order_ids(fields)?;
            (
                user_id,
                "order_completed",
                format!("Your order #{order_id} has been completed successfully!"),
            )
        }
        Payload::Generic {
            event_type: EventType::OrderCancelled,
            fields,
        } => {
            let (user_id, order_id) = order_ids(fields)?;
            (
                user_id,
                "order_cancelled",
                format!("Your order #{order_id} has been cancelled."),
            )
        }
        other => {
            return Err(HandlerError::Failed(format!(
                "no notification for {} events",
                other.tag()
            )))
        }
    };

    Ok(Notification {
        user_id,
        kind: kind.to_string(),
        message,
        sent_at: Utc::now().trunc_subsecs(0),
    })
}

fn order_ids(fields: &Fields) -> Result<(String, String), HandlerError> {
    let user_id = fields.require_str("user_id")?.to_string();
    let order_id = fields.require_str("order_id")?.to_string();
    Ok((user_id, order_id))
}
