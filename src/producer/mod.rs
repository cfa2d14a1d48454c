//! Producer services: persist first, then publish best-effort.
//!
//! The store write is authoritative. Once it succeeds the operation succeeds,
//! whatever happens to the event afterwards. A failed publish is logged on the
//! `reconciliation` target with the full serialized event so an operator can
//! re-send it. Route that target somewhere durable, or swap the bus publisher
//! for an [`outbox::StagedPublisher`](crate::outbox::StagedPublisher).

mod order;
mod user;

use tracing::error;

pub use order::OrderService;
pub use user::UserService;

use crate::bus::Publisher;
use crate::event::Event;
use crate::store::StoreError;

/// Errors surfaced by producer operations. Never a publish failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("store does not support {0}")]
    Unsupported(&'static str),
}

/// Whether a best-effort publish reached the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Published,
    Lost,
}

/// Publish `event` under its type tag, logging instead of failing.
pub fn publish_best_effort<P>(publisher: &P, entity: &'static str, entity_id: &str, event: &Event) -> Delivery
where
    P: Publisher + ?Sized,
{
    match publisher.publish_event(event) {
        Ok(()) => Delivery::Published,
        Err(err) => {
            let serialized = match event.encode() {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(encode) => format!("<unencodable: {encode}>"),
            };
            error!(
                target: "reconciliation",
                entity,
                entity_id,
                event_type = event.tag(),
                event = %serialized,
                error = %err,
                "event not published after successful write"
            );
            Delivery::Lost
        }
    }
}
