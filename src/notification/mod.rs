//! Consumer side: turn domain events into user notifications.
//!
//! One subscription per configured event type, each routed to the same
//! handler. A message that fails to decode never reaches the handler (the
//! dispatcher logs and drops it); one with missing fields is logged and
//! dropped here. Delivery is fire-and-forget, so a redelivered event produces
//! a second notification.

mod messages;
mod notifier;

use std::sync::Arc;

use tracing::{info, warn};

pub use messages::{compose, supports, SUPPORTED};
pub use notifier::{LogNotifier, Notifier, NotifyError, RecordingNotifier};

use crate::bus::{EventHandler, HandlerError, Publisher, SubscribeError, Subscriber};
use crate::event::{Event, EventType};
use crate::producer::publish_best_effort;

struct Inner {
    notifier: Arc<dyn Notifier>,
    publisher: Option<Arc<dyn Publisher>>,
}

impl EventHandler for Inner {
    fn handle(&self, event: Event) -> Result<(), HandlerError> {
        let notification = compose(&event)?;
        info!(
            event_type = event.tag(),
            user_id = %notification.user_id,
            kind = %notification.kind,
            "dispatching notification"
        );

        let outcome = self.notifier.send(&notification);
        if let Some(publisher) = &self.publisher {
            let report = match &outcome {
                Ok(()) => Event::notification_sent(
                    &notification.user_id,
                    &notification.kind,
                    &notification.message,
                ),
                Err(_) => Event::notification_failed(
                    &notification.user_id,
                    &notification.kind,
                    &notification.message,
                ),
            };
            publish_best_effort(publisher.as_ref(), "notification", &notification.user_id, &report);
        }

        outcome.map_err(|err| {
            warn!(user_id = %notification.user_id, error = %err, "notification not delivered");
            HandlerError::other(err)
        })
    }
}

/// Subscribes the notification handler to a set of event types.
pub struct NotificationService {
    inner: Arc<Inner>,
    subscriptions: Vec<EventType>,
}

impl NotificationService {
    pub fn new(notifier: impl Notifier + 'static) -> Self {
        Self::with_notifier(Arc::new(notifier))
    }

    pub fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            inner: Arc::new(Inner {
                notifier,
                publisher: None,
            }),
            subscriptions: SUPPORTED.to_vec(),
        }
    }

    /// Replace the default subscription set. Repeated types are kept once.
    pub fn with_subscriptions(mut self, subscriptions: Vec<EventType>) -> Self {
        self.subscriptions.clear();
        for event_type in subscriptions {
            if !self.subscriptions.contains(&event_type) {
                self.subscriptions.push(event_type);
            }
        }
        self
    }

    /// Report each dispatch as `NotificationSent` or `NotificationFailed`.
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.inner = Arc::new(Inner {
            notifier: Arc::clone(&self.inner.notifier),
            publisher: Some(publisher),
        });
        self
    }

    pub fn subscriptions(&self) -> &[EventType] {
        &self.subscriptions
    }

    /// Subscribe once per configured type.
    ///
    /// Every type is checked before any subscription is made, so an
    /// unsupported type leaves `subscriber` untouched.
    pub fn start(&self, subscriber: &dyn Subscriber) -> Result<(), SubscribeError> {
        if let Some(unsupported) = self.subscriptions.iter().find(|t| !supports(**t)) {
            return Err(SubscribeError::Unsupported(unsupported.to_string()));
        }

        let handler: Arc<dyn EventHandler> = self.inner.clone();
        for event_type in &self.subscriptions {
            subscriber.subscribe(event_type.as_str(), Arc::clone(&handler))?;
        }
        info!(subscriptions = ?self.subscriptions, "notification service subscribed");
        Ok(())
    }
}
