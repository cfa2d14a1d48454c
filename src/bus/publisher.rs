//! Publishing events to the bus.

use std::sync::Arc;

use tracing::debug;

use super::connection::{ConnectOptions, Connection, ConnectionError};
use crate::event::{EncodeError, Event};
use crate::store::StoreError;

/// Error type for publish operations.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The envelope could not be encoded; nothing was sent.
    #[error(transparent)]
    Serialization(#[from] EncodeError),
    /// The bus did not accept the bytes.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// The event could not be written to the outbox.
    #[error("failed to stage event: {0}")]
    Staging(#[from] StoreError),
}

/// Trait for publishing events to a message bus.
///
/// A successful return means the transport accepted the bytes, nothing more:
/// no subscriber has necessarily seen the event. Implementations do not retry.
pub trait Publisher: Send + Sync {
    /// Publish `event` under an explicit subject.
    fn publish(&self, subject: &str, event: &Event) -> Result<(), PublishError>;

    /// Publish `event` under its own type tag, the conventional subject.
    fn publish_event(&self, event: &Event) -> Result<(), PublishError> {
        self.publish(event.tag(), event)
    }

    /// Publish several events in order, stopping at the first failure.
    fn publish_batch(&self, events: &[Event]) -> Result<(), PublishError> {
        for event in events {
            self.publish_event(event)?;
        }
        Ok(())
    }
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish(&self, subject: &str, event: &Event) -> Result<(), PublishError> {
        (**self).publish(subject, event)
    }
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
    fn publish(&self, subject: &str, event: &Event) -> Result<(), PublishError> {
        (**self).publish(subject, event)
    }
}

/// [`Publisher`] over a dedicated [`Connection`].
pub struct BusPublisher {
    connection: Connection,
}

impl BusPublisher {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Open a dedicated connection to `address`.
    pub fn connect(address: &str, options: ConnectOptions) -> Result<Self, ConnectionError> {
        Connection::connect(address, options).map(Self::new)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Close the underlying connection. Idempotent.
    pub fn close(&self) {
        self.connection.close();
    }
}

impl Publisher for BusPublisher {
    fn publish(&self, subject: &str, event: &Event) -> Result<(), PublishError> {
        let bytes = event.encode()?;
        self.connection.publish(subject, &bytes)?;
        debug!(subject, bytes = bytes.len(), "event published");
        Ok(())
    }
}
