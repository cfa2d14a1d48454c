//! Subscribing handlers to subjects.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::connection::{ConnectOptions, Connection, ConnectionError};
use super::dispatch::{DispatchConfig, DispatchStats, Dispatcher, Job};
use super::transport::{Message, Sink};
use crate::event::{Event, EventType, FieldError};

/// Why a handler gave up on one event. Logged, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error("expected a {expected} payload, got {actual}")]
    UnexpectedPayload { expected: EventType, actual: String },
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        HandlerError::Other(Box::new(err))
    }
}

/// Processes one decoded event.
///
/// Handlers run on the subscriber's worker threads, possibly several at once.
/// Each received message is handled at most once: an `Err` is logged and the
/// message is gone.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: Event) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(Event) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: Event) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Box a closure as a shareable handler.
pub fn handler<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("subscriber is closed")]
    Closed,
    /// The consumer has no handler for this subject.
    #[error("no handler for subject {0}")]
    Unsupported(String),
    #[error("failed to start dispatch workers: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Trait for registering push-style handlers with a message bus.
pub trait Subscriber: Send + Sync {
    /// Invoke `handler` once per message delivered on `subject`.
    fn subscribe(&self, subject: &str, handler: Arc<dyn EventHandler>) -> Result<(), SubscribeError>;

    /// Register the same handler for several subjects.
    fn subscribe_all(
        &self,
        subjects: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), SubscribeError> {
        for subject in subjects {
            self.subscribe(subject, Arc::clone(&handler))?;
        }
        Ok(())
    }

    /// Unsubscribe everything, then release the connection. Idempotent.
    fn close(&self);
}

/// [`Subscriber`] over a dedicated [`Connection`] and a bounded worker pool.
pub struct BusSubscriber {
    connection: Connection,
    dispatcher: Arc<Dispatcher>,
}

impl BusSubscriber {
    pub fn new(connection: Connection, config: DispatchConfig) -> Result<Self, SubscribeError> {
        let dispatcher = Dispatcher::start(config).map_err(SubscribeError::Spawn)?;
        Ok(Self {
            connection,
            dispatcher: Arc::new(dispatcher),
        })
    }

    /// Open a dedicated connection to `address`.
    pub fn connect(
        address: &str,
        options: ConnectOptions,
        config: DispatchConfig,
    ) -> Result<Self, SubscribeError> {
        Self::new(Connection::connect(address, options)?, config)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Wait up to `timeout` for the workers to exit after [`close`](Subscriber::close).
    pub fn join(&self, timeout: Duration) -> DispatchStats {
        self.dispatcher.join(timeout)
    }
}

impl Subscriber for BusSubscriber {
    fn subscribe(&self, subject: &str, handler: Arc<dyn EventHandler>) -> Result<(), SubscribeError> {
        if self.dispatcher.is_cancelled() {
            return Err(SubscribeError::Closed);
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let sink: Sink = Arc::new(move |message: Message| {
            dispatcher.enqueue(Job {
                subject: message.subject,
                payload: message.payload,
                handler: Arc::clone(&handler),
            });
        });

        self.connection.subscribe(subject, sink)?;
        info!(subject, client = %self.connection.name(), "subscribed");
        Ok(())
    }

    fn close(&self) {
        self.dispatcher.cancel();
        self.connection.close();
    }
}

impl Drop for BusSubscriber {
    fn drop(&mut self) {
        self.close();
    }
}
