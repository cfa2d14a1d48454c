//! Seam between the connection manager and a concrete bus client.
//!
//! A [`Dialer`] opens a [`Link`]: one physical session with the bus. Links are
//! dumb; reconnection, subscription bookkeeping and state live in
//! [`Connection`](super::Connection).

use std::sync::Arc;

/// A raw message as handed over by the bus client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            payload,
        }
    }
}

/// Callback the bus client invokes for every delivered message.
///
/// Sinks run on the client's own delivery context and must not block.
pub type Sink = Arc<dyn Fn(Message) + Send + Sync>;

/// Identifies one subscription on one link.
pub type Token = u64;

/// Errors reported by a bus client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("bus unreachable at {address}: {reason}")]
    Unreachable { address: String, reason: String },
    #[error("link lost: {0}")]
    Disconnected(String),
    #[error("bus rejected the request: {0}")]
    Rejected(String),
    #[error("unsupported bus address: {0}")]
    UnsupportedAddress(String),
}

impl TransportError {
    /// True when the session itself is gone, as opposed to a refused request.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected(_) | TransportError::Unreachable { .. }
        )
    }
}

/// One live session with the bus.
pub trait Link: Send + Sync {
    /// Hand `payload` to the transport. Returns once the client accepted it.
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Deliver every message published on exactly `subject` to `sink`.
    fn subscribe(&self, subject: &str, sink: Sink) -> Result<Token, TransportError>;

    fn unsubscribe(&self, token: Token) -> Result<(), TransportError>;

    /// Cheap liveness check. `Err` with [`TransportError::is_disconnect`]
    /// means the session is gone.
    fn ping(&self) -> Result<(), TransportError>;

    /// Tear the session down. Must be idempotent.
    fn close(&self);
}

/// Opens links to a bus address.
pub trait Dialer: Send + Sync {
    fn dial(&self, address: &str, client_name: &str) -> Result<Arc<dyn Link>, TransportError>;
}

/// Pick a dialer from the address scheme.
///
/// - `memory://<name>`: the process-wide loopback broker called `<name>`
/// - `nats://`, `tls://`: NATS (requires the `nats` feature)
pub fn dialer_for(address: &str) -> Result<Arc<dyn Dialer>, TransportError> {
    let (scheme, rest) = address
        .split_once("://")
        .ok_or_else(|| TransportError::UnsupportedAddress(address.to_string()))?;

    match scheme {
        "memory" => Ok(Arc::new(super::in_memory::InMemoryBroker::named(rest))),
        #[cfg(feature = "nats")]
        "nats" | "tls" => Ok(Arc::new(super::nats::NatsDialer::default())),
        _ => Err(TransportError::UnsupportedAddress(address.to_string())),
    }
}
