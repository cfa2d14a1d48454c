//! NATS backend (`nats://`, `tls://`), enabled by the `nats` feature.
//!
//! Each link owns a small tokio runtime and a client connection; the blocking
//! [`Link`] calls drive it with `block_on`, so they must not be made from
//! inside an async context. Reconnection is left to
//! [`Connection`](super::Connection): the client's own reconnect loop is
//! capped at [`NatsDialer::client_reconnects`] attempts, after which the link
//! reports `Disconnected` and is replaced by a fresh dial.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_nats::connection::State;
use futures::StreamExt;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::transport::{Dialer, Link, Message, Sink, Token, TransportError};

const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Dials NATS servers.
#[derive(Clone, Debug)]
pub struct NatsDialer {
    pub connect_timeout: Duration,
    /// Attempts the client may make on its own, counting the initial
    /// connect. Anything below 1 would refuse the first connect.
    pub client_reconnects: usize,
}

impl Default for NatsDialer {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            client_reconnects: 1,
        }
    }
}

impl NatsDialer {
    fn client_options(&self, client_name: &str) -> async_nats::ConnectOptions {
        let name = client_name.to_string();
        async_nats::ConnectOptions::new()
            .name(client_name)
            .connection_timeout(self.connect_timeout)
            .max_reconnects(self.client_reconnects.max(1))
            .event_callback(move |event| {
                let name = name.clone();
                async move {
                    match event {
                        async_nats::Event::Disconnected => {
                            warn!(client = %name, "nats client disconnected")
                        }
                        async_nats::Event::Connected => {
                            info!(client = %name, "nats client connected")
                        }
                        other => debug!(client = %name, event = %other, "nats client event"),
                    }
                }
            })
    }
}

impl Dialer for NatsDialer {
    fn dial(&self, address: &str, client_name: &str) -> Result<Arc<dyn Link>, TransportError> {
        let unreachable = |reason: String| TransportError::Unreachable {
            address: address.to_string(),
            reason,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("nats-link")
            .enable_all()
            .build()
            .map_err(|e| unreachable(e.to_string()))?;

        let options = self.client_options(client_name);
        let client = runtime
            .block_on(options.connect(address))
            .map_err(|e| unreachable(e.to_string()))?;

        Ok(Arc::new(NatsLink {
            runtime,
            client,
            next_token: AtomicU64::new(1),
            pumps: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct NatsLink {
    runtime: Runtime,
    client: async_nats::Client,
    next_token: AtomicU64,
    pumps: Mutex<HashMap<Token, JoinHandle<()>>>,
    closed: AtomicBool,
}

impl NatsLink {
    fn check_alive(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected("link closed".to_string()));
        }
        match self.client.connection_state() {
            State::Connected => Ok(()),
            other => Err(TransportError::Disconnected(format!(
                "nats connection is {other:?}"
            ))),
        }
    }
}

impl Link for NatsLink {
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.check_alive()?;
        self.runtime
            .block_on(self.client.publish(subject.to_string(), payload.to_vec().into()))
            .map_err(|e| TransportError::Disconnected(e.to_string()))
    }

    fn subscribe(&self, subject: &str, sink: Sink) -> Result<Token, TransportError> {
        self.check_alive()?;
        let mut stream = self
            .runtime
            .block_on(self.client.subscribe(subject.to_string()))
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        let pump = self.runtime.spawn(async move {
            while let Some(message) = stream.next().await {
                sink(Message::new(message.subject.to_string(), message.payload.to_vec()));
            }
        });

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, pump);
        Ok(token)
    }

    fn unsubscribe(&self, token: Token) -> Result<(), TransportError> {
        // Dropping the stream inside the aborted task unsubscribes on the server.
        if let Some(pump) = self
            .pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token)
        {
            pump.abort();
        }
        Ok(())
    }

    fn ping(&self) -> Result<(), TransportError> {
        self.check_alive()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (_, pump) in self
            .pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
        {
            pump.abort();
        }
        if !matches!(self.client.connection_state(), State::Connected) {
            return;
        }
        let flushed = self
            .runtime
            .block_on(tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, self.client.flush()));
        match flushed {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "flush on close failed"),
            Err(_) => debug!("flush on close timed out"),
        }
    }
}
