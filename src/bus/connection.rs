//! Managed bus connection with bounded automatic reconnection.
//!
//! A [`Connection`] wraps one [`Link`] at a time. When the link reports that
//! the session is gone, the connection moves to
//! [`ConnectionState::Reconnecting`] and a single background thread redials
//! according to the [`ReconnectPolicy`]. Calls made meanwhile fail fast with
//! [`ConnectionError::Disconnected`]. On success every subscription is
//! registered again on the new link; once the attempts are exhausted the
//! connection is [`ConnectionState::Failed`] for good.
//!
//! Loss is noticed on the next publish or subscribe, or by the heartbeat
//! thread that pings the link, so a subscribe-only connection recovers too.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::transport::{dialer_for, Dialer, Link, Sink, Token, TransportError};

/// Lifecycle of a [`Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Redialing; `attempt` is the number of dials made so far.
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted. Terminal until closed.
    Failed,
    Closed,
}

/// How a lost connection is redialed.
///
/// The delay before attempt `n` (zero-based) is `wait * factor^n`, capped at
/// `max_wait`. The default is a fixed one second wait, ten attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub wait: Duration,
    pub max_attempts: u32,
    pub factor: f64,
    pub max_wait: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(1),
            max_attempts: 10,
            factor: 1.0,
            max_wait: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Constant `wait` between at most `max_attempts` redials.
    pub fn fixed(wait: Duration, max_attempts: u32) -> Self {
        Self {
            wait,
            max_attempts,
            factor: 1.0,
            max_wait: wait,
        }
    }

    pub fn with_factor(mut self, factor: f64, max_wait: Duration) -> Self {
        self.factor = factor;
        self.max_wait = max_wait;
        self
    }

    /// Delay before the zero-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.factor <= 1.0 || !self.factor.is_finite() {
            return self.wait;
        }
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.wait.as_secs_f64() * self.factor.powi(exp);
        let cap = self.max_wait.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            self.max_wait
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Identity and retry settings for a connection.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectOptions {
    /// Client name reported to the bus.
    pub name: String,
    pub reconnect: ReconnectPolicy,
    /// Interval between link pings; `None` disables the heartbeat.
    pub heartbeat: Option<Duration>,
}

impl ConnectOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reconnect: ReconnectPolicy::default(),
            heartbeat: Some(Duration::from_secs(1)),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Option<Duration>) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new("event-driven")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("cannot connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: TransportError,
    },
    #[error("unsupported bus address: {0}")]
    Unsupported(String),
    #[error("connection to {address} lost, reconnecting")]
    Disconnected { address: String },
    #[error("connection to {address} failed after {attempts} reconnect attempts")]
    Failed { address: String, attempts: u32 },
    #[error("connection closed")]
    Closed,
    #[error("bus rejected the request: {0}")]
    Rejected(String),
}

/// Handle for one registered subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    subject: String,
    sink: Sink,
    token: Option<Token>,
}

struct Slot {
    state: ConnectionState,
    link: Option<Arc<dyn Link>>,
    stop_reconnect: Option<Sender<()>>,
    stop_heartbeat: Option<Sender<()>>,
}

struct Shared {
    address: String,
    options: ConnectOptions,
    dialer: Arc<dyn Dialer>,
    // Lock order: subscriptions before slot.
    subscriptions: Mutex<HashMap<SubscriptionId, Registration>>,
    slot: Mutex<Slot>,
    next_id: AtomicU64,
}

/// A bus connection that survives transient outages.
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Connect to `address`, choosing the transport from its scheme.
    pub fn connect(address: &str, options: ConnectOptions) -> Result<Self, ConnectionError> {
        let dialer = dialer_for(address).map_err(|err| match err {
            TransportError::UnsupportedAddress(a) => ConnectionError::Unsupported(a),
            other => ConnectionError::Connect {
                address: address.to_string(),
                source: other,
            },
        })?;
        Self::open(address, options, dialer)
    }

    /// Connect through an explicit dialer.
    pub fn open(
        address: &str,
        options: ConnectOptions,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self, ConnectionError> {
        let link = dialer
            .dial(address, &options.name)
            .map_err(|source| ConnectionError::Connect {
                address: address.to_string(),
                source,
            })?;

        info!(address, client = %options.name, "connected to event bus");

        let heartbeat = options.heartbeat;
        let shared = Arc::new(Shared {
            address: address.to_string(),
            options,
            dialer,
            subscriptions: Mutex::new(HashMap::new()),
            slot: Mutex::new(Slot {
                state: ConnectionState::Connected,
                link: Some(link),
                stop_reconnect: None,
                stop_heartbeat: None,
            }),
            next_id: AtomicU64::new(1),
        });

        if let Some(interval) = heartbeat {
            let (stop_tx, stop_rx) = channel();
            let weak = Arc::downgrade(&shared);
            let spawned = thread::Builder::new()
                .name("bus-heartbeat".to_string())
                .spawn(move || heartbeat_loop(weak, interval, stop_rx));
            match spawned {
                Ok(_) => shared.slot().stop_heartbeat = Some(stop_tx),
                Err(err) => warn!(error = %err, "failed to spawn heartbeat thread"),
            }
        }

        Ok(Self { shared })
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn name(&self) -> &str {
        &self.shared.options.name
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.slot().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of subscriptions that will be restored after a reconnect.
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions().len()
    }

    /// Hand raw bytes to the bus.
    pub fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), ConnectionError> {
        let link = self.shared.current_link()?;
        link.publish(subject, payload)
            .map_err(|err| self.shared.classify(&link, err))
    }

    /// Register `sink` for every message on `subject`.
    pub fn subscribe(&self, subject: &str, sink: Sink) -> Result<SubscriptionId, ConnectionError> {
        let mut subscriptions = self.shared.subscriptions();
        let link = self.shared.current_link()?;
        let token = link
            .subscribe(subject, Arc::clone(&sink))
            .map_err(|err| self.shared.classify(&link, err))?;

        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        subscriptions.insert(
            id,
            Registration {
                subject: subject.to_string(),
                sink,
                token: Some(token),
            },
        );
        debug!(subject, "subscription registered");
        Ok(id)
    }

    /// Remove one subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscriptions = self.shared.subscriptions();
        let Some(registration) = subscriptions.remove(&id) else {
            return;
        };
        if let (Some(token), Ok(link)) = (registration.token, self.shared.current_link()) {
            if let Err(err) = link.unsubscribe(token) {
                debug!(subject = %registration.subject, error = %err, "unsubscribe failed");
            }
        }
    }

    /// Unsubscribe everything and close the link. Idempotent and non-blocking.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Registration>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn current_link(&self) -> Result<Arc<dyn Link>, ConnectionError> {
        let slot = self.slot();
        match (slot.state, &slot.link) {
            (ConnectionState::Connected, Some(link)) => Ok(Arc::clone(link)),
            (ConnectionState::Closed, _) => Err(ConnectionError::Closed),
            (ConnectionState::Failed, _) => Err(ConnectionError::Failed {
                address: self.address.clone(),
                attempts: self.options.reconnect.max_attempts,
            }),
            _ => Err(ConnectionError::Disconnected {
                address: self.address.clone(),
            }),
        }
    }

    fn classify(self: &Arc<Self>, link: &Arc<dyn Link>, err: TransportError) -> ConnectionError {
        if err.is_disconnect() {
            self.lost(link, &err);
            ConnectionError::Disconnected {
                address: self.address.clone(),
            }
        } else {
            ConnectionError::Rejected(err.to_string())
        }
    }

    /// Start reconnecting if `failed` is still the active link.
    fn lost(self: &Arc<Self>, failed: &Arc<dyn Link>, err: &TransportError) {
        let mut slot = self.slot();
        let is_current = slot
            .link
            .as_ref()
            .is_some_and(|current| same_link(current, failed));
        if slot.state != ConnectionState::Connected || !is_current {
            return;
        }

        warn!(address = %self.address, error = %err, "event bus connection lost");
        if let Some(link) = slot.link.take() {
            link.close();
        }

        if self.options.reconnect.max_attempts == 0 {
            slot.state = ConnectionState::Failed;
            error!(address = %self.address, "reconnect disabled, connection failed");
            return;
        }

        let (stop_tx, stop_rx) = channel();
        slot.state = ConnectionState::Reconnecting { attempt: 0 };
        slot.stop_reconnect = Some(stop_tx);

        let weak = Arc::downgrade(self);
        let spawned = thread::Builder::new()
            .name("bus-reconnect".to_string())
            .spawn(move || reconnect_loop(weak, stop_rx));
        if let Err(err) = spawned {
            error!(error = %err, "failed to spawn reconnect thread");
            slot.state = ConnectionState::Failed;
            slot.stop_reconnect = None;
        }
    }

    /// Adopt a freshly dialed link, restoring every subscription on it.
    ///
    /// Returns `false` when the link died during restoration.
    fn restore(&self, link: Arc<dyn Link>) -> bool {
        let mut subscriptions = self.subscriptions();
        for registration in subscriptions.values_mut() {
            match link.subscribe(&registration.subject, Arc::clone(&registration.sink)) {
                Ok(token) => registration.token = Some(token),
                Err(err) => {
                    warn!(subject = %registration.subject, error = %err, "resubscribe failed");
                    link.close();
                    return false;
                }
            }
        }

        let mut slot = self.slot();
        if !matches!(slot.state, ConnectionState::Reconnecting { .. }) {
            // Closed while we were dialing.
            drop(slot);
            link.close();
            return true;
        }
        slot.state = ConnectionState::Connected;
        slot.link = Some(link);
        slot.stop_reconnect = None;
        info!(
            address = %self.address,
            subscriptions = subscriptions.len(),
            "reconnected to event bus"
        );
        true
    }

    /// Record the next attempt; `false` if reconnection was abandoned.
    fn begin_attempt(&self, attempt: u32) -> bool {
        let mut slot = self.slot();
        match slot.state {
            ConnectionState::Reconnecting { .. } => {
                slot.state = ConnectionState::Reconnecting { attempt };
                true
            }
            _ => false,
        }
    }

    fn give_up(&self) {
        let mut slot = self.slot();
        if matches!(slot.state, ConnectionState::Reconnecting { .. }) {
            slot.state = ConnectionState::Failed;
            slot.stop_reconnect = None;
            error!(
                address = %self.address,
                attempts = self.options.reconnect.max_attempts,
                "reconnect attempts exhausted, event bus connection failed"
            );
        }
    }

    fn close(&self) {
        let mut subscriptions = self.subscriptions();
        let (link, stops) = {
            let mut slot = self.slot();
            if slot.state == ConnectionState::Closed {
                return;
            }
            slot.state = ConnectionState::Closed;
            (
                slot.link.take(),
                [slot.stop_reconnect.take(), slot.stop_heartbeat.take()],
            )
        };

        for (_, registration) in subscriptions.drain() {
            if let (Some(link), Some(token)) = (&link, registration.token) {
                if let Err(err) = link.unsubscribe(token) {
                    debug!(subject = %registration.subject, error = %err, "unsubscribe on close failed");
                }
            }
        }
        if let Some(link) = link {
            link.close();
        }
        for stop in stops.into_iter().flatten() {
            let _ = stop.send(());
        }
        info!(address = %self.address, "event bus connection closed");
    }
}

fn same_link(a: &Arc<dyn Link>, b: &Arc<dyn Link>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn heartbeat_loop(shared: Weak<Shared>, interval: Duration, stop: Receiver<()>) {
    loop {
        match stop.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let Some(shared) = shared.upgrade() else {
            return;
        };
        let link = match shared.current_link() {
            Ok(link) => link,
            Err(ConnectionError::Disconnected { .. }) => continue,
            Err(_) => return,
        };
        if let Err(err) = link.ping() {
            if err.is_disconnect() {
                shared.lost(&link, &err);
            } else {
                debug!(address = %shared.address, error = %err, "heartbeat ping rejected");
            }
        }
    }
}

fn reconnect_loop(shared: Weak<Shared>, stop: Receiver<()>) {
    let (policy, address, name, dialer) = match shared.upgrade() {
        Some(s) => (
            s.options.reconnect.clone(),
            s.address.clone(),
            s.options.name.clone(),
            Arc::clone(&s.dialer),
        ),
        None => return,
    };

    for attempt in 1..=policy.max_attempts {
        match stop.recv_timeout(policy.delay(attempt - 1)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let Some(shared) = shared.upgrade() else {
            return;
        };
        if !shared.begin_attempt(attempt) {
            return;
        }

        match dialer.dial(&address, &name) {
            Ok(link) => {
                if shared.restore(link) {
                    return;
                }
            }
            Err(err) => {
                warn!(%address, attempt, max_attempts = policy.max_attempts, error = %err, "reconnect attempt failed");
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.give_up();
    }
}
