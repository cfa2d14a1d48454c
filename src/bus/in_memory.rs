//! In-process loopback broker for tests and single-process deployments.
//!
//! [`InMemoryBroker`] behaves like a tiny bus server: links dialed to it
//! publish into a shared log and fan messages out to every subscriber of the
//! subject. The log keeps only the most recent [`DEFAULT_LOG_CAPACITY`]
//! messages unless built with [`InMemoryBroker::with_log_capacity`]. It also supports fault injection, so reconnect paths can be
//! exercised without a real network:
//!
//! ```
//! use event_driven::bus::{Dialer, InMemoryBroker, Link};
//!
//! let broker = InMemoryBroker::new();
//! let link = broker.dial("memory://doc", "doc").unwrap();
//!
//! broker.set_reachable(false);
//! assert!(link.publish("UserCreated", b"{}").is_err());
//! assert!(broker.dial("memory://doc", "doc").is_err());
//!
//! broker.set_reachable(true);
//! let link = broker.dial("memory://doc", "doc").unwrap();
//! link.publish("UserCreated", b"{}").unwrap();
//! assert_eq!(broker.len(), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use super::transport::{Dialer, Link, Message, Sink, Token, TransportError};
use crate::event::Event;

/// Messages retained by a broker's log when no capacity is given.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

struct Route {
    token: Token,
    link: u64,
    sink: Sink,
}

struct BrokerState {
    reachable: AtomicBool,
    /// Bumped on every partition; links from an older generation are dead.
    generation: AtomicU64,
    next_id: AtomicU64,
    routes: RwLock<HashMap<String, Vec<Route>>>,
    log: RwLock<VecDeque<Message>>,
    log_capacity: usize,
}

/// Shared handle to a loopback broker. Clones see the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn registry() -> &'static Mutex<HashMap<String, InMemoryBroker>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, InMemoryBroker>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl InMemoryBroker {
    /// A fresh, private broker.
    pub fn new() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// A private broker whose log holds at most `capacity` messages, oldest
    /// evicted first. `0` disables recording.
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(BrokerState {
                reachable: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                routes: RwLock::new(HashMap::new()),
                log: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
                log_capacity: capacity,
            }),
        }
    }

    /// The process-wide broker registered under `name`, created on first use.
    ///
    /// This is what `memory://<name>` addresses resolve to.
    pub fn named(name: &str) -> Self {
        registry()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Simulate a network partition (`false`) or its recovery (`true`).
    ///
    /// Going unreachable kills every existing link and drops all routes, as a
    /// server restart would. Dialing fails until reachability is restored.
    pub fn set_reachable(&self, reachable: bool) {
        let was = self.state.reachable.swap(reachable, Ordering::SeqCst);
        if was && !reachable {
            self.state.generation.fetch_add(1, Ordering::SeqCst);
            self.state
                .routes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.state.reachable.load(Ordering::SeqCst)
    }

    /// Publish raw bytes as if some other client had sent them.
    pub fn inject(&self, subject: &str, payload: &[u8]) {
        self.deliver(Message::new(subject, payload.to_vec()));
    }

    /// Messages still in the log, oldest first.
    pub fn published(&self) -> Vec<Message> {
        self.read_log().iter().cloned().collect()
    }

    /// Subjects (event types) of the logged messages, in order.
    pub fn event_types(&self) -> Vec<String> {
        self.read_log().iter().map(|m| m.subject.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read_log().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_log().is_empty()
    }

    /// First published message on `subject`, decoded.
    ///
    /// Messages that do not decode are skipped.
    pub fn find_by_type(&self, subject: &str) -> Option<Event> {
        self.read_log()
            .iter()
            .filter(|m| m.subject == subject)
            .find_map(|m| Event::decode(&m.payload).ok())
    }

    /// All decodable messages published on `subject`.
    pub fn find_all_by_type(&self, subject: &str) -> Vec<Event> {
        self.read_log()
            .iter()
            .filter(|m| m.subject == subject)
            .filter_map(|m| Event::decode(&m.payload).ok())
            .collect()
    }

    /// Number of live subscriptions on `subject`.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.state
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject)
            .map_or(0, Vec::len)
    }

    /// Forget the message log (subscriptions are kept).
    pub fn clear(&self) {
        self.state
            .log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn read_log(&self) -> std::sync::RwLockReadGuard<'_, VecDeque<Message>> {
        self.state.log.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.state.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn generation(&self) -> u64 {
        self.state.generation.load(Ordering::SeqCst)
    }

    fn record(&self, message: &Message) {
        let capacity = self.state.log_capacity;
        if capacity == 0 {
            return;
        }
        let mut log = self.state.log.write().unwrap_or_else(PoisonError::into_inner);
        while log.len() >= capacity {
            log.pop_front();
        }
        log.push_back(message.clone());
    }

    fn deliver(&self, message: Message) {
        self.record(&message);

        // Collect sinks first so none of them runs under the routes lock.
        let sinks: Vec<Sink> = self
            .state
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message.subject)
            .map(|routes| routes.iter().map(|r| Arc::clone(&r.sink)).collect())
            .unwrap_or_default();

        for sink in sinks {
            sink(message.clone());
        }
    }

    fn remove_routes(&self, predicate: impl Fn(&Route) -> bool) {
        let mut routes = self
            .state
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for subject_routes in routes.values_mut() {
            subject_routes.retain(|r| !predicate(r));
        }
        routes.retain(|_, v| !v.is_empty());
    }
}

impl Dialer for InMemoryBroker {
    fn dial(&self, address: &str, _client_name: &str) -> Result<Arc<dyn Link>, TransportError> {
        if !self.is_reachable() {
            return Err(TransportError::Unreachable {
                address: address.to_string(),
                reason: "broker is partitioned".to_string(),
            });
        }
        Ok(Arc::new(InMemoryLink {
            broker: self.clone(),
            id: self.next_id(),
            generation: self.generation(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct InMemoryLink {
    broker: InMemoryBroker,
    id: u64,
    generation: u64,
    closed: AtomicBool,
}

impl InMemoryLink {
    fn check_alive(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected("link closed".to_string()));
        }
        if !self.broker.is_reachable() || self.broker.generation() != self.generation {
            return Err(TransportError::Disconnected(
                "connection reset by broker".to_string(),
            ));
        }
        Ok(())
    }
}

impl Link for InMemoryLink {
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.check_alive()?;
        self.broker.deliver(Message::new(subject, payload.to_vec()));
        Ok(())
    }

    fn subscribe(&self, subject: &str, sink: Sink) -> Result<Token, TransportError> {
        self.check_alive()?;
        let token = self.broker.next_id();
        self.broker
            .state
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(subject.to_string())
            .or_default()
            .push(Route {
                token,
                link: self.id,
                sink,
            });
        Ok(token)
    }

    fn unsubscribe(&self, token: Token) -> Result<(), TransportError> {
        self.check_alive()?;
        self.broker.remove_routes(|r| r.token == token);
        Ok(())
    }

    fn ping(&self) -> Result<(), TransportError> {
        self.check_alive()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let id = self.id;
            self.broker.remove_routes(|r| r.link == id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting_sink() -> (Sink, Arc<Mutex<Vec<Message>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: Sink = Arc::new(move |m| sink_seen.lock().unwrap().push(m));
        (sink, seen)
    }

    #[test]
    fn fans_out_to_every_subscriber_of_the_subject() {
        let broker = InMemoryBroker::new();
        let a = broker.dial("memory://t", "a").unwrap();
        let b = broker.dial("memory://t", "b").unwrap();

        let (sink_a, seen_a) = collecting_sink();
        let (sink_b, seen_b) = collecting_sink();
        a.subscribe("OrderCreated", sink_a).unwrap();
        b.subscribe("OrderCreated", sink_b).unwrap();

        a.publish("OrderCreated", b"1").unwrap();
        a.publish("UserCreated", b"2").unwrap();

        assert_eq!(seen_a.lock().unwrap().len(), 1);
        assert_eq!(seen_b.lock().unwrap().len(), 1);
        assert_eq!(broker.event_types(), vec!["OrderCreated", "UserCreated"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broker = InMemoryBroker::new();
        let link = broker.dial("memory://t", "a").unwrap();
        let (sink, seen) = collecting_sink();

        let token = link.subscribe("UserCreated", sink).unwrap();
        assert_eq!(broker.subscriber_count("UserCreated"), 1);
        link.unsubscribe(token).unwrap();
        assert_eq!(broker.subscriber_count("UserCreated"), 0);

        broker.inject("UserCreated", b"{}");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn partition_kills_existing_links() {
        let broker = InMemoryBroker::new();
        let link = broker.dial("memory://t", "a").unwrap();
        let (sink, _) = collecting_sink();
        link.subscribe("UserCreated", sink).unwrap();

        broker.set_reachable(false);
        assert!(link.publish("UserCreated", b"{}").unwrap_err().is_disconnect());
        assert_eq!(broker.subscriber_count("UserCreated"), 0);

        broker.set_reachable(true);
        // Still dead: the session was lost, only a fresh dial recovers.
        assert!(link.publish("UserCreated", b"{}").is_err());
        assert!(broker
            .dial("memory://t", "a")
            .unwrap()
            .publish("UserCreated", b"{}")
            .is_ok());
    }

    #[test]
    fn close_removes_the_links_routes() {
        let broker = InMemoryBroker::new();
        let link = broker.dial("memory://t", "a").unwrap();
        let (sink, _) = collecting_sink();
        link.subscribe("UserCreated", sink).unwrap();

        link.close();
        link.close();
        assert_eq!(broker.subscriber_count("UserCreated"), 0);
        assert!(link.publish("UserCreated", b"{}").is_err());
    }

    #[test]
    fn find_by_type_decodes_events() {
        let broker = InMemoryBroker::new();
        broker.inject("OrderCreated", b"garbage");
        broker.inject(
            "OrderCreated",
            &Event::order_created("1", "7", 3.5).encode().unwrap(),
        );

        let found = broker.find_by_type("OrderCreated").unwrap();
        assert_eq!(found.tag(), "OrderCreated");
        assert_eq!(broker.find_all_by_type("OrderCreated").len(), 1);
        assert_eq!(broker.len(), 2);

        broker.clear();
        assert!(broker.is_empty());
    }

    #[test]
    fn log_keeps_only_the_newest_messages() {
        let broker = InMemoryBroker::with_log_capacity(3);
        for n in 0..10 {
            broker.inject("UserCreated", n.to_string().as_bytes());
        }
        assert_eq!(broker.len(), 3);
        let payloads: Vec<_> = broker.published().into_iter().map(|m| m.payload).collect();
        assert_eq!(payloads, vec![b"7".to_vec(), b"8".to_vec(), b"9".to_vec()]);
    }

    #[test]
    fn unrecorded_broker_still_delivers() {
        let broker = InMemoryBroker::with_log_capacity(0);
        let link = broker.dial("memory://t", "a").unwrap();
        let (sink, seen) = collecting_sink();
        link.subscribe("UserCreated", sink).unwrap();

        broker.inject("UserCreated", b"{}");
        assert!(broker.is_empty());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn named_brokers_are_shared() {
        let first = InMemoryBroker::named("in-memory-shared");
        first.inject("UserCreated", b"{}");
        assert_eq!(InMemoryBroker::named("in-memory-shared").len(), 1);
        assert!(InMemoryBroker::named("in-memory-other").is_empty());
    }
}
