//! Shared fixtures: fast reconnect options, a publisher/subscriber pair and
//! an event collector.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use event_driven::bus::{
    handler, BusPublisher, BusSubscriber, ConnectOptions, Connection, DispatchConfig,
    EventHandler, InMemoryBroker, ReconnectPolicy,
};
use event_driven::Event;

pub fn fast_options(name: &str) -> ConnectOptions {
    ConnectOptions::new(name)
        .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(10), 100))
        .with_heartbeat(Some(Duration::from_millis(10)))
}

pub fn connection(broker: &InMemoryBroker, name: &str) -> Connection {
    Connection::open("memory://tests", fast_options(name), Arc::new(broker.clone())).unwrap()
}

pub fn pair(broker: &InMemoryBroker) -> (BusPublisher, BusSubscriber) {
    let publisher = BusPublisher::new(connection(broker, "publisher"));
    let subscriber =
        BusSubscriber::new(connection(broker, "subscriber"), DispatchConfig::default()).unwrap();
    (publisher, subscriber)
}

/// Poll `condition` every few milliseconds for up to two seconds.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Records every event its handler sees.
#[derive(Clone, Default)]
pub struct Collector {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Collector {
    pub fn handler(&self) -> Arc<dyn EventHandler> {
        let events = Arc::clone(&self.events);
        handler(move |event| {
            events.lock().unwrap().push(event);
            Ok(())
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}
