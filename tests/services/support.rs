use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use event_driven::bus::{
    BusPublisher, BusSubscriber, ConnectOptions, Connection, DispatchConfig, InMemoryBroker,
    ReconnectPolicy,
};
use tracing_subscriber::fmt::MakeWriter;

pub fn options(name: &str) -> ConnectOptions {
    ConnectOptions::new(name)
        .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(10), 100))
        .with_heartbeat(Some(Duration::from_millis(10)))
}

pub fn publisher(broker: &InMemoryBroker) -> BusPublisher {
    BusPublisher::new(
        Connection::open("memory://services", options("producer"), Arc::new(broker.clone()))
            .unwrap(),
    )
}

pub fn subscriber(broker: &InMemoryBroker) -> BusSubscriber {
    BusSubscriber::new(
        Connection::open("memory://services", options("consumer"), Arc::new(broker.clone()))
            .unwrap(),
        DispatchConfig::default(),
    )
    .unwrap()
}

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

/// JSON log lines written by a scoped `fmt` subscriber.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn records(&self) -> Vec<serde_json::Value> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Records emitted on `target` at `level` (e.g. `"ERROR"`).
    pub fn on_target(&self, target: &str, level: &str) -> Vec<serde_json::Value> {
        self.records()
            .into_iter()
            .filter(|r| r["target"] == target && r["level"] == level)
            .collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with every event logged on this thread captured as JSON.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, LogCapture) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(capture.clone())
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, capture)
}
