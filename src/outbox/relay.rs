//! Background thread that drains the outbox onto the bus.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::record::{OutboxStatus, OutboxStore};
use crate::bus::Publisher;
use crate::event::Event;
use crate::store::StoreError;

/// Tuning for an [`OutboxRelay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayOptions {
    pub worker_id: String,
    pub batch_size: usize,
    pub lease: Duration,
    pub max_attempts: u32,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            worker_id: format!("outbox-relay-{}", std::process::id()),
            batch_size: 100,
            lease: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RelayOptions {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }
}

/// Outcome of one pass over the outbox.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainResult {
    pub claimed: usize,
    pub published: usize,
    pub released: usize,
    pub failed: usize,
    /// Records whose lease ran out and were claimed by another relay
    /// before this one could settle them.
    pub lost: usize,
}

/// Totals over the lifetime of a relay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub published: usize,
    pub released: usize,
    pub failed: usize,
    pub lost: usize,
    pub polls: usize,
}

impl RelayStats {
    fn add(&mut self, drained: DrainResult) {
        self.published += drained.published;
        self.released += drained.released;
        self.failed += drained.failed;
        self.lost += drained.lost;
    }
}

/// Claim one batch and publish it.
///
/// Each record is published under its own event type. Success completes it;
/// failure releases it for retry until `max_attempts` is used up. A record
/// whose payload no longer decodes is failed immediately.
pub fn drain_once<O, P>(store: &O, publisher: &P, options: &RelayOptions) -> Result<DrainResult, StoreError>
where
    O: OutboxStore + ?Sized,
    P: Publisher + ?Sized,
{
    let records = store.claim(&options.worker_id, options.batch_size, options.lease)?;
    let mut result = DrainResult {
        claimed: records.len(),
        ..DrainResult::default()
    };

    for record in records {
        let (error, max_attempts) = match Event::decode(&record.payload) {
            Ok(event) => match publisher.publish(&record.event_type, &event) {
                Ok(()) => {
                    match store.complete(record.id, &options.worker_id) {
                        Ok(()) => result.published += 1,
                        Err(err @ StoreError::LeaseLost { .. }) => lease_lost(&mut result, &record.event_type, &err),
                        Err(err) => return Err(err),
                    }
                    continue;
                }
                Err(err) => (err.to_string(), options.max_attempts),
            },
            Err(err) => (err.to_string(), 0),
        };

        let status = match store.release(record.id, &options.worker_id, &error, max_attempts) {
            Ok(status) => status,
            Err(err @ StoreError::LeaseLost { .. }) => {
                lease_lost(&mut result, &record.event_type, &err);
                continue;
            }
            Err(err) => return Err(err),
        };
        match status {
            OutboxStatus::Failed => {
                result.failed += 1;
                error!(
                    outbox_id = record.id,
                    event_type = %record.event_type,
                    attempts = record.attempts,
                    error = %error,
                    "outbox record failed permanently"
                );
            }
            _ => {
                result.released += 1;
                warn!(
                    outbox_id = record.id,
                    event_type = %record.event_type,
                    attempts = record.attempts,
                    error = %error,
                    "outbox publish failed, will retry"
                );
            }
        }
    }

    Ok(result)
}

fn lease_lost(result: &mut DrainResult, event_type: &str, err: &StoreError) {
    result.lost += 1;
    warn!(event_type, error = %err, "outbox lease lost, leaving the record to its new owner");
}

/// A background thread that relays staged events to a publisher.
///
/// ```
/// use std::time::Duration;
/// use event_driven::bus::{BusPublisher, ConnectOptions, Publisher};
/// use event_driven::event::Event;
/// use event_driven::outbox::{OutboxRelay, StagedPublisher};
/// use event_driven::store::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// StagedPublisher::new(store.clone())
///     .publish_event(&Event::user_created("1", "Ada", "ada@example.com"))
///     .unwrap();
///
/// let bus = BusPublisher::connect("memory://relay-doc", ConnectOptions::default()).unwrap();
/// let relay = OutboxRelay::spawn(store, bus, Duration::from_millis(10));
/// std::thread::sleep(Duration::from_millis(100));
/// let stats = relay.stop();
/// assert_eq!(stats.published, 1);
/// ```
pub struct OutboxRelay {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<RelayStats>>,
}

impl OutboxRelay {
    pub fn spawn<O, P>(store: O, publisher: P, poll_interval: Duration) -> Self
    where
        O: OutboxStore + 'static,
        P: Publisher + 'static,
    {
        Self::spawn_with(store, publisher, poll_interval, RelayOptions::default())
    }

    pub fn spawn_with<O, P>(store: O, publisher: P, poll_interval: Duration, options: RelayOptions) -> Self
    where
        O: OutboxStore + 'static,
        P: Publisher + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = RelayStats::default();
            info!(worker = %options.worker_id, "outbox relay started");

            loop {
                stats.polls += 1;
                match drain_once(&store, &publisher, &options) {
                    Ok(drained) => {
                        if drained.claimed > 0 {
                            debug!(?drained, "outbox batch relayed");
                        }
                        stats.add(drained);
                    }
                    Err(err) => warn!(error = %err, "outbox claim failed"),
                }

                match stop_rx.recv_timeout(poll_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            info!(worker = %options.worker_id, published = stats.published, "outbox relay stopped");
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stop the relay and wait for it to finish. Returns stats.
    pub fn stop(mut self) -> RelayStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => RelayStats::default(),
        }
    }

    /// Signal stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for OutboxRelay {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
