//! Bounded worker pool between the bus client and event handlers.
//!
//! Transport sinks only enqueue; a fixed set of worker threads decodes each
//! message and runs its handler. The queue is bounded: when it is full the
//! message is dropped and counted, so a slow consumer costs messages rather
//! than memory. Cancellation discards queued messages but lets in-flight
//! handlers finish.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use base64::Engine;
use tracing::{debug, error, warn};

use super::subscriber::EventHandler;
use crate::event::Event;

const IDLE_POLL: Duration = Duration::from_millis(50);
const PREVIEW_BYTES: usize = 256;

/// Sizing of a subscriber's worker pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// Counters for one subscriber's dispatch pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages accepted into the queue.
    pub received: usize,
    /// Handler returned `Ok`.
    pub handled: usize,
    /// Handler returned `Err` or panicked.
    pub failed: usize,
    /// Message did not decode; handler never ran.
    pub decode_failed: usize,
    /// Queue was full or the pool was shutting down.
    pub dropped: usize,
}

#[derive(Default)]
struct Counters {
    received: AtomicUsize,
    handled: AtomicUsize,
    failed: AtomicUsize,
    decode_failed: AtomicUsize,
    dropped: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            decode_failed: self.decode_failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct Job {
    pub subject: String,
    pub payload: Vec<u8>,
    pub handler: Arc<dyn EventHandler>,
}

pub(crate) struct Dispatcher {
    sender: Mutex<Option<SyncSender<Job>>>,
    cancelled: Arc<AtomicBool>,
    counters: Arc<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn start(config: DispatchConfig) -> std::io::Result<Self> {
        let (sender, receiver) = sync_channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let cancelled = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for index in 0..config.workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let worker_cancelled = Arc::clone(&cancelled);
            let counters = Arc::clone(&counters);
            let spawned = thread::Builder::new()
                .name(format!("dispatch-{index}"))
                .spawn(move || work(receiver, worker_cancelled, counters));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    cancelled.store(true, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            cancelled,
            counters,
            workers: Mutex::new(workers),
        })
    }

    /// Queue a message without blocking the caller.
    pub fn enqueue(&self, job: Job) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(subject = %job.subject, "dispatcher stopped, message discarded");
            return;
        };
        match sender.try_send(job) {
            Ok(()) => {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(subject = %job.subject, "dispatch queue full, message dropped");
            }
            Err(TrySendError::Disconnected(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(subject = %job.subject, "dispatch workers gone, message discarded");
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stop accepting work and tell workers to exit after their current job.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Wait up to `timeout` for every worker to exit.
    pub fn join(&self, timeout: Duration) -> DispatchStats {
        let deadline = Instant::now() + timeout;
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        while !workers.is_empty() {
            let (finished, running): (Vec<_>, Vec<_>) =
                workers.drain(..).partition(|h| h.is_finished());
            for handle in finished {
                let _ = handle.join();
            }
            *workers = running;
            if workers.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                warn!(running = workers.len(), "dispatch workers still busy at join timeout");
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.counters.snapshot()
    }
}

fn work(receiver: Arc<Mutex<Receiver<Job>>>, cancelled: Arc<AtomicBool>, counters: Arc<Counters>) {
    loop {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv_timeout(IDLE_POLL);
        match next {
            Ok(job) => {
                if cancelled.load(Ordering::SeqCst) {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                run(job, &counters);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run(job: Job, counters: &Counters) {
    let event = match Event::decode(&job.payload) {
        Ok(event) => event,
        Err(err) => {
            counters.decode_failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                subject = %job.subject,
                error = %err,
                payload = %preview(&job.payload),
                "dropping undecodable message"
            );
            return;
        }
    };

    let handler = &job.handler;
    match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
        Ok(Ok(())) => {
            counters.handled.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(err)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(subject = %job.subject, error = %err, "event handler failed");
        }
        Err(panic) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(subject = %job.subject, panic = panic_message(&*panic), "event handler panicked");
        }
    }
}

/// Loggable excerpt of a payload: text when it is UTF-8, base64 otherwise.
fn preview(payload: &[u8]) -> String {
    let head = &payload[..payload.len().min(PREVIEW_BYTES)];
    match std::str::from_utf8(head) {
        Ok(text) => text.to_string(),
        // Only the last character was cut in half.
        Err(err) if err.error_len().is_none() && payload.len() > PREVIEW_BYTES => {
            String::from_utf8_lossy(&head[..err.valid_up_to()]).into_owned()
        }
        Err(_) => format!(
            "base64:{}",
            base64::engine::general_purpose::STANDARD.encode(head)
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
