use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::store::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Published,
    Failed,
}

/// An encoded event waiting to be relayed to the bus.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxRecord {
    pub id: u64,
    /// Subject to publish under.
    pub event_type: String,
    /// The encoded envelope.
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn new(id: u64, event_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            locked_by: None,
            locked_until: None,
            last_error: None,
            created_at: Utc::now(),
            published_at: None,
        }
    }

    /// Pending, or in flight under a lease that has run out.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::InFlight => self.locked_until.is_some_and(|until| until <= now),
            OutboxStatus::Published | OutboxStatus::Failed => false,
        }
    }

    /// In flight under a lease owned by `worker`. An expired lease still
    /// counts until someone else claims the record.
    pub fn is_held_by(&self, worker: &str) -> bool {
        self.status == OutboxStatus::InFlight && self.locked_by.as_deref() == Some(worker)
    }

    pub fn claim(&mut self, worker: &str, lease: Duration, now: DateTime<Utc>) {
        let lease = chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(60));
        self.status = OutboxStatus::InFlight;
        self.attempts += 1;
        self.locked_by = Some(worker.to_string());
        self.locked_until = Some(now + lease);
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Published;
        self.published_at = Some(now);
        self.locked_by = None;
        self.locked_until = None;
        self.last_error = None;
    }

    /// Put the record back for another attempt, or fail it for good once
    /// `max_attempts` have been used.
    pub fn release(&mut self, error: &str, max_attempts: u32) -> OutboxStatus {
        self.last_error = Some(error.to_string());
        self.locked_by = None;
        self.locked_until = None;
        self.status = if self.attempts >= max_attempts {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        };
        self.status
    }
}

/// Storage for staged events.
///
/// Implementations must make `claim` atomic so concurrent relays never hold
/// the same record.
pub trait OutboxStore: Send + Sync {
    /// Append an encoded event; returns the record id.
    fn stage(&self, event_type: &str, payload: Vec<u8>) -> Result<u64, StoreError>;

    /// Lease up to `limit` claimable records to `worker`, oldest first.
    fn claim(&self, worker: &str, limit: usize, lease: Duration) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Mark a record published. Fails with [`StoreError::LeaseLost`] unless
    /// `worker` still holds it.
    fn complete(&self, id: u64, worker: &str) -> Result<(), StoreError>;

    /// Hand a record back after a failed attempt, with the same lease check
    /// as [`complete`](Self::complete).
    fn release(&self, id: u64, worker: &str, error: &str, max_attempts: u32) -> Result<OutboxStatus, StoreError>;
}

impl<T: OutboxStore + ?Sized> OutboxStore for Arc<T> {
    fn stage(&self, event_type: &str, payload: Vec<u8>) -> Result<u64, StoreError> {
        (**self).stage(event_type, payload)
    }

    fn claim(&self, worker: &str, limit: usize, lease: Duration) -> Result<Vec<OutboxRecord>, StoreError> {
        (**self).claim(worker, limit, lease)
    }

    fn complete(&self, id: u64, worker: &str) -> Result<(), StoreError> {
        (**self).complete(id, worker)
    }

    fn release(&self, id: u64, worker: &str, error: &str, max_attempts: u32) -> Result<OutboxStatus, StoreError> {
        (**self).release(id, worker, error, max_attempts)
    }
}
