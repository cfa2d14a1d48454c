use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::event::Notification;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("recipient {0} rejected the notification")]
    Rejected(String),
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

/// Delivers one notification to a user. Fire-and-forget: no retry, no
/// acknowledgement, no deduplication.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Logs each notification after a fixed delay standing in for an external call.
#[derive(Clone, Debug)]
pub struct LogNotifier {
    latency: Duration,
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(100),
        }
    }
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            user_id = %notification.user_id,
            kind = %notification.kind,
            message = %notification.message,
            "sending notification"
        );
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        info!(user_id = %notification.user_id, "notification sent");
        Ok(())
    }
}

/// Captures notifications in memory. Optionally rejects chosen users.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    reject: Vec<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send addressed to `user_id`.
    pub fn rejecting(mut self, user_id: impl Into<String>) -> Self {
        self.reject.push(user_id.into());
        self
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.reject.contains(&notification.user_id) {
            return Err(NotifyError::Rejected(notification.user_id.clone()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification.clone());
        Ok(())
    }
}
