use tracing::debug;

use super::record::OutboxStore;
use crate::bus::{PublishError, Publisher};
use crate::event::Event;

/// [`Publisher`] that stages events in an outbox instead of sending them.
///
/// Drop it into a producer service in place of a bus publisher and run an
/// [`OutboxRelay`](super::OutboxRelay) to deliver the staged events. A bus
/// outage then delays events instead of losing them.
///
/// Staging is still a second write next to the entity write. Only a store
/// that commits both in one transaction closes the gap completely.
pub struct StagedPublisher<O> {
    outbox: O,
}

impl<O> StagedPublisher<O> {
    pub fn new(outbox: O) -> Self {
        Self { outbox }
    }

    pub fn outbox(&self) -> &O {
        &self.outbox
    }
}

impl<O: OutboxStore> Publisher for StagedPublisher<O> {
    fn publish(&self, subject: &str, event: &Event) -> Result<(), PublishError> {
        let bytes = event.encode()?;
        let id = self.outbox.stage(subject, bytes)?;
        debug!(subject, outbox_id = id, "event staged");
        Ok(())
    }
}
