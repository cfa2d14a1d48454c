//! Transactional-outbox alternative to best-effort publishing.
//!
//! ```text
//! producer ─▶ StagedPublisher ─▶ OutboxStore ◀─ OutboxRelay ─▶ Publisher ─▶ bus
//!              (stage record)                  (claim, publish, complete/release)
//! ```
//!
//! Delivery becomes at-least-once: a record is completed only after the bus
//! accepted it, so a crash between publish and complete re-sends it once the
//! lease runs out.

mod publisher;
mod record;
mod relay;

pub use publisher::StagedPublisher;
pub use record::{OutboxRecord, OutboxStatus, OutboxStore};
pub use relay::{drain_once, DrainResult, OutboxRelay, RelayOptions, RelayStats};
