//! Producer, consumer and outbox flows wired through the loopback broker.

mod support;
mod consumer;
mod outbox;
mod producer;
