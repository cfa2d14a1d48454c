//! Bus integration tests over the loopback broker.

mod support;
mod delivery;
mod resilience;
