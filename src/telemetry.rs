//! Tracing setup shared by the binaries and by tests that want log output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV_VAR: &str = "EVENT_DRIVEN_LOG";

/// Install a `fmt` subscriber filtered by `EVENT_DRIVEN_LOG` (default `info`).
///
/// Returns `false` when a global subscriber was already installed, which makes
/// repeated calls harmless.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
