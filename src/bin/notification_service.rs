//! notification-service: consumes domain events and notifies users.
//!
//! ```text
//! [bus] ─▶ BusSubscriber ─▶ dispatch workers ─▶ NotificationService ─▶ LogNotifier
//!                                                      │
//!                                                      └─▶ NotificationSent/Failed (optional)
//! ```
//!
//! ## Configuration
//! - `EVENT_BUS_URL` or `EVENT_DRIVEN__BUS__URL`: bus address (default `nats://localhost:4222`)
//! - `EVENT_DRIVEN_CONFIG`: YAML settings file
//! - `EVENT_DRIVEN_LOG`: tracing filter (default `info`)

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use event_driven::bus::{BusPublisher, BusSubscriber, Publisher, Subscriber};
use event_driven::config::Settings;
use event_driven::notification::{LogNotifier, NotificationService};
use event_driven::telemetry;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    telemetry::init_tracing();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "notification service stopped");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    info!(url = %settings.bus.url, "starting notification service");

    let subscriber = BusSubscriber::connect(
        &settings.bus.url,
        settings.bus.connect_options(),
        settings.dispatch.dispatch_config(),
    )?;

    let notifier = LogNotifier::new().with_latency(settings.notification.latency());
    let mut service = NotificationService::new(notifier)
        .with_subscriptions(settings.notification.event_types()?);

    let publisher = if settings.notification.report_outcome {
        let mut options = settings.bus.connect_options();
        options.name = format!("{}-publisher", options.name);
        let publisher = Arc::new(BusPublisher::connect(&settings.bus.url, options)?);
        service = service.with_publisher(publisher.clone() as Arc<dyn Publisher>);
        Some(publisher)
    } else {
        None
    };

    service.start(&subscriber)?;
    info!("notification service started");

    wait_for_shutdown()?;
    info!("shutting down");

    subscriber.close();
    let stats = subscriber.join(SHUTDOWN_GRACE);
    if let Some(publisher) = publisher {
        publisher.close();
    }
    info!(
        received = stats.received,
        handled = stats.handled,
        failed = stats.failed,
        decode_failed = stats.decode_failed,
        dropped = stats.dropped,
        "notification service stopped"
    );
    Ok(())
}

fn wait_for_shutdown() -> std::io::Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())
}
