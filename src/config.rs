//! Layered settings for the services and the `notification-service` binary.
//!
//! Sources, later overriding earlier:
//! 1. built-in defaults
//! 2. `event-driven.yaml` in the working directory (optional)
//! 3. the YAML file named by `EVENT_DRIVEN_CONFIG` (required when set)
//! 4. `EVENT_DRIVEN__<SECTION>__<KEY>` environment variables
//! 5. `EVENT_BUS_URL`, kept for older deployments

use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::bus::{ConnectOptions, DispatchConfig, ReconnectPolicy};
use crate::event::EventType;

pub const DEFAULT_CONFIG_FILE: &str = "event-driven";
pub const CONFIG_ENV_VAR: &str = "EVENT_DRIVEN_CONFIG";
pub const CONFIG_ENV_PREFIX: &str = "EVENT_DRIVEN";
pub const LEGACY_BUS_URL_VAR: &str = "EVENT_BUS_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub url: String,
    pub client_name: String,
    pub reconnect_wait_ms: u64,
    pub max_reconnects: u32,
    /// Multiplier applied to the wait after each failed attempt; `1.0` keeps it fixed.
    pub backoff_factor: f64,
    pub max_reconnect_wait_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            client_name: "event-driven".to_string(),
            reconnect_wait_ms: 1_000,
            max_reconnects: 10,
            backoff_factor: 1.0,
            max_reconnect_wait_ms: 30_000,
        }
    }
}

impl BusSettings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::fixed(Duration::from_millis(self.reconnect_wait_ms), self.max_reconnects)
            .with_factor(
                self.backoff_factor,
                Duration::from_millis(self.max_reconnect_wait_ms),
            )
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::new(self.client_name.clone()).with_reconnect(self.reconnect_policy())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        let defaults = DispatchConfig::default();
        Self {
            workers: defaults.workers,
            queue_capacity: defaults.queue_capacity,
        }
    }
}

impl DispatchSettings {
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Event-type tags to subscribe to.
    pub subscriptions: Vec<String>,
    pub latency_ms: u64,
    /// Publish `NotificationSent`/`NotificationFailed` after each dispatch.
    pub report_outcome: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            subscriptions: crate::notification::SUPPORTED
                .iter()
                .map(|t| t.as_str().to_string())
                .collect(),
            latency_ms: 100,
            report_outcome: false,
        }
    }
}

impl NotificationSettings {
    /// Parsed subscription tags; each tag may appear only once.
    pub fn event_types(&self) -> Result<Vec<EventType>, ConfigError> {
        let mut types = Vec::with_capacity(self.subscriptions.len());
        for tag in &self.subscriptions {
            let event_type = tag
                .trim()
                .parse::<EventType>()
                .map_err(|err| ConfigError::Invalid(format!("notification.subscriptions: {err}")))?;
            if types.contains(&event_type) {
                return Err(ConfigError::Invalid(format!(
                    "notification.subscriptions: {event_type} listed twice"
                )));
            }
            types.push(event_type);
        }
        Ok(types)
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bus: BusSettings,
    pub dispatch: DispatchSettings,
    pub notification: NotificationSettings,
}

impl Settings {
    /// Load from the files and environment listed in the module docs.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&path, FileFormat::Yaml).required(true));
        }

        let settings: Settings = builder
            .add_source(environment())
            .set_override_option("bus.url", std::env::var(LEGACY_BUS_URL_VAR).ok())?
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a YAML document layered over the defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.url.trim().is_empty() {
            return Err(ConfigError::Invalid("bus.url must not be empty".into()));
        }
        if self.dispatch.workers == 0 {
            return Err(ConfigError::Invalid("dispatch.workers must be at least 1".into()));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.queue_capacity must be at least 1".into(),
            ));
        }
        self.notification.event_types()?;
        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(CONFIG_ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("notification.subscriptions")
}
