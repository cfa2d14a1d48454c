//! Payload schemas, one per event-type tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::envelope::DecodeError;
use super::event_type::EventType;

/// RFC3339 (UTC, `Z` suffix) (de)serialization for timestamps.
pub(crate) mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserCreated {
    pub user_id: String,
    pub name: String,
    pub email: String,
    #[serde(with = "rfc3339")]
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserUpdated {
    pub user_id: String,
    pub name: String,
    pub email: String,
    #[serde(with = "rfc3339")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: String,
    pub user_id: String,
    pub amount: f64,
    pub status: String,
    #[serde(with = "rfc3339")]
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdated {
    pub order_id: String,
    pub user_id: String,
    pub amount: f64,
    pub status: String,
    #[serde(with = "rfc3339")]
    pub updated_at: DateTime<Utc>,
}

/// Payload of `NotificationSent` and `NotificationFailed`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(with = "rfc3339")]
    pub sent_at: DateTime<Utc>,
}

/// A field lookup on a loosely typed payload failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("missing field `{0}`")]
    Missing(String),
    #[error("field `{field}` is not a {expected}")]
    Mistyped { field: String, expected: &'static str },
}

/// Generic key/value payload for tags without a strict schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(Map<String, Value>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Read a string field, rejecting absent or non-string values.
    pub fn require_str(&self, key: &str) -> Result<&str, FieldError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(FieldError::Missing(key.to_string())),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(FieldError::Mistyped {
                field: key.to_string(),
                expected: "string",
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Fields {
    fn from(map: Map<String, Value>) -> Self {
        Fields(map)
    }
}

/// An event body, keyed by its tag.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    UserCreated(UserCreated),
    UserUpdated(UserUpdated),
    OrderCreated(OrderCreated),
    OrderUpdated(OrderUpdated),
    NotificationSent(Notification),
    NotificationFailed(Notification),
    /// A known tag registered with a loose schema.
    Generic { event_type: EventType, fields: Fields },
    /// A tag this build does not know; kept verbatim.
    Extension { event_type: String, payload: Value },
}

impl Payload {
    /// The wire tag, also used as the bus subject.
    pub fn tag(&self) -> &str {
        match self {
            Payload::Extension { event_type, .. } => event_type,
            other => other.event_type().map(|t| t.as_str()).unwrap_or_default(),
        }
    }

    /// The registered type, `None` for extensions.
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            Payload::UserCreated(_) => Some(EventType::UserCreated),
            Payload::UserUpdated(_) => Some(EventType::UserUpdated),
            Payload::OrderCreated(_) => Some(EventType::OrderCreated),
            Payload::OrderUpdated(_) => Some(EventType::OrderUpdated),
            Payload::NotificationSent(_) => Some(EventType::NotificationSent),
            Payload::NotificationFailed(_) => Some(EventType::NotificationFailed),
            Payload::Generic { event_type, .. } => Some(*event_type),
            Payload::Extension { .. } => None,
        }
    }

    pub(crate) fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Payload::UserCreated(p) => serde_json::to_value(p),
            Payload::UserUpdated(p) => serde_json::to_value(p),
            Payload::OrderCreated(p) => serde_json::to_value(p),
            Payload::OrderUpdated(p) => serde_json::to_value(p),
            Payload::NotificationSent(p) | Payload::NotificationFailed(p) => {
                serde_json::to_value(p)
            }
            Payload::Generic { fields, .. } => serde_json::to_value(fields),
            Payload::Extension { payload, .. } => Ok(payload.clone()),
        }
    }

    /// Decode `value` with the schema registered for `tag`.
    pub(crate) fn from_value(tag: &str, value: Value) -> Result<Self, DecodeError> {
        let event_type = match tag.parse::<EventType>() {
            Ok(event_type) => event_type,
            Err(_) => {
                return Ok(Payload::Extension {
                    event_type: tag.to_string(),
                    payload: value,
                })
            }
        };

        let schema_error = |source| DecodeError::Payload { event_type, source };
        let payload = match event_type {
            EventType::UserCreated => {
                Payload::UserCreated(serde_json::from_value(value).map_err(schema_error)?)
            }
            EventType::UserUpdated => {
                Payload::UserUpdated(serde_json::from_value(value).map_err(schema_error)?)
            }
            EventType::OrderCreated => {
                Payload::OrderCreated(serde_json::from_value(value).map_err(schema_error)?)
            }
            EventType::OrderUpdated => {
                Payload::OrderUpdated(serde_json::from_value(value).map_err(schema_error)?)
            }
            EventType::NotificationSent => {
                Payload::NotificationSent(serde_json::from_value(value).map_err(schema_error)?)
            }
            EventType::NotificationFailed => {
                Payload::NotificationFailed(serde_json::from_value(value).map_err(schema_error)?)
            }
            EventType::UserDeleted | EventType::OrderCancelled | EventType::OrderCompleted => {
                match value {
                    Value::Object(map) => Payload::Generic {
                        event_type,
                        fields: Fields::from(map),
                    },
                    _ => return Err(DecodeError::NotAnObject { event_type }),
                }
            }
        };
        Ok(payload)
    }
}
