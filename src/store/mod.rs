//! Persistence collaborator used by the producer services.
//!
//! The services only need create and fetch by identifier. Updating an order's
//! status is a separate capability that a store may or may not offer; callers
//! discover it through [`OrderStore::status_updates`].

mod memory;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::InMemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("outbox record {id} is no longer leased to {worker}")]
    LeaseLost { id: u64, worker: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct UnknownOrderStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownOrderStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(UnknownOrderStatus(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewOrder {
    pub user_id: String,
    pub amount: f64,
    pub status: OrderStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub amount: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub trait UserStore: Send + Sync {
    /// Persist a user and return its generated identifier.
    fn create_user(&self, user: &NewUser) -> Result<String, StoreError>;

    fn get_user(&self, id: &str) -> Result<User, StoreError>;
}

pub trait OrderStore: Send + Sync {
    /// Persist an order and return its generated identifier.
    fn create_order(&self, order: &NewOrder) -> Result<String, StoreError>;

    fn get_order(&self, id: &str) -> Result<Order, StoreError>;

    /// The status-update capability, if this store offers it.
    fn status_updates(&self) -> Option<&dyn OrderStatusStore> {
        None
    }
}

/// Optional order capability: change the status of an existing order.
pub trait OrderStatusStore: Send + Sync {
    /// Persist the new status and return the updated order.
    fn update_order_status(&self, id: &str, status: OrderStatus) -> Result<Order, StoreError>;
}

impl<T: UserStore + ?Sized> UserStore for Arc<T> {
    fn create_user(&self, user: &NewUser) -> Result<String, StoreError> {
        (**self).create_user(user)
    }

    fn get_user(&self, id: &str) -> Result<User, StoreError> {
        (**self).get_user(id)
    }
}

impl<T: OrderStore + ?Sized> OrderStore for Arc<T> {
    fn create_order(&self, order: &NewOrder) -> Result<String, StoreError> {
        (**self).create_order(order)
    }

    fn get_order(&self, id: &str) -> Result<Order, StoreError> {
        (**self).get_order(id)
    }

    fn status_updates(&self) -> Option<&dyn OrderStatusStore> {
        (**self).status_updates()
    }
}
