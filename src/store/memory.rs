use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;

use super::{
    NewOrder, NewUser, Order, OrderStatus, OrderStatusStore, OrderStore, StoreError, User,
    UserStore,
};
use crate::outbox::{OutboxRecord, OutboxStatus, OutboxStore};

#[derive(Default)]
struct Tables {
    users: RwLock<HashMap<String, User>>,
    orders: RwLock<HashMap<String, Order>>,
    outbox: RwLock<Vec<OutboxRecord>>,
    user_seq: AtomicU64,
    order_seq: AtomicU64,
    outbox_seq: AtomicU64,
    unavailable: AtomicBool,
}

/// Thread-safe in-memory store for users, orders and the outbox.
///
/// Clones share the same tables. Identifiers are sequential decimal strings
/// per table, starting at `"1"`.
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<Tables>,
    status_updates: bool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Tables::default()),
            status_updates: true,
        }
    }

    /// A handle on the same tables that does not offer status updates.
    pub fn without_status_updates(mut self) -> Self {
        self.status_updates = false;
        self
    }

    /// Make every operation fail with [`StoreError::Unavailable`] (`false`)
    /// or work again (`true`).
    pub fn set_available(&self, available: bool) {
        self.tables.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Snapshot of every outbox record, oldest first.
    pub fn outbox_records(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        self.check_available()?;
        let outbox = self
            .tables
            .outbox
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        Ok(outbox.clone())
    }

    pub fn user_count(&self) -> usize {
        self.tables.users.read().map(|u| u.len()).unwrap_or(0)
    }

    pub fn order_count(&self) -> usize {
        self.tables.orders.read().map(|o| o.len()).unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.tables.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }

    fn next(seq: &AtomicU64) -> u64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn with_outbox_record<T>(
        &self,
        id: u64,
        update: impl FnOnce(&mut OutboxRecord) -> T,
    ) -> Result<T, StoreError> {
        self.check_available()?;
        let mut outbox = self
            .tables
            .outbox
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox write"))?;
        let record = outbox
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "outbox record",
                id: id.to_string(),
            })?;
        Ok(update(record))
    }
}

impl UserStore for InMemoryStore {
    fn create_user(&self, user: &NewUser) -> Result<String, StoreError> {
        self.check_available()?;
        let mut users = self
            .tables
            .users
            .write()
            .map_err(|_| StoreError::LockPoisoned("users write"))?;
        let id = Self::next(&self.tables.user_seq).to_string();
        users.insert(
            id.clone(),
            User {
                id: id.clone(),
                name: user.name.clone(),
                email: user.email.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    fn get_user(&self, id: &str) -> Result<User, StoreError> {
        self.check_available()?;
        let users = self
            .tables
            .users
            .read()
            .map_err(|_| StoreError::LockPoisoned("users read"))?;
        users.get(id).cloned().ok_or_else(|| StoreError::NotFound {
            kind: "user",
            id: id.to_string(),
        })
    }
}

impl OrderStore for InMemoryStore {
    fn create_order(&self, order: &NewOrder) -> Result<String, StoreError> {
        self.check_available()?;
        let mut orders = self
            .tables
            .orders
            .write()
            .map_err(|_| StoreError::LockPoisoned("orders write"))?;
        let id = Self::next(&self.tables.order_seq).to_string();
        let now = Utc::now();
        orders.insert(
            id.clone(),
            Order {
                id: id.clone(),
                user_id: order.user_id.clone(),
                amount: order.amount,
                status: order.status,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    fn get_order(&self, id: &str) -> Result<Order, StoreError> {
        self.check_available()?;
        let orders = self
            .tables
            .orders
            .read()
            .map_err(|_| StoreError::LockPoisoned("orders read"))?;
        orders.get(id).cloned().ok_or_else(|| StoreError::NotFound {
            kind: "order",
            id: id.to_string(),
        })
    }

    fn status_updates(&self) -> Option<&dyn OrderStatusStore> {
        if self.status_updates {
            Some(self)
        } else {
            None
        }
    }
}

impl OrderStatusStore for InMemoryStore {
    fn update_order_status(&self, id: &str, status: OrderStatus) -> Result<Order, StoreError> {
        self.check_available()?;
        let mut orders = self
            .tables
            .orders
            .write()
            .map_err(|_| StoreError::LockPoisoned("orders write"))?;
        let order = orders.get_mut(id).ok_or_else(|| StoreError::NotFound {
            kind: "order",
            id: id.to_string(),
        })?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

impl OutboxStore for InMemoryStore {
    fn stage(&self, event_type: &str, payload: Vec<u8>) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut outbox = self
            .tables
            .outbox
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox write"))?;
        let id = Self::next(&self.tables.outbox_seq);
        outbox.push(OutboxRecord::new(id, event_type, payload));
        Ok(id)
    }

    fn claim(&self, worker: &str, limit: usize, lease: Duration) -> Result<Vec<OutboxRecord>, StoreError> {
        self.check_available()?;
        let mut outbox = self
            .tables
            .outbox
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox write"))?;
        let now = Utc::now();
        let claimed = outbox
            .iter_mut()
            .filter(|r| r.is_claimable(now))
            .take(limit)
            .map(|r| {
                r.claim(worker, lease, now);
                r.clone()
            })
            .collect();
        Ok(claimed)
    }

    fn complete(&self, id: u64, worker: &str) -> Result<(), StoreError> {
        self.with_outbox_record(id, |r| {
            ensure_held(r, worker)?;
            r.complete(Utc::now());
            Ok(())
        })?
    }

    fn release(&self, id: u64, worker: &str, error: &str, max_attempts: u32) -> Result<OutboxStatus, StoreError> {
        self.with_outbox_record(id, |r| {
            ensure_held(r, worker)?;
            Ok(r.release(error, max_attempts))
        })?
    }
}

fn ensure_held(record: &OutboxRecord, worker: &str) -> Result<(), StoreError> {
    if record.is_held_by(worker) {
        Ok(())
    } else {
        Err(StoreError::LeaseLost {
            id: record.id,
            worker: worker.to_string(),
        })
    }
}
