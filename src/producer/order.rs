use tracing::info;

use super::{publish_best_effort, ServiceError};
use crate::bus::Publisher;
use crate::event::Event;
use crate::store::{NewOrder, Order, OrderStatus, OrderStore};

/// Creates orders and moves them through their statuses.
pub struct OrderService<S, P> {
    store: S,
    publisher: P,
}

impl<S: OrderStore, P: Publisher> OrderService<S, P> {
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    /// Persist a `pending` order, then best-effort publish `OrderCreated`.
    pub fn create_order(&self, user_id: &str, amount: f64) -> Result<String, ServiceError> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::Invalid("user id must not be blank".to_string()));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ServiceError::Invalid(format!("amount {amount} must be positive")));
        }

        let id = self.store.create_order(&NewOrder {
            user_id: user_id.to_string(),
            amount,
            status: OrderStatus::Pending,
        })?;
        info!(order_id = %id, user_id, amount, "order created");

        let event = Event::order_created(&id, user_id, amount);
        publish_best_effort(&self.publisher, "order", &id, &event);
        Ok(id)
    }

    pub fn get_order(&self, id: &str) -> Result<Order, ServiceError> {
        Ok(self.store.get_order(id)?)
    }

    /// Persist a status change, then best-effort publish `OrderUpdated` and,
    /// for terminal statuses, `OrderCompleted` or `OrderCancelled`.
    ///
    /// Fails with [`ServiceError::Unsupported`] when the store cannot update
    /// statuses.
    pub fn update_order_status(&self, id: &str, status: OrderStatus) -> Result<Order, ServiceError> {
        let updates = self
            .store
            .status_updates()
            .ok_or(ServiceError::Unsupported("order status updates"))?;

        let previous = self.store.get_order(id)?;
        let order = updates.update_order_status(id, status)?;
        info!(order_id = %id, from = %previous.status, to = %order.status, "order status updated");

        let updated = Event::order_updated(&order.id, &order.user_id, order.amount, order.status.as_str());
        publish_best_effort(&self.publisher, "order", &order.id, &updated);

        let transition = match order.status {
            OrderStatus::Completed => Some(Event::order_completed(&order.id, &order.user_id)),
            OrderStatus::Cancelled => Some(Event::order_cancelled(&order.id, &order.user_id)),
            OrderStatus::Pending | OrderStatus::Processing => None,
        };
        if let Some(event) = transition {
            publish_best_effort(&self.publisher, "order", &order.id, &event);
        }

        Ok(order)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
