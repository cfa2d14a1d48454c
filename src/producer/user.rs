use tracing::info;

use super::{publish_best_effort, ServiceError};
use crate::bus::Publisher;
use crate::event::Event;
use crate::store::{NewUser, User, UserStore};

/// Creates users and announces them with `UserCreated`.
pub struct UserService<S, P> {
    store: S,
    publisher: P,
}

impl<S: UserStore, P: Publisher> UserService<S, P> {
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    /// Persist a user, then best-effort publish `UserCreated`.
    ///
    /// Returns the new id even when the event could not be published.
    pub fn create_user(&self, name: &str, email: &str) -> Result<String, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::Invalid("name must not be blank".to_string()));
        }
        if !email.contains('@') {
            return Err(ServiceError::Invalid(format!("{email:?} is not an email address")));
        }

        let user = NewUser {
            name: name.to_string(),
            email: email.to_string(),
        };
        let id = self.store.create_user(&user)?;
        info!(user_id = %id, email, "user created");

        let event = Event::user_created(&id, &user.name, &user.email);
        publish_best_effort(&self.publisher, "user", &id, &event);
        Ok(id)
    }

    pub fn get_user(&self, id: &str) -> Result<User, ServiceError> {
        Ok(self.store.get_user(id)?)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
