//! Reactive collections.
//!
//! A [`Repository`] stores JSON entities and publishes a
//! [`REPOSITORY_CHANGED`] event for every entity it creates, updates or
//! deletes. Storing a JSON array fans out: each element becomes its own entity
//! and its own event, so per-item observers run once per item. Storing any
//! other value publishes exactly one event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use indexmap::map::Entry;
use parking_lot::RwLock;
use serde_json::Value;
use vela_system::api::API;

use crate::bus::EventBus;
use crate::error::EventError;
use crate::event::{ChangeType, Event, RepositoryChange};

/// Kind of every repository change event.
pub const REPOSITORY_CHANGED: &str = "repository.changed";

/// A named reactive collection of JSON entities.
pub struct Repository {
    name: String,
    bus: EventBus,
    entities: RwLock<IndexMap<String, Value>>,
    next_id: AtomicU64,
}

impl core::fmt::Debug for Repository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

impl Repository {
    /// Creates an empty repository publishing on `bus`.
    #[must_use]
    pub fn new(name: impl Into<String>, bus: EventBus) -> Self {
        Self {
            name: name.into(),
            bus,
            entities: RwLock::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The repository name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores a value and returns the ids of the stored entities.
    ///
    /// An array stores each element as a separate entity and publishes one
    /// event per element. Any other value is stored as one entity.
    /// Entities carrying a string or number `"id"` field replace the entity
    /// with that id (an `updated` change); others get a generated id.
    pub fn store(&self, value: Value) -> Vec<String> {
        let items = match value {
            Value::Array(items) => items,
            single => vec![single],
        };

        let mut events = Vec::with_capacity(items.len());
        let mut ids = Vec::with_capacity(items.len());
        {
            let mut entities = self.entities.write();
            for item in items {
                let id = entity_id(&item).unwrap_or_else(|| self.generate_id());
                let (change_type, old_value) = match entities.entry(id.clone()) {
                    Entry::Occupied(mut slot) => {
                        let old = core::mem::replace(slot.get_mut(), item.clone());
                        (ChangeType::Updated, Some(old))
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(item.clone());
                        (ChangeType::Created, None)
                    }
                };
                events.push(self.change_event(change_type, &id, Some(item), old_value));
                ids.push(id);
            }
        }

        // Published after the table lock is released.
        self.bus.publish_all(events);
        ids
    }

    /// Replaces the entity with `id`, returning its previous value.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::EntityNotFound`] if no such entity exists.
    pub fn update(&self, id: &str, value: Value) -> Result<Value, EventError> {
        let old = {
            let mut entities = self.entities.write();
            let slot = entities.get_mut(id).ok_or_else(|| self.not_found(id))?;
            core::mem::replace(slot, value.clone())
        };
        self.bus.publish(self.change_event(
            ChangeType::Updated,
            id,
            Some(value),
            Some(old.clone()),
        ));
        Ok(old)
    }

    /// Removes the entity with `id`, returning its value.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::EntityNotFound`] if no such entity exists.
    pub fn delete(&self, id: &str) -> Result<Value, EventError> {
        let old = self
            .entities
            .write()
            .shift_remove(id)
            .ok_or_else(|| self.not_found(id))?;
        self.bus
            .publish(self.change_event(ChangeType::Deleted, id, None, Some(old.clone())));
        Ok(old)
    }

    /// Returns a copy of the entity with `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Value> {
        self.entities.read().get(id).cloned()
    }

    /// Returns all entities in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<Value> {
        self.entities.read().values().cloned().collect()
    }

    /// Number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if the repository holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn generate_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn not_found(&self, id: &str) -> EventError {
        EventError::EntityNotFound {
            repository: self.name.clone(),
            id: id.to_string(),
        }
    }

    fn change_event(
        &self,
        change_type: ChangeType,
        id: &str,
        new_value: Option<Value>,
        old_value: Option<Value>,
    ) -> Event {
        Event::repository_change(
            REPOSITORY_CHANGED,
            RepositoryChange {
                repository_name: self.name.clone(),
                change_type,
                entity_id: Some(id.to_string()),
                new_value,
                old_value,
            },
        )
    }
}

fn entity_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Registry of named repositories sharing one bus.
#[derive(Clone)]
pub struct Repositories {
    bus: EventBus,
    repositories: Arc<RwLock<IndexMap<String, Arc<Repository>>>>,
}

impl API for Repositories {}

impl core::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Repositories")
            .field("repositories", &self.names())
            .finish()
    }
}

impl Repositories {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            repositories: Arc::default(),
        }
    }

    /// Returns the repository called `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<Repository> {
        if let Some(existing) = self.repositories.read().get(name) {
            return Arc::clone(existing);
        }
        let mut repositories = self.repositories.write();
        Arc::clone(
            repositories
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Repository::new(name, self.bus.clone()))),
        )
    }

    /// Returns the repository called `name`, if it exists.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Repository>> {
        self.repositories.read().get(name).cloned()
    }

    /// Names of all repositories.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.repositories.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::{SpawnError, Spawner};
    use futures::future::BoxFuture;
    use serde_json::json;

    struct Discard;

    impl Spawner for Discard {
        fn spawn_detached(
            &self,
            _name: &str,
            _future: BoxFuture<'static, ()>,
        ) -> Result<(), SpawnError> {
            Ok(())
        }
    }

    fn repository() -> Repository {
        Repository::new("users", EventBus::new(Arc::new(Discard)))
    }

    #[test]
    fn array_store_fans_out_per_item() {
        let repo = repository();
        let ids = repo.store(json!([{"name": "a"}, {"name": "b"}, {"name": "c"}]));
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(repo.len(), 3);
        assert_eq!(repo.bus.published_count(), 3);
    }

    #[test]
    fn scalar_store_is_one_entity() {
        let repo = repository();
        let ids = repo.store(json!(42));
        assert_eq!(ids.len(), 1);
        assert_eq!(repo.get(&ids[0]), Some(json!(42)));
        assert_eq!(repo.bus.published_count(), 1);
    }

    #[test]
    fn explicit_id_replaces_entity() {
        let repo = repository();
        repo.store(json!({"id": "u1", "name": "a"}));
        repo.store(json!({"id": "u1", "name": "b"}));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.get("u1").unwrap()["name"], "b");
    }

    #[test]
    fn numeric_id_is_used() {
        let repo = repository();
        assert_eq!(repo.store(json!({"id": 7})), vec!["7"]);
    }

    #[test]
    fn update_and_delete_missing_entity_fail() {
        let repo = repository();
        assert!(matches!(
            repo.update("nope", json!(1)),
            Err(EventError::EntityNotFound { .. })
        ));
        assert!(repo.delete("nope").is_err());
    }

    #[test]
    fn delete_returns_old_value() {
        let repo = repository();
        let ids = repo.store(json!("x"));
        assert_eq!(repo.delete(&ids[0]).unwrap(), json!("x"));
        assert!(repo.is_empty());
    }

    #[test]
    fn registry_reuses_repositories() {
        let registry = Repositories::new(EventBus::new(Arc::new(Discard)));
        let a = registry.get_or_create("orders");
        let b = registry.get_or_create("orders");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.names(), vec!["orders"]);
        assert!(registry.get("missing").is_none());
    }
}
