//! Registry mapping entity ids to controlled entities

use super::ControlledEntity;
use crate::types::UniqueIdentifier;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Thread-safe registry of all currently-known entities.
///
/// Readers get reference-counted handles; the map lock is only held for
/// the lookup itself, never across callbacks or awaits.
#[derive(Debug, Default)]
pub struct EntityCache {
    entities: RwLock<HashMap<UniqueIdentifier, Arc<ControlledEntity>>>,
}

impl EntityCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly-discovered entity. Returns `false` if the id was
    /// already present (the existing entry is kept).
    pub fn insert(&self, entity: Arc<ControlledEntity>) -> bool {
        let mut map = self.entities.write().expect("cache lock poisoned");
        match map.entry(entity.entity_id()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(entity);
                true
            }
        }
    }

    /// Remove an entity, returning it if it was present
    pub fn remove(&self, entity_id: UniqueIdentifier) -> Option<Arc<ControlledEntity>> {
        self.entities
            .write()
            .expect("cache lock poisoned")
            .remove(&entity_id)
    }

    /// Look up an entity by id
    #[must_use]
    pub fn get(&self, entity_id: UniqueIdentifier) -> Option<Arc<ControlledEntity>> {
        self.entities
            .read()
            .expect("cache lock poisoned")
            .get(&entity_id)
            .cloned()
    }

    /// Whether an entity id is known
    #[must_use]
    pub fn contains(&self, entity_id: UniqueIdentifier) -> bool {
        self.entities
            .read()
            .expect("cache lock poisoned")
            .contains_key(&entity_id)
    }

    /// Number of known entities
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.read().expect("cache lock poisoned").len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all entities
    #[must_use]
    pub fn entities(&self) -> Vec<Arc<ControlledEntity>> {
        self.entities
            .read()
            .expect("cache lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Remove and return every entity (controller shutdown)
    pub fn drain(&self) -> Vec<Arc<ControlledEntity>> {
        self.entities
            .write()
            .expect("cache lock poisoned")
            .drain()
            .map(|(_, entity)| entity)
            .collect()
    }
}
