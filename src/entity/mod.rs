//! Controlled entities and the thread-safe registry holding them

mod cache;
#[cfg(test)]
mod tests;

pub use cache::EntityCache;

use crate::model::{AcquireState, EntityTree};
use crate::types::{MacAddress, UniqueIdentifier};
use std::sync::{Arc, RwLock};

/// Mutable state of one controlled entity.
///
/// The tree is stored behind an `Arc` and mutated copy-on-write, so readers
/// holding a snapshot are never blocked by, or exposed to, in-progress
/// writes.
#[derive(Debug)]
struct EntityState {
    tree: Arc<EntityTree>,
    acquire_state: AcquireState,
    owning_controller: UniqueIdentifier,
    was_advertised: bool,
    enumeration_failed: bool,
}

/// One remote entity known to the controller.
///
/// Created on discovery, filled in by enumeration, removed on departure.
/// All mutation happens on the controller event loop; the inner lock is
/// only ever held for short, await-free sections.
#[derive(Debug)]
pub struct ControlledEntity {
    entity_id: UniqueIdentifier,
    mac_address: MacAddress,
    state: RwLock<EntityState>,
}

impl ControlledEntity {
    pub(crate) fn new(entity_id: UniqueIdentifier, mac_address: MacAddress) -> Self {
        Self {
            entity_id,
            mac_address,
            state: RwLock::new(EntityState {
                tree: Arc::new(EntityTree::default()),
                acquire_state: AcquireState::NotAcquired,
                owning_controller: UniqueIdentifier::NULL,
                was_advertised: false,
                enumeration_failed: false,
            }),
        }
    }

    /// Entity id
    #[must_use]
    pub fn entity_id(&self) -> UniqueIdentifier {
        self.entity_id
    }

    /// Source MAC the entity advertises from
    #[must_use]
    pub fn mac_address(&self) -> MacAddress {
        self.mac_address
    }

    /// Snapshot of the entity model
    #[must_use]
    pub fn tree(&self) -> Arc<EntityTree> {
        self.state.read().expect("entity lock poisoned").tree.clone()
    }

    /// Current acquire state
    #[must_use]
    pub fn acquire_state(&self) -> AcquireState {
        self.state.read().expect("entity lock poisoned").acquire_state
    }

    /// Controller currently owning the entity (null when not acquired)
    #[must_use]
    pub fn owning_controller(&self) -> UniqueIdentifier {
        self.state
            .read()
            .expect("entity lock poisoned")
            .owning_controller
    }

    /// Whether enumeration completed and observers were told
    #[must_use]
    pub fn was_advertised(&self) -> bool {
        self.state.read().expect("entity lock poisoned").was_advertised
    }

    /// Whether the model is incomplete due to an enumeration failure
    #[must_use]
    pub fn has_enumeration_error(&self) -> bool {
        self.state
            .read()
            .expect("entity lock poisoned")
            .enumeration_failed
    }

    /// Whether this controller holds the acquisition
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.acquire_state() == AcquireState::Acquired
    }

    /// Whether an acquire attempt is in flight
    #[must_use]
    pub fn is_acquiring(&self) -> bool {
        self.acquire_state() == AcquireState::TryAcquire
    }

    pub(crate) fn set_tree(&self, tree: EntityTree) {
        self.state.write().expect("entity lock poisoned").tree = Arc::new(tree);
    }

    pub(crate) fn set_advertised(&self, advertised: bool) {
        self.state.write().expect("entity lock poisoned").was_advertised = advertised;
    }

    pub(crate) fn set_enumeration_failed(&self, failed: bool) {
        self.state
            .write()
            .expect("entity lock poisoned")
            .enumeration_failed = failed;
    }

    pub(crate) fn set_acquire_state(&self, state: AcquireState, owner: UniqueIdentifier) {
        let mut guard = self.state.write().expect("entity lock poisoned");
        guard.acquire_state = state;
        guard.owning_controller = owner;
    }

    /// Mutate the entity tree copy-on-write
    pub(crate) fn update_tree(&self, f: impl FnOnce(&mut EntityTree)) {
        let mut guard = self.state.write().expect("entity lock poisoned");
        f(Arc::make_mut(&mut guard.tree));
    }
}

/// Read-only handle to a controlled entity.
///
/// The guard keeps the referent alive; it is only handed out for entities
/// that have been advertised to observers.
#[derive(Debug, Clone)]
pub struct ControlledEntityGuard {
    inner: Arc<ControlledEntity>,
}

impl ControlledEntityGuard {
    pub(crate) fn new(inner: Arc<ControlledEntity>) -> Self {
        Self { inner }
    }
}

impl std::ops::Deref for ControlledEntityGuard {
    type Target = ControlledEntity;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
