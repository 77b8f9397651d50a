use super::*;
use crate::model::{AcquireState, DescriptorType, EntityTree};
use crate::types::{AvdeccFixedString, MacAddress, UniqueIdentifier};
use std::sync::Arc;

fn entity(id: u64) -> Arc<ControlledEntity> {
    Arc::new(ControlledEntity::new(
        UniqueIdentifier::new(id),
        MacAddress::new([2, 0, 0, 0, 0, 1]),
    ))
}

#[test]
fn test_insert_and_lookup() {
    let cache = EntityCache::new();
    assert!(cache.insert(entity(1)));
    assert!(cache.insert(entity(2)));
    assert_eq!(cache.len(), 2);
    assert!(cache.contains(UniqueIdentifier::new(1)));
    assert!(cache.get(UniqueIdentifier::new(3)).is_none());
}

#[test]
fn test_duplicate_insert_keeps_existing() {
    let cache = EntityCache::new();
    let first = entity(1);
    first.set_advertised(true);
    assert!(cache.insert(first));
    assert!(!cache.insert(entity(1)));
    // Existing entry untouched
    assert!(cache.get(UniqueIdentifier::new(1)).unwrap().was_advertised());
}

#[test]
fn test_remove() {
    let cache = EntityCache::new();
    cache.insert(entity(1));
    assert!(cache.remove(UniqueIdentifier::new(1)).is_some());
    assert!(cache.remove(UniqueIdentifier::new(1)).is_none());
    assert!(cache.is_empty());
}

#[test]
fn test_drain_on_shutdown() {
    let cache = EntityCache::new();
    cache.insert(entity(1));
    cache.insert(entity(2));
    let drained = cache.drain();
    assert_eq!(drained.len(), 2);
    assert!(cache.is_empty());
}

#[test]
fn test_tree_snapshot_isolated_from_mutation() {
    let e = entity(1);
    e.set_tree(EntityTree::default());

    let before = e.tree();
    e.update_tree(|tree| {
        tree.dynamic.entity_name = AvdeccFixedString::new("Renamed");
    });
    let after = e.tree();

    // The earlier snapshot is untouched by the copy-on-write update
    assert_eq!(before.dynamic.entity_name.as_str(), "");
    assert_eq!(after.dynamic.entity_name.as_str(), "Renamed");
}

#[test]
fn test_acquire_state_tracking() {
    let e = entity(1);
    assert_eq!(e.acquire_state(), AcquireState::NotAcquired);
    assert!(!e.is_acquired());

    e.set_acquire_state(AcquireState::TryAcquire, UniqueIdentifier::NULL);
    assert!(e.is_acquiring());

    let owner = UniqueIdentifier::new(0xAAAA_AAAA_AAAA_AAAA);
    e.set_acquire_state(AcquireState::AcquiredByOther, owner);
    assert_eq!(e.acquire_state(), AcquireState::AcquiredByOther);
    assert_eq!(e.owning_controller(), owner);
}

#[test]
fn test_dynamic_name_update() {
    let e = entity(1);
    e.update_tree(|tree| {
        tree.dynamic.names.insert(
            (DescriptorType::StreamInput, 0),
            AvdeccFixedString::new("Main In"),
        );
    });
    let tree = e.tree();
    assert_eq!(
        tree.dynamic.names[&(DescriptorType::StreamInput, 0)].as_str(),
        "Main In"
    );
}
