use super::*;
use crate::protocol::{AdpMessageType, Adpdu};
use crate::types::{MacAddress, UniqueIdentifier};
use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

fn available(entity_id: u64, available_index: u32, valid_time: u8) -> Adpdu {
    Adpdu {
        message_type: AdpMessageType::EntityAvailable,
        valid_time,
        entity_id: UniqueIdentifier::new(entity_id),
        available_index,
        ..Adpdu::discover()
    }
}

fn departing(entity_id: u64) -> Adpdu {
    Adpdu {
        message_type: AdpMessageType::EntityDeparting,
        entity_id: UniqueIdentifier::new(entity_id),
        ..Adpdu::discover()
    }
}

fn mac() -> MacAddress {
    MacAddress::new([2, 0, 0, 0, 0, 9])
}

#[tokio::test(start_paused = true)]
async fn test_discover_then_refresh() {
    let now = Instant::now();
    let mut state = DiscoveryState::new(Duration::from_secs(10), now);

    let action = state.handle_adpdu(&available(1, 0, 10), mac(), now);
    assert_eq!(
        action,
        Some(DiscoveryAction::Discovered {
            entity_id: UniqueIdentifier::new(1),
            mac: mac(),
        })
    );

    let action = state.handle_adpdu(&available(1, 1, 10), mac(), now);
    assert_eq!(
        action,
        Some(DiscoveryAction::Refreshed {
            entity_id: UniqueIdentifier::new(1),
        })
    );
    assert_eq!(state.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_available_index_regression_means_restart() {
    let now = Instant::now();
    let mut state = DiscoveryState::new(Duration::from_secs(10), now);

    let _ = state.handle_adpdu(&available(1, 100, 10), mac(), now);
    let action = state.handle_adpdu(&available(1, 3, 10), mac(), now);
    assert_eq!(
        action,
        Some(DiscoveryAction::Restarted {
            entity_id: UniqueIdentifier::new(1),
            mac: mac(),
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_departing_removes() {
    let now = Instant::now();
    let mut state = DiscoveryState::new(Duration::from_secs(10), now);

    let _ = state.handle_adpdu(&available(1, 0, 10), mac(), now);
    let action = state.handle_adpdu(&departing(1), mac(), now);
    assert_eq!(
        action,
        Some(DiscoveryAction::Departed {
            entity_id: UniqueIdentifier::new(1),
        })
    );
    assert_eq!(state.len(), 0);

    // Departure of an unknown entity is a no-op
    assert_eq!(state.handle_adpdu(&departing(2), mac(), now), None);
}

#[tokio::test(start_paused = true)]
async fn test_liveness_expiry_is_twice_valid_time() {
    let now = Instant::now();
    let mut state = DiscoveryState::new(Duration::from_secs(1000), now);

    let _ = state.handle_adpdu(&available(1, 0, 10), mac(), now);

    // Just inside the window: still alive
    assert!(state.expire(now + Duration::from_secs(19)).is_empty());
    // Past valid_time * 2: gone
    let actions = state.expire(now + Duration::from_secs(21));
    assert_eq!(
        actions,
        vec![DiscoveryAction::Departed {
            entity_id: UniqueIdentifier::new(1),
        }]
    );
    assert_eq!(state.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_discover_tick_cadence() {
    let now = Instant::now();
    let mut state = DiscoveryState::new(Duration::from_secs(10), now);

    assert!(state.poll_discover(now)); // immediate first tick
    assert!(!state.poll_discover(now + Duration::from_secs(5)));
    assert!(state.poll_discover(now + Duration::from_secs(10)));
}

#[tokio::test(start_paused = true)]
async fn test_advertise_cycle() {
    let now = Instant::now();
    let mut adv = AdvertiseState::new(
        UniqueIdentifier::new(0xC0),
        UniqueIdentifier::new(0x1),
        31,
        now,
    );

    // Disabled: nothing goes out, even when forced
    assert!(adv.poll_advertise(now, true).is_none());

    adv.enable(now);
    let first = adv.poll_advertise(now, false).expect("due immediately");
    assert_eq!(first.message_type, AdpMessageType::EntityAvailable);
    assert_eq!(first.entity_id, UniqueIdentifier::new(0xC0));

    // Not due again until the re-advertise interval
    assert!(adv.poll_advertise(now + Duration::from_secs(1), false).is_none());
    // A received ENTITY_DISCOVER forces one out, with a fresh index
    let forced = adv
        .poll_advertise(now + Duration::from_secs(1), true)
        .expect("forced advertisement");
    assert_eq!(
        forced.available_index,
        first.available_index.wrapping_add(1)
    );

    let bye = adv.departing();
    assert_eq!(bye.message_type, AdpMessageType::EntityDeparting);
}

proptest! {
    // Cache size always equals the number of distinct live entities,
    // whatever the interleaving of AVAILABLE and DEPARTING
    #[test]
    fn prop_tracked_count_matches_live_set(events in prop::collection::vec((0u64..8, any::<bool>()), 0..64)) {
        let now = Instant::now();
        let mut state = DiscoveryState::new(Duration::from_secs(10), now);
        let mut live = std::collections::HashSet::new();

        for (id, arrives) in events {
            if arrives {
                let _ = state.handle_adpdu(&available(id, 0, 10), mac(), now);
                live.insert(id);
            } else {
                let _ = state.handle_adpdu(&departing(id), mac(), now);
                live.remove(&id);
            }
        }
        prop_assert_eq!(state.len(), live.len());
    }
}
