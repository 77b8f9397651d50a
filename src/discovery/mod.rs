//! ADP discovery: remote-entity liveness tracking and local advertising

#[cfg(test)]
mod tests;

use crate::protocol::{AdpMessageType, Adpdu};
use crate::types::{MacAddress, UniqueIdentifier};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// What the controller must do in reaction to a discovery input
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DiscoveryAction {
    /// A previously-unknown entity appeared: create and enumerate it
    Discovered {
        /// The new entity
        entity_id: UniqueIdentifier,
        /// Source MAC it advertises from
        mac: MacAddress,
    },
    /// A known entity re-advertised; liveness was refreshed
    Refreshed {
        /// The entity
        entity_id: UniqueIdentifier,
    },
    /// A known entity's available index went backwards: it restarted.
    /// Purge its state and re-enumerate.
    Restarted {
        /// The entity
        entity_id: UniqueIdentifier,
        /// Source MAC it advertises from
        mac: MacAddress,
    },
    /// An entity announced departure or its liveness expired
    Departed {
        /// The entity
        entity_id: UniqueIdentifier,
    },
}

#[derive(Debug)]
struct Liveness {
    deadline: Instant,
    available_index: u32,
}

/// Tracks remote entities seen through ADP and the periodic discover tick.
///
/// Sans-IO: callers feed in PDUs and poll deadlines; the returned actions
/// drive cache mutation elsewhere.
#[derive(Debug)]
pub(crate) struct DiscoveryState {
    entities: HashMap<UniqueIdentifier, Liveness>,
    discover_interval: Duration,
    next_discover: Instant,
}

impl DiscoveryState {
    pub(crate) fn new(discover_interval: Duration, now: Instant) -> Self {
        Self {
            entities: HashMap::new(),
            discover_interval,
            // first discover goes out immediately
            next_discover: now,
        }
    }

    /// Liveness window for an advertised valid_time
    fn deadline_for(valid_time: u8, now: Instant) -> Instant {
        let valid_time = valid_time.clamp(1, 62);
        now + Duration::from_secs(u64::from(valid_time) * 2)
    }

    /// Feed a received ADP PDU
    pub(crate) fn handle_adpdu(
        &mut self,
        pdu: &Adpdu,
        src_mac: MacAddress,
        now: Instant,
    ) -> Option<DiscoveryAction> {
        match pdu.message_type {
            AdpMessageType::EntityAvailable => {
                let deadline = Self::deadline_for(pdu.valid_time, now);
                match self.entities.get_mut(&pdu.entity_id) {
                    None => {
                        self.entities.insert(
                            pdu.entity_id,
                            Liveness {
                                deadline,
                                available_index: pdu.available_index,
                            },
                        );
                        tracing::debug!(
                            target: "avdecc::controller_state_machine",
                            entity = %pdu.entity_id,
                            "entity discovered"
                        );
                        Some(DiscoveryAction::Discovered {
                            entity_id: pdu.entity_id,
                            mac: src_mac,
                        })
                    }
                    Some(liveness) => {
                        // A regression of available_index means the remote
                        // restarted and our model of it is stale
                        let restarted = pdu.available_index < liveness.available_index;
                        liveness.deadline = deadline;
                        liveness.available_index = pdu.available_index;
                        if restarted {
                            tracing::info!(
                                target: "avdecc::controller_state_machine",
                                entity = %pdu.entity_id,
                                "available index regressed, entity restarted"
                            );
                            Some(DiscoveryAction::Restarted {
                                entity_id: pdu.entity_id,
                                mac: src_mac,
                            })
                        } else {
                            Some(DiscoveryAction::Refreshed {
                                entity_id: pdu.entity_id,
                            })
                        }
                    }
                }
            }
            AdpMessageType::EntityDeparting => {
                self.entities.remove(&pdu.entity_id)?;
                tracing::debug!(
                    target: "avdecc::controller_state_machine",
                    entity = %pdu.entity_id,
                    "entity departing"
                );
                Some(DiscoveryAction::Departed {
                    entity_id: pdu.entity_id,
                })
            }
            AdpMessageType::EntityDiscover => None,
        }
    }

    /// Drop an entity without emitting an action (controller-driven purge)
    pub(crate) fn forget(&mut self, entity_id: UniqueIdentifier) {
        self.entities.remove(&entity_id);
    }

    /// Entities whose liveness expired; they are removed from tracking
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<DiscoveryAction> {
        let expired: Vec<UniqueIdentifier> = self
            .entities
            .iter()
            .filter(|(_, liveness)| liveness.deadline <= now)
            .map(|(&id, _)| id)
            .collect();
        expired
            .into_iter()
            .map(|entity_id| {
                self.entities.remove(&entity_id);
                tracing::debug!(
                    target: "avdecc::controller_state_machine",
                    entity = %entity_id,
                    "entity liveness expired"
                );
                DiscoveryAction::Departed { entity_id }
            })
            .collect()
    }

    /// Whether an ENTITY_DISCOVER should go out now; arms the next tick
    pub(crate) fn poll_discover(&mut self, now: Instant) -> bool {
        if now >= self.next_discover {
            self.next_discover = now + self.discover_interval;
            true
        } else {
            false
        }
    }

    /// Earliest instant anything needs attention
    pub(crate) fn next_deadline(&self) -> Instant {
        self.entities
            .values()
            .map(|liveness| liveness.deadline)
            .min()
            .map_or(self.next_discover, |deadline| {
                deadline.min(self.next_discover)
            })
    }

    /// Number of currently-live tracked entities
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entities.len()
    }
}

/// Local-entity advertising state machine
#[derive(Debug)]
pub(crate) struct AdvertiseState {
    entity_id: UniqueIdentifier,
    entity_model_id: UniqueIdentifier,
    valid_time: u8,
    enabled: bool,
    available_index: u32,
    next_advertise: Instant,
}

impl AdvertiseState {
    pub(crate) fn new(
        entity_id: UniqueIdentifier,
        entity_model_id: UniqueIdentifier,
        valid_time: u8,
        now: Instant,
    ) -> Self {
        Self {
            entity_id,
            entity_model_id,
            valid_time: valid_time.clamp(1, 62),
            enabled: false,
            available_index: rand::random(),
            next_advertise: now,
        }
    }

    pub(crate) fn enable(&mut self, now: Instant) {
        self.enabled = true;
        self.next_advertise = now;
    }

    pub(crate) fn disable(&mut self) {
        self.enabled = false;
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The PDU to broadcast if an advertisement is due (or forced by a
    /// received ENTITY_DISCOVER)
    pub(crate) fn poll_advertise(&mut self, now: Instant, force: bool) -> Option<Adpdu> {
        if !self.enabled || (!force && now < self.next_advertise) {
            return None;
        }
        // re-advertise at half the validity window
        self.next_advertise = now + Duration::from_secs(u64::from(self.valid_time));
        self.available_index = self.available_index.wrapping_add(1);
        Some(self.build_pdu(AdpMessageType::EntityAvailable))
    }

    /// The ENTITY_DEPARTING PDU sent when advertising stops
    pub(crate) fn departing(&self) -> Adpdu {
        self.build_pdu(AdpMessageType::EntityDeparting)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.enabled.then_some(self.next_advertise)
    }

    fn build_pdu(&self, message_type: AdpMessageType) -> Adpdu {
        Adpdu {
            message_type,
            valid_time: self.valid_time,
            entity_id: self.entity_id,
            entity_model_id: self.entity_model_id,
            controller_capabilities: 0x0000_0001, // IMPLEMENTED
            available_index: self.available_index,
            ..Adpdu::discover()
        }
    }
}
