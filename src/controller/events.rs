//! Event bus delivering entity lifecycle and state-change notifications

use crate::model::{AcquireState, DescriptorType};
use crate::types::{
    AvdeccFixedString, ClockDomainIndex, ClockSourceIndex, ConfigurationIndex, DescriptorIndex,
    MemoryObjectIndex, SamplingRate, StreamFormat, StreamIdentification, StreamIndex,
    StreamPortIndex, UniqueIdentifier,
};
use tokio::sync::broadcast;

/// Which side of a stream port a mapping change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    /// Stream port input
    Input,
    /// Stream port output
    Output,
}

/// Notifications delivered to observers.
///
/// Events for a given entity are sequenced in the order the underlying
/// cache mutations were applied; no ordering holds across entities.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// An entity finished enumeration and is available to the API
    EntityOnline {
        /// The entity
        entity_id: UniqueIdentifier,
    },
    /// An entity departed, expired, or was purged
    EntityOffline {
        /// The entity
        entity_id: UniqueIdentifier,
    },
    /// Entity name changed
    EntityNameChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// New name
        name: AvdeccFixedString,
    },
    /// Entity group name changed
    EntityGroupNameChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// New name
        name: AvdeccFixedString,
    },
    /// A descriptor object name changed
    ObjectNameChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// Descriptor type
        descriptor_type: DescriptorType,
        /// Descriptor index
        descriptor_index: DescriptorIndex,
        /// New name
        name: AvdeccFixedString,
    },
    /// Active configuration changed
    ConfigurationChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// New active configuration
        configuration_index: ConfigurationIndex,
    },
    /// A stream input format changed
    StreamInputFormatChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// Stream index
        stream_index: StreamIndex,
        /// New format
        format: StreamFormat,
    },
    /// A stream output format changed
    StreamOutputFormatChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// Stream index
        stream_index: StreamIndex,
        /// New format
        format: StreamFormat,
    },
    /// A stream input started or stopped
    StreamInputRunningChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// Stream index
        stream_index: StreamIndex,
        /// Whether the stream is now running
        running: bool,
    },
    /// A stream output started or stopped
    StreamOutputRunningChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// Stream index
        stream_index: StreamIndex,
        /// Whether the stream is now running
        running: bool,
    },
    /// An audio unit sampling rate changed
    SamplingRateChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// Audio unit index
        audio_unit_index: DescriptorIndex,
        /// New sampling rate
        sampling_rate: SamplingRate,
    },
    /// A clock domain selected a different clock source
    ClockSourceChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// Clock domain index
        clock_domain_index: ClockDomainIndex,
        /// Selected clock source index
        clock_source_index: ClockSourceIndex,
    },
    /// A memory object length changed
    MemoryObjectLengthChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// Memory object index
        memory_object_index: MemoryObjectIndex,
        /// New length
        length: u64,
    },
    /// Audio mappings were added to or removed from a stream port
    AudioMappingsChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// Port direction
        direction: PortDirection,
        /// Stream port index
        stream_port_index: StreamPortIndex,
    },
    /// A listener stream's connection state changed
    StreamConnectionChanged {
        /// The listener stream
        listener: StreamIdentification,
        /// Connected talker, `None` when disconnected
        talker: Option<StreamIdentification>,
    },
    /// The acquire state of an entity changed
    AcquireStateChanged {
        /// The entity
        entity_id: UniqueIdentifier,
        /// New acquire state
        state: AcquireState,
        /// Owning controller (null unless acquired)
        owner: UniqueIdentifier,
    },
}

/// Broadcast bus distributing [`ControllerEvent`]s.
///
/// Dispatch happens on the controller event loop, never under the cache
/// lock. Subscribers that lag simply miss events; they cannot slow down
/// or break the controller.
pub struct EventBus {
    tx: broadcast::Sender<ControllerEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events. Takes effect from the next emitted event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers
    pub fn emit(&self, event: ControllerEvent) {
        // no receivers is fine
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
