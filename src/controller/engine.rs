//! The controller event loop.
//!
//! A single task owns the command pipeline, the discovery state and all
//! cache mutation. Facade calls and enumeration tasks post [`Op`]s through
//! an unbounded channel and await oneshot completions; received frames and
//! timer deadlines are multiplexed in the same `select!` loop, so no lock
//! is ever held across an await and observer events are emitted strictly
//! after the mutation they describe.

use super::events::{ControllerEvent, EventBus, PortDirection};
use crate::discovery::{AdvertiseState, DiscoveryAction, DiscoveryState};
use crate::entity::{ControlledEntity, EntityCache};
use crate::enumeration;
use crate::error::{AcmpError, AemError, ControllerError};
use crate::model::{AcquireState, DescriptorType, EntityTree};
use crate::net::ProtocolInterface;
use crate::pipeline::{AcmpReply, AecpReply, AecpResponse, CommandPipeline};
use crate::protocol::{
    self, AcmpMessageType, Acmpdu, AdpMessageType, AecpMessageType, AemCommandType, Pdu,
};
use crate::types::{
    AudioMapping, AvdeccFixedString, ClockDomainIndex, ClockSourceIndex, ConfigurationIndex,
    ControllerConfig, DescriptorIndex, MacAddress, MemoryObjectIndex, SamplingRate, StreamFormat,
    StreamIdentification, StreamIndex, StreamPortIndex, UniqueIdentifier,
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// A confirmed state change to fold into the cache
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    EntityName(AvdeccFixedString),
    GroupName(AvdeccFixedString),
    ObjectName {
        descriptor_type: DescriptorType,
        descriptor_index: DescriptorIndex,
        name: AvdeccFixedString,
    },
    Configuration(ConfigurationIndex),
    StreamInputFormat {
        stream_index: StreamIndex,
        format: StreamFormat,
    },
    StreamOutputFormat {
        stream_index: StreamIndex,
        format: StreamFormat,
    },
    StreamInputRunning {
        stream_index: StreamIndex,
        running: bool,
    },
    StreamOutputRunning {
        stream_index: StreamIndex,
        running: bool,
    },
    SamplingRate {
        audio_unit_index: DescriptorIndex,
        sampling_rate: SamplingRate,
    },
    ClockSource {
        clock_domain_index: ClockDomainIndex,
        clock_source_index: ClockSourceIndex,
    },
    MemoryObjectLength {
        memory_object_index: MemoryObjectIndex,
        length: u64,
    },
    MappingsAdded {
        direction: PortDirection,
        stream_port_index: StreamPortIndex,
        mappings: Vec<AudioMapping>,
    },
    MappingsRemoved {
        direction: PortDirection,
        stream_port_index: StreamPortIndex,
        mappings: Vec<AudioMapping>,
    },
    Acquire {
        state: AcquireState,
        owner: UniqueIdentifier,
    },
    StreamConnection {
        listener_stream_index: StreamIndex,
        talker: Option<StreamIdentification>,
    },
}

/// Work items posted to the event loop
pub(crate) enum Op {
    Aecp {
        target: UniqueIdentifier,
        command_type: AemCommandType,
        payload: Bytes,
        reply: AecpReply,
    },
    Acmp {
        message_type: AcmpMessageType,
        talker: StreamIdentification,
        listener: StreamIdentification,
        reply: AcmpReply,
    },
    Apply {
        entity_id: UniqueIdentifier,
        mutation: Mutation,
        reply: oneshot::Sender<bool>,
    },
    EnumerationComplete {
        entity_id: UniqueIdentifier,
        tree: Box<EntityTree>,
        failed: bool,
    },
    ImportTree {
        tree: Box<EntityTree>,
        reply: oneshot::Sender<Result<UniqueIdentifier, crate::model::json::DeserializationError>>,
    },
    SendDiscover,
    EnableAdvertising {
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    DisableAdvertising {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle used by facade methods and enumeration tasks to issue
/// commands through the event loop
#[derive(Clone)]
pub(crate) struct CommandHandle {
    ops: mpsc::UnboundedSender<Op>,
}

impl CommandHandle {
    pub(crate) fn new(ops: mpsc::UnboundedSender<Op>) -> Self {
        Self { ops }
    }

    pub(crate) fn post(&self, op: Op) -> bool {
        self.ops.send(op).is_ok()
    }

    /// Issue an AECP command and await its completion
    pub(crate) async fn aecp(
        &self,
        target: UniqueIdentifier,
        command_type: AemCommandType,
        payload: Bytes,
    ) -> Result<AecpResponse, AemError> {
        let (reply, response) = oneshot::channel();
        if self
            .ops
            .send(Op::Aecp {
                target,
                command_type,
                payload,
                reply,
            })
            .is_err()
        {
            return Err(AemError::Aborted);
        }
        response.await.map_err(|_| AemError::Aborted)?
    }

    /// Issue an ACMP command and await its completion
    pub(crate) async fn acmp(
        &self,
        message_type: AcmpMessageType,
        talker: StreamIdentification,
        listener: StreamIdentification,
    ) -> Result<Acmpdu, AcmpError> {
        let (reply, response) = oneshot::channel();
        if self
            .ops
            .send(Op::Acmp {
                message_type,
                talker,
                listener,
                reply,
            })
            .is_err()
        {
            return Err(AcmpError::Aborted);
        }
        response.await.map_err(|_| AcmpError::Aborted)?
    }

    /// Apply a confirmed mutation; `false` if the entity disappeared
    pub(crate) async fn apply(&self, entity_id: UniqueIdentifier, mutation: Mutation) -> bool {
        let (reply, applied) = oneshot::channel();
        if self
            .ops
            .send(Op::Apply {
                entity_id,
                mutation,
                reply,
            })
            .is_err()
        {
            return false;
        }
        applied.await.unwrap_or(false)
    }
}

pub(crate) struct Engine {
    interface: Box<dyn ProtocolInterface>,
    frames: mpsc::Receiver<Bytes>,
    ops: mpsc::UnboundedReceiver<Op>,
    handle: CommandHandle,
    cache: Arc<EntityCache>,
    bus: Arc<EventBus>,
    pipeline: CommandPipeline,
    discovery: DiscoveryState,
    advertise: AdvertiseState,
    config: ControllerConfig,
    controller_id: UniqueIdentifier,
    local_mac: MacAddress,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        mut interface: Box<dyn ProtocolInterface>,
        ops: mpsc::UnboundedReceiver<Op>,
        handle: CommandHandle,
        cache: Arc<EntityCache>,
        bus: Arc<EventBus>,
        controller_id: UniqueIdentifier,
        entity_model_id: UniqueIdentifier,
        config: ControllerConfig,
    ) -> Self {
        let now = Instant::now();
        let local_mac = interface.local_mac();
        let frames = interface
            .take_receiver()
            .expect("protocol interface receiver already taken");
        Self {
            frames,
            ops,
            handle,
            cache,
            bus,
            pipeline: CommandPipeline::new(
                controller_id,
                local_mac,
                config.command_timeout,
                config.command_retries,
            ),
            discovery: DiscoveryState::new(config.discovery_interval, now),
            advertise: AdvertiseState::new(
                controller_id,
                entity_model_id,
                config.advertise_valid_time,
                now,
            ),
            config,
            controller_id,
            local_mac,
            interface,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(
            target: "avdecc::controller_state_machine",
            controller = %self.controller_id,
            "event loop started"
        );
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                maybe_op = self.ops.recv() => match maybe_op {
                    Some(Op::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(op) => self.handle_op(op).await,
                    // every Controller handle dropped
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                maybe_frame = self.frames.recv() => match maybe_frame {
                    Some(frame) => self.handle_frame(&frame).await,
                    None => {
                        tracing::warn!(
                            target: "avdecc::protocol_interface",
                            "capture channel closed, shutting down"
                        );
                        self.shutdown().await;
                        break;
                    }
                },
                () = tokio::time::sleep_until(deadline) => self.handle_timers().await,
            }
        }
        tracing::debug!(
            target: "avdecc::controller_state_machine",
            controller = %self.controller_id,
            "event loop stopped"
        );
    }

    fn next_deadline(&self) -> Instant {
        let mut deadline = self.discovery.next_deadline();
        if let Some(pipeline_deadline) = self.pipeline.next_deadline() {
            deadline = deadline.min(pipeline_deadline);
        }
        if let Some(advertise_deadline) = self.advertise.next_deadline() {
            deadline = deadline.min(advertise_deadline);
        }
        deadline
    }

    async fn handle_timers(&mut self) {
        let now = Instant::now();

        for frame in self.pipeline.expire(now) {
            self.interface.send(&frame).await;
        }

        for action in self.discovery.expire(now) {
            if let DiscoveryAction::Departed { entity_id } = action {
                self.remove_entity(entity_id);
            }
        }

        if self.discovery.poll_discover(now) {
            self.send_discover().await;
        }

        if let Some(pdu) = self.advertise.poll_advertise(now, false) {
            self.send_adpdu(&pdu).await;
        }
    }

    async fn handle_frame(&mut self, frame: &[u8]) {
        let Some(received) = protocol::parse_frame(frame) else {
            return;
        };
        let now = Instant::now();

        match received.pdu {
            Pdu::Adp(adpdu) => {
                if received.src_mac == self.local_mac {
                    return; // our own advertisement echoed back
                }
                if adpdu.message_type == AdpMessageType::EntityDiscover {
                    if let Some(pdu) = self.advertise.poll_advertise(now, true) {
                        self.send_adpdu(&pdu).await;
                    }
                    return;
                }
                let action = self.discovery.handle_adpdu(&adpdu, received.src_mac, now);
                match action {
                    Some(DiscoveryAction::Discovered { entity_id, mac }) => {
                        self.add_entity(entity_id, mac);
                    }
                    Some(DiscoveryAction::Restarted { entity_id, mac }) => {
                        // stale model: purge and start over
                        self.purge_entity(entity_id);
                        self.add_entity(entity_id, mac);
                    }
                    Some(DiscoveryAction::Refreshed { entity_id }) => {
                        if let Some(entity) = self.cache.get(entity_id) {
                            entity.update_tree(|tree| {
                                tree.identity.available_index = adpdu.available_index;
                            });
                        }
                    }
                    Some(DiscoveryAction::Departed { entity_id }) => {
                        self.remove_entity(entity_id);
                    }
                    None => {}
                }
            }
            Pdu::Aecp(aecpdu) => {
                if aecpdu.message_type == AecpMessageType::AemResponse {
                    if let Some(next) = self.pipeline.handle_aecp(&aecpdu, now) {
                        self.interface.send(&next).await;
                    }
                }
            }
            Pdu::Acmp(acmpdu) => {
                self.pipeline.handle_acmp(&acmpdu);
            }
        }
    }

    async fn handle_op(&mut self, op: Op) {
        let now = Instant::now();
        match op {
            Op::Aecp {
                target,
                command_type,
                payload,
                reply,
            } => match self.cache.get(target) {
                None => {
                    let _ = reply.send(Err(AemError::UnknownEntity));
                }
                Some(entity) => {
                    if let Some(frame) = self.pipeline.submit_aecp(
                        target,
                        entity.mac_address(),
                        command_type,
                        payload,
                        reply,
                        now,
                    ) {
                        self.interface.send(&frame).await;
                    }
                }
            },
            Op::Acmp {
                message_type,
                talker,
                listener,
                reply,
            } => {
                let frame = self
                    .pipeline
                    .submit_acmp(message_type, talker, listener, reply, now);
                self.interface.send(&frame).await;
            }
            Op::Apply {
                entity_id,
                mutation,
                reply,
            } => {
                match self.cache.get(entity_id) {
                    None => {
                        let _ = reply.send(false);
                    }
                    Some(entity) => {
                        let event = apply_mutation(&entity, mutation);
                        // observers first, then the caller's completion
                        if entity.was_advertised() {
                            self.bus.emit(event);
                        }
                        let _ = reply.send(true);
                    }
                }
            }
            Op::EnumerationComplete {
                entity_id,
                tree,
                failed,
            } => {
                if let Some(entity) = self.cache.get(entity_id) {
                    entity.set_tree(*tree);
                    entity.set_enumeration_failed(failed);
                    entity.set_advertised(true);
                    if failed {
                        tracing::warn!(
                            target: "avdecc::controller_entity",
                            entity = %entity_id,
                            "enumeration incomplete, advertising partial model"
                        );
                    }
                    self.bus.emit(ControllerEvent::EntityOnline { entity_id });
                }
            }
            Op::ImportTree { tree, reply } => {
                let entity_id = tree.identity.entity_id;
                if self.cache.contains(entity_id) {
                    let _ = reply.send(Err(
                        crate::model::json::DeserializationError::DuplicateEntityId,
                    ));
                } else {
                    let entity = Arc::new(ControlledEntity::new(entity_id, MacAddress::default()));
                    entity.set_tree(*tree);
                    entity.set_advertised(true);
                    self.cache.insert(entity);
                    self.bus.emit(ControllerEvent::EntityOnline { entity_id });
                    let _ = reply.send(Ok(entity_id));
                }
            }
            Op::SendDiscover => self.send_discover().await,
            Op::EnableAdvertising { reply } => {
                if self.cache.contains(self.controller_id) {
                    let _ = reply.send(Err(ControllerError::DuplicateProgId {
                        entity_id: self.controller_id,
                    }));
                } else {
                    self.advertise.enable(now);
                    if let Some(pdu) = self.advertise.poll_advertise(now, true) {
                        self.send_adpdu(&pdu).await;
                    }
                    let _ = reply.send(Ok(()));
                }
            }
            Op::DisableAdvertising { reply } => {
                if self.advertise.is_enabled() {
                    let pdu = self.advertise.departing();
                    self.send_adpdu(&pdu).await;
                    self.advertise.disable();
                }
                let _ = reply.send(());
            }
            Op::Shutdown { .. } => unreachable!("handled in run()"),
        }
    }

    fn add_entity(&mut self, entity_id: UniqueIdentifier, mac: MacAddress) {
        let entity = Arc::new(ControlledEntity::new(entity_id, mac));
        if !self.cache.insert(entity) {
            return;
        }
        let handle = self.handle.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            let outcome = enumeration::enumerate(&handle, entity_id, &config).await;
            let _ = handle.post(Op::EnumerationComplete {
                entity_id,
                tree: Box::new(outcome.tree),
                failed: outcome.failed,
            });
        });
    }

    /// Remove an entity from the cache, failing its commands and telling
    /// observers (liveness tracking untouched; used for restarts)
    fn purge_entity(&mut self, entity_id: UniqueIdentifier) {
        if let Some(entity) = self.cache.remove(entity_id) {
            self.pipeline.fail_entity(entity_id);
            if entity.was_advertised() {
                self.bus.emit(ControllerEvent::EntityOffline { entity_id });
            }
        }
    }

    /// Full removal: purge plus liveness forget
    fn remove_entity(&mut self, entity_id: UniqueIdentifier) {
        self.discovery.forget(entity_id);
        self.purge_entity(entity_id);
    }

    async fn send_discover(&mut self) {
        let frame = protocol::ethernet_frame(
            MacAddress::IDENTIFICATION_MULTICAST,
            self.local_mac,
            &protocol::Adpdu::discover().encode(),
        );
        self.interface.send(&frame).await;
    }

    async fn send_adpdu(&mut self, pdu: &protocol::Adpdu) {
        let frame = protocol::ethernet_frame(
            MacAddress::IDENTIFICATION_MULTICAST,
            self.local_mac,
            &pdu.encode(),
        );
        self.interface.send(&frame).await;
    }

    /// Ordered shutdown: stop advertising, release what we hold, cancel
    /// pending commands, drain observers, close the interface.
    async fn shutdown(&mut self) {
        if self.advertise.is_enabled() {
            let pdu = self.advertise.departing();
            self.send_adpdu(&pdu).await;
            self.advertise.disable();
        }

        // Best-effort release of entities we still hold acquired; the
        // completions are dropped on abort below.
        let now = Instant::now();
        for entity in self.cache.entities() {
            if entity.is_acquired() {
                let (reply, _dropped) = oneshot::channel();
                if let Some(frame) = self.pipeline.submit_aecp(
                    entity.entity_id(),
                    entity.mac_address(),
                    AemCommandType::AcquireEntity,
                    protocol::aem::acquire_entity(
                        protocol::aem::ACQUIRE_FLAG_RELEASE,
                        DescriptorType::Entity as u16,
                        0,
                    ),
                    reply,
                    now,
                ) {
                    self.interface.send(&frame).await;
                }
            }
        }

        self.pipeline.abort_all();

        for entity in self.cache.drain() {
            if entity.was_advertised() {
                self.bus.emit(ControllerEvent::EntityOffline {
                    entity_id: entity.entity_id(),
                });
            }
        }

        self.interface.shutdown().await;
    }
}

/// Fold a confirmed mutation into the cached entity and build the
/// matching observer event
fn apply_mutation(entity: &ControlledEntity, mutation: Mutation) -> ControllerEvent {
    let entity_id = entity.entity_id();
    match mutation {
        Mutation::EntityName(name) => {
            entity.update_tree(|tree| tree.dynamic.entity_name = name);
            ControllerEvent::EntityNameChanged { entity_id, name }
        }
        Mutation::GroupName(name) => {
            entity.update_tree(|tree| tree.dynamic.group_name = name);
            ControllerEvent::EntityGroupNameChanged { entity_id, name }
        }
        Mutation::ObjectName {
            descriptor_type,
            descriptor_index,
            name,
        } => {
            entity.update_tree(|tree| {
                tree.dynamic
                    .names
                    .insert((descriptor_type, descriptor_index), name);
            });
            ControllerEvent::ObjectNameChanged {
                entity_id,
                descriptor_type,
                descriptor_index,
                name,
            }
        }
        Mutation::Configuration(configuration_index) => {
            entity.update_tree(|tree| tree.dynamic.current_configuration = configuration_index);
            ControllerEvent::ConfigurationChanged {
                entity_id,
                configuration_index,
            }
        }
        Mutation::StreamInputFormat {
            stream_index,
            format,
        } => {
            entity.update_tree(|tree| {
                tree.dynamic.stream_input_formats.insert(stream_index, format);
            });
            ControllerEvent::StreamInputFormatChanged {
                entity_id,
                stream_index,
                format,
            }
        }
        Mutation::StreamOutputFormat {
            stream_index,
            format,
        } => {
            entity.update_tree(|tree| {
                tree.dynamic
                    .stream_output_formats
                    .insert(stream_index, format);
            });
            ControllerEvent::StreamOutputFormatChanged {
                entity_id,
                stream_index,
                format,
            }
        }
        Mutation::StreamInputRunning {
            stream_index,
            running,
        } => {
            entity.update_tree(|tree| {
                tree.dynamic.stream_input_running.insert(stream_index, running);
            });
            ControllerEvent::StreamInputRunningChanged {
                entity_id,
                stream_index,
                running,
            }
        }
        Mutation::StreamOutputRunning {
            stream_index,
            running,
        } => {
            entity.update_tree(|tree| {
                tree.dynamic
                    .stream_output_running
                    .insert(stream_index, running);
            });
            ControllerEvent::StreamOutputRunningChanged {
                entity_id,
                stream_index,
                running,
            }
        }
        Mutation::SamplingRate {
            audio_unit_index,
            sampling_rate,
        } => {
            entity.update_tree(|tree| {
                tree.dynamic
                    .sampling_rates
                    .insert(audio_unit_index, sampling_rate);
            });
            ControllerEvent::SamplingRateChanged {
                entity_id,
                audio_unit_index,
                sampling_rate,
            }
        }
        Mutation::ClockSource {
            clock_domain_index,
            clock_source_index,
        } => {
            entity.update_tree(|tree| {
                tree.dynamic
                    .clock_sources
                    .insert(clock_domain_index, clock_source_index);
            });
            ControllerEvent::ClockSourceChanged {
                entity_id,
                clock_domain_index,
                clock_source_index,
            }
        }
        Mutation::MemoryObjectLength {
            memory_object_index,
            length,
        } => {
            entity.update_tree(|tree| {
                tree.dynamic
                    .memory_object_lengths
                    .insert(memory_object_index, length);
            });
            ControllerEvent::MemoryObjectLengthChanged {
                entity_id,
                memory_object_index,
                length,
            }
        }
        Mutation::MappingsAdded {
            direction,
            stream_port_index,
            mappings,
        } => {
            entity.update_tree(|tree| {
                let map = match direction {
                    PortDirection::Input => &mut tree.dynamic.stream_port_input_mappings,
                    PortDirection::Output => &mut tree.dynamic.stream_port_output_mappings,
                };
                let slot = map.entry(stream_port_index).or_default();
                for mapping in mappings {
                    if !slot.contains(&mapping) {
                        slot.push(mapping);
                    }
                }
            });
            ControllerEvent::AudioMappingsChanged {
                entity_id,
                direction,
                stream_port_index,
            }
        }
        Mutation::MappingsRemoved {
            direction,
            stream_port_index,
            mappings,
        } => {
            entity.update_tree(|tree| {
                let map = match direction {
                    PortDirection::Input => &mut tree.dynamic.stream_port_input_mappings,
                    PortDirection::Output => &mut tree.dynamic.stream_port_output_mappings,
                };
                if let Some(slot) = map.get_mut(&stream_port_index) {
                    slot.retain(|mapping| !mappings.contains(mapping));
                }
            });
            ControllerEvent::AudioMappingsChanged {
                entity_id,
                direction,
                stream_port_index,
            }
        }
        Mutation::Acquire { state, owner } => {
            entity.set_acquire_state(state, owner);
            ControllerEvent::AcquireStateChanged {
                entity_id,
                state,
                owner,
            }
        }
        Mutation::StreamConnection {
            listener_stream_index,
            talker,
        } => {
            entity.update_tree(|tree| {
                tree.dynamic.stream_input_connections.insert(
                    listener_stream_index,
                    crate::model::StreamConnectionState { talker },
                );
            });
            ControllerEvent::StreamConnectionChanged {
                listener: StreamIdentification {
                    entity_id,
                    stream_index: listener_stream_index,
                },
                talker,
            }
        }
    }
}
