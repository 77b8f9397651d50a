//! The controller facade: public control operations over discovered
//! entities, observer subscription, and ordered shutdown.

pub(crate) mod engine;
mod events;
#[cfg(test)]
mod tests;

pub use events::{ControllerEvent, EventBus, PortDirection};

use crate::entity::{ControlledEntityGuard, EntityCache};
use crate::error::{AcmpError, AemError, ControllerError};
use crate::model::json::{self, DeserializationError, SerializationError};
use crate::model::{AcquireState, DescriptorType};
use crate::net::{self, InterfaceKind, ProtocolInterface};
use crate::pipeline::AecpResponse;
use crate::protocol::{aem, AcmpMessageType, Acmpdu, AemCommandType, AemStatusCode};
use crate::types::{
    AudioMapping, AvdeccFixedString, ClockDomainIndex, ClockSourceIndex, ConfigurationIndex,
    ControllerConfig, DescriptorIndex, MemoryObjectIndex, SamplingRate, StreamFormat,
    StreamIdentification, StreamIndex, StreamPortIndex, UniqueIdentifier,
};
use engine::{CommandHandle, Engine, Mutation, Op};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Connection state of one listener stream, as reported by GET_RX_STATE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerStreamState {
    /// Connected talker, `None` when not connected
    pub talker: Option<StreamIdentification>,
    /// Raw connection count from the response
    pub connection_count: u16,
    /// Connection flags
    pub flags: u16,
}

struct ControllerInner {
    handle: CommandHandle,
    cache: Arc<EntityCache>,
    bus: Arc<EventBus>,
    controller_id: UniqueIdentifier,
    config: ControllerConfig,
    shut_down: AtomicBool,
}

/// An AVDECC controller bound to one network interface.
///
/// Dropping the last clone shuts the event loop down; prefer calling
/// [`Controller::shutdown`] for an ordered stop that notifies observers.
///
/// # Example
///
/// ```rust,no_run
/// use avdecc::{Controller, ControllerConfig, InterfaceKind, UniqueIdentifier};
///
/// # async fn example() -> Result<(), avdecc::ControllerError> {
/// let controller = Controller::new(
///     InterfaceKind::Auto,
///     "eth0",
///     0x0001,
///     UniqueIdentifier::new(0x001B_2100_0000_0001),
///     ControllerConfig::default(),
/// )?;
///
/// let mut events = controller.subscribe();
/// while let Ok(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    /// Open a network interface and start the controller event loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// See [`ControllerError`] for the construction error taxonomy.
    pub fn new(
        kind: InterfaceKind,
        interface_name: &str,
        prog_id: u16,
        entity_model_id: UniqueIdentifier,
        config: ControllerConfig,
    ) -> Result<Self, ControllerError> {
        let interface = net::open(kind, interface_name)?;
        Ok(Self::with_interface(
            interface,
            prog_id,
            entity_model_id,
            config,
        ))
    }

    /// Start a controller on an already-open protocol interface.
    ///
    /// This is the seam used for custom capture backends and for the
    /// virtual interface in tests.
    #[must_use]
    pub fn with_interface(
        interface: Box<dyn ProtocolInterface>,
        prog_id: u16,
        entity_model_id: UniqueIdentifier,
        config: ControllerConfig,
    ) -> Self {
        let controller_id = UniqueIdentifier::from_prog_id(interface.local_mac(), prog_id);
        let cache = Arc::new(EntityCache::new());
        let bus = Arc::new(EventBus::new(config.event_capacity));
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let handle = CommandHandle::new(ops_tx);

        let engine = Engine::new(
            interface,
            ops_rx,
            handle.clone(),
            cache.clone(),
            bus.clone(),
            controller_id,
            entity_model_id,
            config.clone(),
        );
        tokio::spawn(engine.run());

        tracing::info!(
            target: "avdecc::controller_entity",
            controller = %controller_id,
            "controller started"
        );

        Self {
            inner: Arc::new(ControllerInner {
                handle,
                cache,
                bus,
                controller_id,
                config,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// This controller's entity id
    #[must_use]
    pub fn controller_id(&self) -> UniqueIdentifier {
        self.inner.controller_id
    }

    /// Subscribe to controller events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.bus.subscribe()
    }

    /// Read-only handle to an entity, if it is known and was advertised
    #[must_use]
    pub fn entity(&self, entity_id: UniqueIdentifier) -> Option<ControlledEntityGuard> {
        let entity = self.inner.cache.get(entity_id)?;
        entity
            .was_advertised()
            .then(|| ControlledEntityGuard::new(entity))
    }

    /// Read-only handles to every advertised entity
    #[must_use]
    pub fn entities(&self) -> Vec<ControlledEntityGuard> {
        self.inner
            .cache
            .entities()
            .into_iter()
            .filter(|entity| entity.was_advertised())
            .map(ControlledEntityGuard::new)
            .collect()
    }

    /// Start advertising the controller entity over ADP.
    ///
    /// Runs a short discovery probe first and refuses with
    /// `DuplicateProgId` when the derived entity id is already live on
    /// the segment.
    ///
    /// # Errors
    ///
    /// `DuplicateProgId`, or `InternalError` if the event loop is gone.
    pub async fn enable_advertising(&self) -> Result<(), ControllerError> {
        if !self.inner.handle.post(Op::SendDiscover) {
            return Err(ControllerError::InternalError {
                message: "controller is shut down".to_string(),
            });
        }
        tokio::time::sleep(self.inner.config.probe_duration).await;

        let (reply, result) = oneshot::channel();
        if !self.inner.handle.post(Op::EnableAdvertising { reply }) {
            return Err(ControllerError::InternalError {
                message: "controller is shut down".to_string(),
            });
        }
        result.await.map_err(|_| ControllerError::InternalError {
            message: "controller is shut down".to_string(),
        })?
    }

    /// Stop advertising; sends a final ENTITY_DEPARTING
    pub async fn disable_advertising(&self) {
        let (reply, done) = oneshot::channel();
        if self.inner.handle.post(Op::DisableAdvertising { reply }) {
            let _ = done.await;
        }
    }

    /// Ordered shutdown: cancels pending commands with `Aborted`, emits
    /// `EntityOffline` for every advertised entity, then closes the
    /// protocol interface. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let (reply, done) = oneshot::channel();
        if self.inner.handle.post(Op::Shutdown { reply }) {
            let _ = done.await;
        }
    }

    /// Serialize an entity's model to a JSON dump
    ///
    /// # Errors
    ///
    /// `UnknownEntity` if the entity is not cached, or a serialization
    /// failure.
    pub fn dump_entity_model(
        &self,
        entity_id: UniqueIdentifier,
        flags: json::Flags,
    ) -> Result<serde_json::Value, SerializationError> {
        let entity = self
            .inner
            .cache
            .get(entity_id)
            .ok_or(SerializationError::UnknownEntity)?;
        json::create_json_object(&entity.tree(), flags)
    }

    /// Load a previously-dumped entity model as a virtual entity
    ///
    /// # Errors
    ///
    /// Any [`DeserializationError`], including `DuplicateEntityId` when
    /// an entity with the same id is already cached.
    pub async fn import_entity_model(
        &self,
        object: &serde_json::Value,
        flags: json::Flags,
    ) -> Result<UniqueIdentifier, DeserializationError> {
        let tree = json::create_entity_tree(object, flags)?;
        let (reply, result) = oneshot::channel();
        if !self.inner.handle.post(Op::ImportTree {
            tree: Box::new(tree),
            reply,
        }) {
            return Err(DeserializationError::InternalError);
        }
        result.await.map_err(|_| DeserializationError::InternalError)?
    }

    // ===== AECP operations =====

    /// Acquire exclusive control of an entity.
    ///
    /// Returns the owning controller id on success. When the entity is
    /// already acquired (or being acquired) by us, this is a no-op
    /// returning the current owner.
    ///
    /// # Errors
    ///
    /// `AcquiredByOther` carries the competing controller's id; other
    /// variants per [`AemError`].
    pub async fn acquire_entity(
        &self,
        entity_id: UniqueIdentifier,
        persistent: bool,
    ) -> Result<UniqueIdentifier, AemError> {
        let entity = self.inner.cache.get(entity_id).ok_or(AemError::UnknownEntity)?;
        if entity.is_acquired() || entity.is_acquiring() {
            return Ok(entity.owning_controller());
        }

        self.apply(
            entity_id,
            Mutation::Acquire {
                state: AcquireState::TryAcquire,
                owner: UniqueIdentifier::NULL,
            },
        )
        .await;

        let mut flags = 0;
        if persistent {
            flags |= aem::ACQUIRE_FLAG_PERSISTENT;
        }
        let outcome = self
            .aecp(
                entity_id,
                AemCommandType::AcquireEntity,
                aem::acquire_entity(flags, DescriptorType::Entity as u16, 0),
            )
            .await;

        match outcome {
            Ok(response) => {
                let owner = aem::decode_acquire_response(&response.payload)
                    .unwrap_or(UniqueIdentifier::NULL);
                match response.status {
                    AemStatusCode::SUCCESS => {
                        let owner = if owner.is_null() {
                            self.inner.controller_id
                        } else {
                            owner
                        };
                        self.apply(
                            entity_id,
                            Mutation::Acquire {
                                state: AcquireState::Acquired,
                                owner,
                            },
                        )
                        .await;
                        Ok(owner)
                    }
                    AemStatusCode::ENTITY_ACQUIRED => {
                        self.apply(
                            entity_id,
                            Mutation::Acquire {
                                state: AcquireState::AcquiredByOther,
                                owner,
                            },
                        )
                        .await;
                        Err(AemError::AcquiredByOther { owner })
                    }
                    AemStatusCode::NOT_IMPLEMENTED | AemStatusCode::NOT_SUPPORTED => {
                        self.apply(
                            entity_id,
                            Mutation::Acquire {
                                state: AcquireState::NotAcquired,
                                owner: UniqueIdentifier::NULL,
                            },
                        )
                        .await;
                        Err(response.status.to_error().unwrap_or(AemError::InternalError))
                    }
                    _ => {
                        self.apply(
                            entity_id,
                            Mutation::Acquire {
                                state: AcquireState::Undefined,
                                owner: UniqueIdentifier::NULL,
                            },
                        )
                        .await;
                        Err(response.status.to_error().unwrap_or(AemError::InternalError))
                    }
                }
            }
            Err(err) => {
                self.apply(
                    entity_id,
                    Mutation::Acquire {
                        state: AcquireState::Undefined,
                        owner: UniqueIdentifier::NULL,
                    },
                )
                .await;
                Err(err)
            }
        }
    }

    /// Release an acquired entity
    ///
    /// # Errors
    ///
    /// Per [`AemError`]; the cached acquire state only changes on success.
    pub async fn release_entity(&self, entity_id: UniqueIdentifier) -> Result<(), AemError> {
        self.reject_unknown(entity_id)?;
        let response = self
            .aecp(
                entity_id,
                AemCommandType::AcquireEntity,
                aem::acquire_entity(aem::ACQUIRE_FLAG_RELEASE, DescriptorType::Entity as u16, 0),
            )
            .await?;
        response.check()?;
        self.apply(
            entity_id,
            Mutation::Acquire {
                state: AcquireState::NotAcquired,
                owner: UniqueIdentifier::NULL,
            },
        )
        .await;
        Ok(())
    }

    /// Select the active configuration
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_configuration(
        &self,
        entity_id: UniqueIdentifier,
        configuration_index: ConfigurationIndex,
    ) -> Result<(), AemError> {
        self.reject_unknown(entity_id)?;
        let response = self
            .aecp(
                entity_id,
                AemCommandType::SetConfiguration,
                aem::set_configuration(configuration_index),
            )
            .await?;
        response.check()?;
        self.apply(entity_id, Mutation::Configuration(configuration_index))
            .await;
        Ok(())
    }

    /// Set a stream input's format
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_stream_input_format(
        &self,
        entity_id: UniqueIdentifier,
        stream_index: StreamIndex,
        format: StreamFormat,
    ) -> Result<(), AemError> {
        self.reject_unknown(entity_id)?;
        let response = self
            .aecp(
                entity_id,
                AemCommandType::SetStreamFormat,
                aem::stream_format(DescriptorType::StreamInput as u16, stream_index, format),
            )
            .await?;
        response.check()?;
        self.apply(
            entity_id,
            Mutation::StreamInputFormat {
                stream_index,
                format,
            },
        )
        .await;
        Ok(())
    }

    /// Set a stream output's format
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_stream_output_format(
        &self,
        entity_id: UniqueIdentifier,
        stream_index: StreamIndex,
        format: StreamFormat,
    ) -> Result<(), AemError> {
        self.reject_unknown(entity_id)?;
        let response = self
            .aecp(
                entity_id,
                AemCommandType::SetStreamFormat,
                aem::stream_format(DescriptorType::StreamOutput as u16, stream_index, format),
            )
            .await?;
        response.check()?;
        self.apply(
            entity_id,
            Mutation::StreamOutputFormat {
                stream_index,
                format,
            },
        )
        .await;
        Ok(())
    }

    /// Set the entity name
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_entity_name(
        &self,
        entity_id: UniqueIdentifier,
        name: &str,
    ) -> Result<(), AemError> {
        let name = AvdeccFixedString::new(name);
        self.set_name(entity_id, DescriptorType::Entity, 0, 0, 0, name)
            .await?;
        self.apply(entity_id, Mutation::EntityName(name)).await;
        Ok(())
    }

    /// Set the entity group name
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_entity_group_name(
        &self,
        entity_id: UniqueIdentifier,
        name: &str,
    ) -> Result<(), AemError> {
        let name = AvdeccFixedString::new(name);
        self.set_name(entity_id, DescriptorType::Entity, 0, 1, 0, name)
            .await?;
        self.apply(entity_id, Mutation::GroupName(name)).await;
        Ok(())
    }

    /// Set a configuration's object name
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_configuration_name(
        &self,
        entity_id: UniqueIdentifier,
        configuration_index: ConfigurationIndex,
        name: &str,
    ) -> Result<(), AemError> {
        self.set_object_name(
            entity_id,
            DescriptorType::Configuration,
            configuration_index,
            configuration_index,
            name,
        )
        .await
    }

    /// Set an audio unit's object name
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_audio_unit_name(
        &self,
        entity_id: UniqueIdentifier,
        configuration_index: ConfigurationIndex,
        audio_unit_index: DescriptorIndex,
        name: &str,
    ) -> Result<(), AemError> {
        self.set_object_name(
            entity_id,
            DescriptorType::AudioUnit,
            configuration_index,
            audio_unit_index,
            name,
        )
        .await
    }

    /// Set a stream input's object name
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_stream_input_name(
        &self,
        entity_id: UniqueIdentifier,
        configuration_index: ConfigurationIndex,
        stream_index: StreamIndex,
        name: &str,
    ) -> Result<(), AemError> {
        self.set_object_name(
            entity_id,
            DescriptorType::StreamInput,
            configuration_index,
            stream_index,
            name,
        )
        .await
    }

    /// Set a stream output's object name
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_stream_output_name(
        &self,
        entity_id: UniqueIdentifier,
        configuration_index: ConfigurationIndex,
        stream_index: StreamIndex,
        name: &str,
    ) -> Result<(), AemError> {
        self.set_object_name(
            entity_id,
            DescriptorType::StreamOutput,
            configuration_index,
            stream_index,
            name,
        )
        .await
    }

    /// Set an AVB interface's object name
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_avb_interface_name(
        &self,
        entity_id: UniqueIdentifier,
        configuration_index: ConfigurationIndex,
        avb_interface_index: DescriptorIndex,
        name: &str,
    ) -> Result<(), AemError> {
        self.set_object_name(
            entity_id,
            DescriptorType::AvbInterface,
            configuration_index,
            avb_interface_index,
            name,
        )
        .await
    }

    /// Set a clock source's object name
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_clock_source_name(
        &self,
        entity_id: UniqueIdentifier,
        configuration_index: ConfigurationIndex,
        clock_source_index: ClockSourceIndex,
        name: &str,
    ) -> Result<(), AemError> {
        self.set_object_name(
            entity_id,
            DescriptorType::ClockSource,
            configuration_index,
            clock_source_index,
            name,
        )
        .await
    }

    /// Set a memory object's object name
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_memory_object_name(
        &self,
        entity_id: UniqueIdentifier,
        configuration_index: ConfigurationIndex,
        memory_object_index: MemoryObjectIndex,
        name: &str,
    ) -> Result<(), AemError> {
        self.set_object_name(
            entity_id,
            DescriptorType::MemoryObject,
            configuration_index,
            memory_object_index,
            name,
        )
        .await
    }

    /// Set an audio cluster's object name
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_audio_cluster_name(
        &self,
        entity_id: UniqueIdentifier,
        configuration_index: ConfigurationIndex,
        cluster_index: DescriptorIndex,
        name: &str,
    ) -> Result<(), AemError> {
        self.set_object_name(
            entity_id,
            DescriptorType::AudioCluster,
            configuration_index,
            cluster_index,
            name,
        )
        .await
    }

    /// Set a clock domain's object name
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_clock_domain_name(
        &self,
        entity_id: UniqueIdentifier,
        configuration_index: ConfigurationIndex,
        clock_domain_index: ClockDomainIndex,
        name: &str,
    ) -> Result<(), AemError> {
        self.set_object_name(
            entity_id,
            DescriptorType::ClockDomain,
            configuration_index,
            clock_domain_index,
            name,
        )
        .await
    }

    /// Set an audio unit's sampling rate
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_audio_unit_sampling_rate(
        &self,
        entity_id: UniqueIdentifier,
        audio_unit_index: DescriptorIndex,
        sampling_rate: SamplingRate,
    ) -> Result<(), AemError> {
        self.reject_unknown(entity_id)?;
        let response = self
            .aecp(
                entity_id,
                AemCommandType::SetSamplingRate,
                aem::sampling_rate(
                    DescriptorType::AudioUnit as u16,
                    audio_unit_index,
                    sampling_rate,
                ),
            )
            .await?;
        response.check()?;
        self.apply(
            entity_id,
            Mutation::SamplingRate {
                audio_unit_index,
                sampling_rate,
            },
        )
        .await;
        Ok(())
    }

    /// Select a clock domain's clock source
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_clock_source(
        &self,
        entity_id: UniqueIdentifier,
        clock_domain_index: ClockDomainIndex,
        clock_source_index: ClockSourceIndex,
    ) -> Result<(), AemError> {
        self.reject_unknown(entity_id)?;
        let response = self
            .aecp(
                entity_id,
                AemCommandType::SetClockSource,
                aem::clock_source(
                    DescriptorType::ClockDomain as u16,
                    clock_domain_index,
                    clock_source_index,
                ),
            )
            .await?;
        response.check()?;
        self.apply(
            entity_id,
            Mutation::ClockSource {
                clock_domain_index,
                clock_source_index,
            },
        )
        .await;
        Ok(())
    }

    /// Set a memory object's length
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn set_memory_object_length(
        &self,
        entity_id: UniqueIdentifier,
        configuration_index: ConfigurationIndex,
        memory_object_index: MemoryObjectIndex,
        length: u64,
    ) -> Result<(), AemError> {
        self.reject_unknown(entity_id)?;
        let response = self
            .aecp(
                entity_id,
                AemCommandType::SetMemoryObjectLength,
                aem::memory_object_length(configuration_index, memory_object_index, length),
            )
            .await?;
        response.check()?;
        self.apply(
            entity_id,
            Mutation::MemoryObjectLength {
                memory_object_index,
                length,
            },
        )
        .await;
        Ok(())
    }

    /// Start a stream input
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn start_stream_input(
        &self,
        entity_id: UniqueIdentifier,
        stream_index: StreamIndex,
    ) -> Result<(), AemError> {
        self.set_streaming(entity_id, DescriptorType::StreamInput, stream_index, true)
            .await
    }

    /// Stop a stream input
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn stop_stream_input(
        &self,
        entity_id: UniqueIdentifier,
        stream_index: StreamIndex,
    ) -> Result<(), AemError> {
        self.set_streaming(entity_id, DescriptorType::StreamInput, stream_index, false)
            .await
    }

    /// Start a stream output
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn start_stream_output(
        &self,
        entity_id: UniqueIdentifier,
        stream_index: StreamIndex,
    ) -> Result<(), AemError> {
        self.set_streaming(entity_id, DescriptorType::StreamOutput, stream_index, true)
            .await
    }

    /// Stop a stream output
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn stop_stream_output(
        &self,
        entity_id: UniqueIdentifier,
        stream_index: StreamIndex,
    ) -> Result<(), AemError> {
        self.set_streaming(entity_id, DescriptorType::StreamOutput, stream_index, false)
            .await
    }

    /// Add audio mappings to a stream input port
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn add_stream_port_input_audio_mappings(
        &self,
        entity_id: UniqueIdentifier,
        stream_port_index: StreamPortIndex,
        mappings: Vec<AudioMapping>,
    ) -> Result<(), AemError> {
        self.change_mappings(
            entity_id,
            PortDirection::Input,
            stream_port_index,
            mappings,
            true,
        )
        .await
    }

    /// Remove audio mappings from a stream input port
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn remove_stream_port_input_audio_mappings(
        &self,
        entity_id: UniqueIdentifier,
        stream_port_index: StreamPortIndex,
        mappings: Vec<AudioMapping>,
    ) -> Result<(), AemError> {
        self.change_mappings(
            entity_id,
            PortDirection::Input,
            stream_port_index,
            mappings,
            false,
        )
        .await
    }

    /// Add audio mappings to a stream output port
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn add_stream_port_output_audio_mappings(
        &self,
        entity_id: UniqueIdentifier,
        stream_port_index: StreamPortIndex,
        mappings: Vec<AudioMapping>,
    ) -> Result<(), AemError> {
        self.change_mappings(
            entity_id,
            PortDirection::Output,
            stream_port_index,
            mappings,
            true,
        )
        .await
    }

    /// Remove audio mappings from a stream output port
    ///
    /// # Errors
    ///
    /// Per [`AemError`].
    pub async fn remove_stream_port_output_audio_mappings(
        &self,
        entity_id: UniqueIdentifier,
        stream_port_index: StreamPortIndex,
        mappings: Vec<AudioMapping>,
    ) -> Result<(), AemError> {
        self.change_mappings(
            entity_id,
            PortDirection::Output,
            stream_port_index,
            mappings,
            false,
        )
        .await
    }

    // ===== ACMP operations =====

    /// Connect a talker stream to a listener stream.
    ///
    /// Issues CONNECT_RX to the listener; on success the listener's
    /// connection record is updated and `StreamConnectionChanged` is
    /// broadcast.
    ///
    /// # Errors
    ///
    /// Per [`AcmpError`].
    pub async fn connect_stream(
        &self,
        talker: StreamIdentification,
        listener: StreamIdentification,
    ) -> Result<(), AcmpError> {
        if !self.inner.cache.contains(listener.entity_id) {
            return Err(AcmpError::UnknownEntity);
        }
        let response = self
            .acmp(AcmpMessageType::ConnectRxCommand, talker, listener)
            .await?;
        check_acmp(&response)?;
        // The status code alone is authoritative; connectionCount on a
        // CONNECT_RX response is not reliable across implementations
        self.apply(
            listener.entity_id,
            Mutation::StreamConnection {
                listener_stream_index: listener.stream_index,
                talker: Some(talker),
            },
        )
        .await;
        Ok(())
    }

    /// Disconnect a listener stream.
    ///
    /// A `NotConnected` reply is normalised to success. For any other
    /// error the controller recovers by probing GET_RX_STATE: if the
    /// listener reports zero connections the disconnect is treated as
    /// successful, otherwise the original error is surfaced.
    ///
    /// # Errors
    ///
    /// Per [`AcmpError`].
    pub async fn disconnect_stream(
        &self,
        talker: StreamIdentification,
        listener: StreamIdentification,
    ) -> Result<(), AcmpError> {
        if !self.inner.cache.contains(listener.entity_id) {
            return Err(AcmpError::UnknownEntity);
        }
        let response = self
            .acmp(AcmpMessageType::DisconnectRxCommand, talker, listener)
            .await?;

        match check_acmp(&response) {
            Ok(()) => {
                self.apply(
                    listener.entity_id,
                    Mutation::StreamConnection {
                        listener_stream_index: listener.stream_index,
                        talker: None,
                    },
                )
                .await;
                Ok(())
            }
            Err(AcmpError::NotConnected) => {
                // Already disconnected: that is what the caller wanted
                self.apply(
                    listener.entity_id,
                    Mutation::StreamConnection {
                        listener_stream_index: listener.stream_index,
                        talker: None,
                    },
                )
                .await;
                Ok(())
            }
            Err(original) => {
                // The talker may report a failure even though the listener
                // actually disconnected; ask the listener directly
                match self.probe_listener_state(listener).await {
                    Some(state) if state.connection_count == 0 => Ok(()),
                    _ => Err(original),
                }
            }
        }
    }

    /// Disconnect from the talker side (TX), for listeners that went away
    ///
    /// # Errors
    ///
    /// Per [`AcmpError`]; `NotConnected` is normalised to success.
    pub async fn disconnect_talker_stream(
        &self,
        talker: StreamIdentification,
        listener: StreamIdentification,
    ) -> Result<(), AcmpError> {
        if !self.inner.cache.contains(talker.entity_id) {
            return Err(AcmpError::UnknownEntity);
        }
        let response = self
            .acmp(AcmpMessageType::DisconnectTxCommand, talker, listener)
            .await?;
        match check_acmp(&response) {
            Ok(()) | Err(AcmpError::NotConnected) => {
                if self.inner.cache.contains(listener.entity_id) {
                    self.apply(
                        listener.entity_id,
                        Mutation::StreamConnection {
                            listener_stream_index: listener.stream_index,
                            talker: None,
                        },
                    )
                    .await;
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Query a listener stream's connection state.
    ///
    /// On success the cached connection record is refreshed:
    /// `connection_count != 0` on a GET_RX_STATE response means connected.
    ///
    /// # Errors
    ///
    /// Per [`AcmpError`].
    pub async fn get_listener_stream_state(
        &self,
        listener: StreamIdentification,
    ) -> Result<ListenerStreamState, AcmpError> {
        if !self.inner.cache.contains(listener.entity_id) {
            return Err(AcmpError::UnknownEntity);
        }
        let talker_unset = StreamIdentification {
            entity_id: UniqueIdentifier::NULL,
            stream_index: 0,
        };
        let response = self
            .acmp(AcmpMessageType::GetRxStateCommand, talker_unset, listener)
            .await?;
        check_acmp(&response)?;

        let connected = response.connection_count != 0 && !response.talker_entity_id.is_null();
        let talker = connected.then_some(StreamIdentification {
            entity_id: response.talker_entity_id,
            stream_index: response.talker_unique_id,
        });
        self.apply(
            listener.entity_id,
            Mutation::StreamConnection {
                listener_stream_index: listener.stream_index,
                talker,
            },
        )
        .await;
        Ok(ListenerStreamState {
            talker,
            connection_count: response.connection_count,
            flags: response.flags,
        })
    }

    // ===== internals =====

    fn reject_unknown(&self, entity_id: UniqueIdentifier) -> Result<(), AemError> {
        if self.inner.cache.contains(entity_id) {
            Ok(())
        } else {
            Err(AemError::UnknownEntity)
        }
    }

    async fn aecp(
        &self,
        target: UniqueIdentifier,
        command_type: AemCommandType,
        payload: bytes::Bytes,
    ) -> Result<AecpResponse, AemError> {
        self.inner.handle.aecp(target, command_type, payload).await
    }

    async fn acmp(
        &self,
        message_type: AcmpMessageType,
        talker: StreamIdentification,
        listener: StreamIdentification,
    ) -> Result<Acmpdu, AcmpError> {
        self.inner.handle.acmp(message_type, talker, listener).await
    }

    async fn apply(&self, entity_id: UniqueIdentifier, mutation: Mutation) -> bool {
        self.inner.handle.apply(entity_id, mutation).await
    }

    async fn set_name(
        &self,
        entity_id: UniqueIdentifier,
        descriptor_type: DescriptorType,
        descriptor_index: DescriptorIndex,
        name_index: u16,
        configuration_index: ConfigurationIndex,
        name: AvdeccFixedString,
    ) -> Result<(), AemError> {
        self.reject_unknown(entity_id)?;
        let response = self
            .aecp(
                entity_id,
                AemCommandType::SetName,
                aem::name(
                    descriptor_type as u16,
                    descriptor_index,
                    name_index,
                    configuration_index,
                    &name,
                ),
            )
            .await?;
        response.check()
    }

    async fn set_object_name(
        &self,
        entity_id: UniqueIdentifier,
        descriptor_type: DescriptorType,
        configuration_index: ConfigurationIndex,
        descriptor_index: DescriptorIndex,
        name: &str,
    ) -> Result<(), AemError> {
        let name = AvdeccFixedString::new(name);
        self.set_name(
            entity_id,
            descriptor_type,
            descriptor_index,
            0,
            configuration_index,
            name,
        )
        .await?;
        self.apply(
            entity_id,
            Mutation::ObjectName {
                descriptor_type,
                descriptor_index,
                name,
            },
        )
        .await;
        Ok(())
    }

    async fn set_streaming(
        &self,
        entity_id: UniqueIdentifier,
        descriptor_type: DescriptorType,
        stream_index: StreamIndex,
        start: bool,
    ) -> Result<(), AemError> {
        self.reject_unknown(entity_id)?;
        let command_type = if start {
            AemCommandType::StartStreaming
        } else {
            AemCommandType::StopStreaming
        };
        let response = self
            .aecp(
                entity_id,
                command_type,
                aem::streaming(descriptor_type as u16, stream_index),
            )
            .await?;
        response.check()?;
        let mutation = if descriptor_type == DescriptorType::StreamInput {
            Mutation::StreamInputRunning {
                stream_index,
                running: start,
            }
        } else {
            Mutation::StreamOutputRunning {
                stream_index,
                running: start,
            }
        };
        self.apply(entity_id, mutation).await;
        Ok(())
    }

    async fn change_mappings(
        &self,
        entity_id: UniqueIdentifier,
        direction: PortDirection,
        stream_port_index: StreamPortIndex,
        mappings: Vec<AudioMapping>,
        add: bool,
    ) -> Result<(), AemError> {
        self.reject_unknown(entity_id)?;
        let descriptor_type = match direction {
            PortDirection::Input => DescriptorType::StreamPortInput,
            PortDirection::Output => DescriptorType::StreamPortOutput,
        };
        let command_type = if add {
            AemCommandType::AddAudioMappings
        } else {
            AemCommandType::RemoveAudioMappings
        };
        let response = self
            .aecp(
                entity_id,
                command_type,
                aem::audio_mappings(descriptor_type as u16, stream_port_index, &mappings),
            )
            .await?;
        response.check()?;
        let mutation = if add {
            Mutation::MappingsAdded {
                direction,
                stream_port_index,
                mappings,
            }
        } else {
            Mutation::MappingsRemoved {
                direction,
                stream_port_index,
                mappings,
            }
        };
        self.apply(entity_id, mutation).await;
        Ok(())
    }

    async fn probe_listener_state(
        &self,
        listener: StreamIdentification,
    ) -> Option<ListenerStreamState> {
        let talker_unset = StreamIdentification {
            entity_id: UniqueIdentifier::NULL,
            stream_index: 0,
        };
        let response = self
            .acmp(AcmpMessageType::GetRxStateCommand, talker_unset, listener)
            .await
            .ok()?;
        check_acmp(&response).ok()?;

        let connected = response.connection_count != 0 && !response.talker_entity_id.is_null();
        let talker = connected.then_some(StreamIdentification {
            entity_id: response.talker_entity_id,
            stream_index: response.talker_unique_id,
        });
        self.apply(
            listener.entity_id,
            Mutation::StreamConnection {
                listener_stream_index: listener.stream_index,
                talker,
            },
        )
        .await;
        Some(ListenerStreamState {
            talker,
            connection_count: response.connection_count,
            flags: response.flags,
        })
    }
}

fn check_acmp(response: &Acmpdu) -> Result<(), AcmpError> {
    match response.status.to_error() {
        None => Ok(()),
        Some(err) => Err(err),
    }
}
