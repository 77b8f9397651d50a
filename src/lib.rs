//! # avdecc
//!
//! A pure Rust AVDECC (IEEE 1722.1) controller library.
//!
//! ## Features
//!
//! - Entity discovery over ADP with liveness tracking
//! - Entity-model enumeration (static descriptor tree + dynamic state)
//! - Control operations: acquire/release, naming, formats, sampling
//!   rates, clock sources, stream start/stop, audio mappings
//! - Stream connection management over ACMP
//! - JSON dump/load of enumerated entity models
//!
//! ## Example
//!
//! ```rust,no_run
//! use avdecc::{Controller, ControllerConfig, ControllerEvent, InterfaceKind, UniqueIdentifier};
//!
//! # async fn example() -> Result<(), avdecc::ControllerError> {
//! let controller = Controller::new(
//!     InterfaceKind::Auto,
//!     "eth0",
//!     0x0001,
//!     UniqueIdentifier::new(0x001B_2100_0000_0001),
//!     ControllerConfig::default(),
//! )?;
//!
//! let mut events = controller.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if let ControllerEvent::EntityOnline { entity_id } = event {
//!         if let Some(entity) = controller.entity(entity_id) {
//!             println!("online: {} ({})", entity_id, entity.tree().dynamic.entity_name);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

// Public modules
/// Error types
pub mod error;
/// Controlled entities and their registry
pub mod entity;
/// Entity model data structures
pub mod model;
/// Link-layer capture backends
pub mod net;
/// Wire protocol codecs
pub mod protocol;
/// Test doubles (virtual interface, simulated entity)
pub mod testing;
/// Core types
pub mod types;

// Internal modules
mod controller;
mod discovery;
mod enumeration;
mod pipeline;

// Re-exports
pub use controller::{Controller, ControllerEvent, EventBus, ListenerStreamState, PortDirection};
pub use entity::{ControlledEntity, ControlledEntityGuard, EntityCache};
pub use error::{AcmpError, AemError, ControllerError};
pub use model::json::{DeserializationError, Flags as JsonFlags, SerializationError};
pub use model::{AcquireState, DescriptorType, EntityTree};
pub use net::{InterfaceKind, ProtocolInterface};
pub use pipeline::AecpResponse;
pub use types::{
    AudioMapping, AvdeccFixedString, ControllerConfig, ControllerConfigBuilder, MacAddress,
    SamplingRate, StreamFormat, StreamIdentification, UniqueIdentifier,
};
