//! Test doubles: an in-memory protocol interface and a simulated remote
//! entity, used by the integration tests to exercise the controller
//! without hardware.

mod entity_sim;
mod virtual_interface;

pub use entity_sim::{EntitySim, EntitySimConfig};
pub use virtual_interface::{FrameInjector, VirtualInterface, VirtualLink};

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Pump frames sent by the controller through the simulated entity and
/// inject its responses back, until the controller shuts down.
pub fn spawn_responder(mut link: VirtualLink, sim: Arc<Mutex<EntitySim>>) -> JoinHandle<()> {
    let injector = link.injector();
    tokio::spawn(async move {
        while let Some(frame) = link.next_sent().await {
            let responses = sim.lock().expect("sim lock poisoned").handle(&frame);
            for response in responses {
                if injector.inject(response).await.is_err() {
                    return;
                }
            }
        }
    })
}
