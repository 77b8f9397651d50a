//! An in-memory [`ProtocolInterface`] backed by channels

use crate::net::ProtocolInterface;
use crate::types::MacAddress;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Protocol interface whose wire is a pair of channels.
///
/// Frames the controller sends surface on the matching [`VirtualLink`];
/// frames injected into the link are delivered as received traffic.
pub struct VirtualInterface {
    mac: MacAddress,
    outbound: mpsc::UnboundedSender<Bytes>,
    receiver: Option<mpsc::Receiver<Bytes>>,
    running: Arc<AtomicBool>,
}

/// The far end of a [`VirtualInterface`]
pub struct VirtualLink {
    outbound: mpsc::UnboundedReceiver<Bytes>,
    injector: FrameInjector,
}

/// Cloneable handle injecting frames into the controller's receive path
#[derive(Clone)]
pub struct FrameInjector {
    inbound: mpsc::Sender<Bytes>,
}

impl VirtualInterface {
    /// Create an interface and its far end
    #[must_use]
    pub fn pair(mac: MacAddress) -> (Self, VirtualLink) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(crate::net::RECEIVE_CHANNEL_CAPACITY);
        (
            Self {
                mac,
                outbound: outbound_tx,
                receiver: Some(inbound_rx),
                running: Arc::new(AtomicBool::new(true)),
            },
            VirtualLink {
                outbound: outbound_rx,
                injector: FrameInjector {
                    inbound: inbound_tx,
                },
            },
        )
    }
}

#[async_trait]
impl ProtocolInterface for VirtualInterface {
    fn local_mac(&self) -> MacAddress {
        self.mac
    }

    async fn send(&self, frame: &[u8]) {
        if self.running.load(Ordering::Acquire) {
            let _ = self.outbound.send(Bytes::copy_from_slice(frame));
        }
    }

    fn take_receiver(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.receiver.take()
    }

    async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl VirtualLink {
    /// Next frame the controller transmitted, `None` once it shut down
    pub async fn next_sent(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    /// Handle for injecting received frames
    #[must_use]
    pub fn injector(&self) -> FrameInjector {
        self.injector.clone()
    }
}

impl FrameInjector {
    /// Deliver a frame to the controller as received traffic
    ///
    /// # Errors
    ///
    /// Returns an error after the controller released its receive side.
    pub async fn inject(&self, frame: Bytes) -> Result<(), Bytes> {
        self.inbound.send(frame).await.map_err(|e| e.0)
    }
}
