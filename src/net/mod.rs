//! Link-layer access: raw-socket and pcap capture backends.
//!
//! Both backends filter to the AVTP ethertype and feed received frames
//! into a single-subscriber channel. `open` probes the raw backend first
//! and falls back to pcap, so a missing capture library only matters when
//! raw sockets are unavailable too.

pub mod pcap;
#[cfg(target_os = "linux")]
mod raw;

use crate::error::ControllerError;
use crate::types::MacAddress;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Capacity of the receive channel between the capture thread and the
/// event loop
pub(crate) const RECEIVE_CHANNEL_CAPACITY: usize = 256;

/// Which capture backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterfaceKind {
    /// Probe raw sockets first, fall back to pcap
    #[default]
    Auto,
    /// Raw `AF_PACKET` socket (Linux only)
    RawSocket,
    /// Runtime-loaded libpcap
    Pcap,
}

/// Link-layer send/receive handle.
///
/// Receive is single-subscriber: `take_receiver` hands out the channel
/// once. Send is fire-and-forget; transient failures are logged, not
/// propagated. `shutdown` is idempotent and stops the capture thread.
#[async_trait]
pub trait ProtocolInterface: Send + Sync {
    /// MAC address of the opened interface
    fn local_mac(&self) -> MacAddress;

    /// Transmit a full Ethernet frame
    async fn send(&self, frame: &[u8]);

    /// Take the receive channel (returns `None` after the first call)
    fn take_receiver(&mut self) -> Option<mpsc::Receiver<Bytes>>;

    /// Stop the capture backend; no frames are delivered after return
    async fn shutdown(&self);
}

/// Open a capture handle on the named interface
///
/// # Errors
///
/// `InterfaceNotFound` / `InterfaceInvalid` if the interface cannot be
/// used, `InterfaceOpenError` if every requested backend failed to open.
pub fn open(
    kind: InterfaceKind,
    interface_name: &str,
) -> Result<Box<dyn ProtocolInterface>, ControllerError> {
    match kind {
        InterfaceKind::RawSocket => open_raw(interface_name),
        InterfaceKind::Pcap => open_pcap(interface_name),
        InterfaceKind::Auto => match open_raw(interface_name) {
            Ok(interface) => Ok(interface),
            Err(raw_error) => {
                tracing::debug!(
                    target: "avdecc::protocol_interface",
                    error = %raw_error,
                    "raw socket backend unavailable, probing pcap"
                );
                open_pcap(interface_name).map_err(|pcap_error| match pcap_error {
                    // Keep the more specific error when both failed
                    ControllerError::InterfaceOpenError { message } => {
                        ControllerError::InterfaceOpenError {
                            message: format!("raw: {raw_error}; pcap: {message}"),
                        }
                    }
                    other => other,
                })
            }
        },
    }
}

#[cfg(target_os = "linux")]
fn open_raw(interface_name: &str) -> Result<Box<dyn ProtocolInterface>, ControllerError> {
    raw::RawSocketInterface::open(interface_name)
        .map(|interface| Box::new(interface) as Box<dyn ProtocolInterface>)
}

#[cfg(not(target_os = "linux"))]
fn open_raw(_interface_name: &str) -> Result<Box<dyn ProtocolInterface>, ControllerError> {
    // raw sockets are only wired up on Linux
    Err(ControllerError::InvalidProtocolInterfaceType)
}

fn open_pcap(interface_name: &str) -> Result<Box<dyn ProtocolInterface>, ControllerError> {
    pcap::PcapInterface::open(interface_name)
        .map(|interface| Box::new(interface) as Box<dyn ProtocolInterface>)
}
