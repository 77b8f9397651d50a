//! Raw `AF_PACKET` capture backend (Linux).
//!
//! The socket is bound to the interface with the AVTP ethertype, so the
//! kernel filters for us. A dedicated reader thread feeds frames into the
//! receive channel; it wakes on a short receive timeout to observe the
//! shutdown flag.

use super::{ProtocolInterface, RECEIVE_CHANNEL_CAPACITY};
use crate::error::ControllerError;
use crate::protocol::ETHERTYPE_AVTP;
use crate::types::MacAddress;
use async_trait::async_trait;
use bytes::Bytes;
use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const RECV_BUFFER_LEN: usize = 2048;

pub(super) struct RawSocketInterface {
    fd: RawFd,
    mac: MacAddress,
    // transmit side serialised; receive stays on the reader thread
    send_lock: Mutex<()>,
    running: Arc<AtomicBool>,
    receiver: Option<mpsc::Receiver<Bytes>>,
    reader: Option<std::thread::JoinHandle<()>>,
}

impl RawSocketInterface {
    pub(super) fn open(interface_name: &str) -> Result<Self, ControllerError> {
        let name = CString::new(interface_name).map_err(|_| ControllerError::InterfaceInvalid {
            name: interface_name.to_string(),
        })?;

        // SAFETY: name is a valid NUL-terminated string
        let if_index = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if if_index == 0 {
            return Err(ControllerError::InterfaceNotFound {
                name: interface_name.to_string(),
            });
        }

        // SAFETY: plain socket creation
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                i32::from(ETHERTYPE_AVTP.to_be()),
            )
        };
        if fd < 0 {
            return Err(ControllerError::InterfaceOpenError {
                message: format!("socket(AF_PACKET): {}", io::Error::last_os_error()),
            });
        }

        let mac = match Self::query_mac(fd, &name) {
            Ok(mac) => mac,
            Err(err) => {
                // SAFETY: fd was returned by socket() above
                unsafe { libc::close(fd) };
                return Err(err);
            }
        };

        // Bind to the interface so we only see its traffic
        // SAFETY: sockaddr_ll is zero-initialisable, fd is ours
        let bind_result = unsafe {
            let mut addr: libc::sockaddr_ll = std::mem::zeroed();
            addr.sll_family = libc::AF_PACKET as u16;
            addr.sll_protocol = ETHERTYPE_AVTP.to_be();
            addr.sll_ifindex = if_index as i32;
            libc::bind(
                fd,
                std::ptr::addr_of!(addr).cast(),
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if bind_result < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd was returned by socket() above
            unsafe { libc::close(fd) };
            return Err(ControllerError::InterfaceOpenError {
                message: format!("bind({interface_name}): {err}"),
            });
        }

        // Short receive timeout so the reader thread can notice shutdown
        // SAFETY: timeval is plain old data, fd is ours
        unsafe {
            let timeout = libc::timeval {
                tv_sec: 0,
                tv_usec: 250_000,
            };
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                std::ptr::addr_of!(timeout).cast(),
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            );
        }

        let (frame_tx, frame_rx) = mpsc::channel(RECEIVE_CHANNEL_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let reader = std::thread::Builder::new()
            .name("avdecc-capture".to_string())
            .spawn({
                let running = running.clone();
                move || Self::reader_loop(fd, &running, &frame_tx)
            })
            .map_err(|e| ControllerError::InternalError {
                message: format!("failed to spawn capture thread: {e}"),
            })?;

        tracing::info!(
            target: "avdecc::protocol_interface",
            interface = interface_name,
            mac = %mac,
            "raw socket capture opened"
        );

        Ok(Self {
            fd,
            mac,
            send_lock: Mutex::new(()),
            running,
            receiver: Some(frame_rx),
            reader: Some(reader),
        })
    }

    fn query_mac(fd: RawFd, name: &CString) -> Result<MacAddress, ControllerError> {
        // SAFETY: ifreq is zero-initialisable; the name fits IFNAMSIZ or
        // if_nametoindex would have failed
        unsafe {
            let mut request: libc::ifreq = std::mem::zeroed();
            let name_bytes = name.as_bytes_with_nul();
            if name_bytes.len() > request.ifr_name.len() {
                return Err(ControllerError::InterfaceInvalid {
                    name: name.to_string_lossy().into_owned(),
                });
            }
            for (dst, &src) in request.ifr_name.iter_mut().zip(name_bytes) {
                *dst = src as libc::c_char;
            }
            if libc::ioctl(fd, libc::SIOCGIFHWADDR, &mut request) < 0 {
                return Err(ControllerError::InterfaceInvalid {
                    name: name.to_string_lossy().into_owned(),
                });
            }
            let hw = request.ifr_ifru.ifru_hwaddr.sa_data;
            Ok(MacAddress::new([
                hw[0] as u8,
                hw[1] as u8,
                hw[2] as u8,
                hw[3] as u8,
                hw[4] as u8,
                hw[5] as u8,
            ]))
        }
    }

    fn reader_loop(fd: RawFd, running: &AtomicBool, frame_tx: &mpsc::Sender<Bytes>) {
        let mut buffer = [0u8; RECV_BUFFER_LEN];
        while running.load(Ordering::Acquire) {
            // SAFETY: buffer is valid for RECV_BUFFER_LEN bytes
            let len = unsafe {
                libc::recv(
                    fd,
                    buffer.as_mut_ptr().cast(),
                    RECV_BUFFER_LEN,
                    0,
                )
            };
            if len < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    // receive timeout: loop around and re-check the flag
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted => continue,
                    _ => {
                        tracing::warn!(
                            target: "avdecc::protocol_interface",
                            error = %err,
                            "capture receive failed, stopping reader"
                        );
                        break;
                    }
                }
            }
            let frame = Bytes::copy_from_slice(&buffer[..len as usize]);
            if frame_tx.blocking_send(frame).is_err() {
                break; // receiver gone, controller shut down
            }
        }
    }
}

#[async_trait]
impl ProtocolInterface for RawSocketInterface {
    fn local_mac(&self) -> MacAddress {
        self.mac
    }

    async fn send(&self, frame: &[u8]) {
        let _guard = self.send_lock.lock().expect("send lock poisoned");
        // SAFETY: frame points to frame.len() valid bytes
        let sent = unsafe { libc::send(self.fd, frame.as_ptr().cast(), frame.len(), 0) };
        if sent < 0 {
            tracing::warn!(
                target: "avdecc::protocol_interface",
                error = %io::Error::last_os_error(),
                "frame transmit failed"
            );
        }
    }

    fn take_receiver(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.receiver.take()
    }

    async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for RawSocketInterface {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        // SAFETY: fd was returned by socket() and is closed exactly once
        unsafe { libc::close(self.fd) };
    }
}
