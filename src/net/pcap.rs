//! Runtime-loaded libpcap capture backend.
//!
//! The capture library is loaded by name at startup (`wpcap.dll`,
//! `libpcap.so`, or the absolute macOS system path) and ten functions are
//! resolved; if any is missing the backend reports itself unavailable and
//! `open` falls through to `InterfaceOpenError`.

use super::{ProtocolInterface, RECEIVE_CHANNEL_CAPACITY};
use crate::error::ControllerError;
use crate::types::MacAddress;
use async_trait::async_trait;
use bytes::Bytes;
use libloading::Library;
use std::ffi::{c_char, c_int, c_long, c_uint, c_void, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[cfg(windows)]
const PCAP_LIBRARY: &str = "wpcap.dll";
#[cfg(target_os = "macos")]
const PCAP_LIBRARY: &str = "/usr/lib/libpcap.dylib";
#[cfg(all(unix, not(target_os = "macos")))]
const PCAP_LIBRARY: &str = "libpcap.so";

const SNAPLEN: c_int = 65536;
const READ_TIMEOUT_MS: c_int = 250;
const AVTP_FILTER: &str = "ether proto 0x22f0";

#[repr(C)]
struct BpfProgram {
    #[allow(dead_code)]
    bf_len: c_uint,
    #[allow(dead_code)]
    bf_insns: *mut c_void,
}

#[repr(C)]
#[allow(dead_code)]
struct Timeval {
    tv_sec: c_long,
    tv_usec: c_long,
}

#[repr(C)]
struct PcapPkthdr {
    #[allow(dead_code)]
    ts: Timeval,
    caplen: u32,
    #[allow(dead_code)]
    len: u32,
}

type PcapT = c_void;
type OpenLiveFn =
    unsafe extern "C" fn(*const c_char, c_int, c_int, c_int, *mut c_char) -> *mut PcapT;
type FilenoFn = unsafe extern "C" fn(*mut PcapT) -> c_int;
type CloseFn = unsafe extern "C" fn(*mut PcapT);
type CompileFn =
    unsafe extern "C" fn(*mut PcapT, *mut BpfProgram, *const c_char, c_int, c_uint) -> c_int;
type SetFilterFn = unsafe extern "C" fn(*mut PcapT, *mut BpfProgram) -> c_int;
type FreecodeFn = unsafe extern "C" fn(*mut BpfProgram);
type NextExFn = unsafe extern "C" fn(*mut PcapT, *mut *mut PcapPkthdr, *mut *const u8) -> c_int;
type LoopFn = unsafe extern "C" fn(*mut PcapT, c_int, *const c_void, *mut u8) -> c_int;
type BreakLoopFn = unsafe extern "C" fn(*mut PcapT);
type SendPacketFn = unsafe extern "C" fn(*mut PcapT, *const u8, c_int) -> c_int;

/// The dynamically-resolved pcap entry points
struct PcapLibrary {
    // keeps the shared object mapped for the lifetime of the fn pointers
    _library: Library,
    open_live: OpenLiveFn,
    #[allow(dead_code)]
    fileno: FilenoFn,
    close: CloseFn,
    compile: CompileFn,
    setfilter: SetFilterFn,
    freecode: FreecodeFn,
    next_ex: NextExFn,
    #[allow(dead_code)]
    pcap_loop: LoopFn,
    breakloop: BreakLoopFn,
    sendpacket: SendPacketFn,
}

impl PcapLibrary {
    /// Load the capture library and resolve all ten functions
    fn load() -> Result<Self, ControllerError> {
        // SAFETY: loading libpcap runs no untrusted initialisers
        let library = unsafe { Library::new(PCAP_LIBRARY) }.map_err(|e| {
            ControllerError::InterfaceOpenError {
                message: format!("cannot load {PCAP_LIBRARY}: {e}"),
            }
        })?;

        macro_rules! resolve {
            ($name:literal, $ty:ty) => {{
                // SAFETY: the symbol type matches the libpcap prototype
                let symbol = unsafe { library.get::<$ty>($name) }.map_err(|_| {
                    ControllerError::InterfaceOpenError {
                        message: format!(
                            "cannot find all the required functions in {PCAP_LIBRARY}"
                        ),
                    }
                })?;
                *symbol
            }};
        }

        let open_live = resolve!(b"pcap_open_live", OpenLiveFn);
        let fileno = resolve!(b"pcap_fileno", FilenoFn);
        let close = resolve!(b"pcap_close", CloseFn);
        let compile = resolve!(b"pcap_compile", CompileFn);
        let setfilter = resolve!(b"pcap_setfilter", SetFilterFn);
        let freecode = resolve!(b"pcap_freecode", FreecodeFn);
        let next_ex = resolve!(b"pcap_next_ex", NextExFn);
        let pcap_loop = resolve!(b"pcap_loop", LoopFn);
        let breakloop = resolve!(b"pcap_breakloop", BreakLoopFn);
        let sendpacket = resolve!(b"pcap_sendpacket", SendPacketFn);

        let resolved = Self {
            _library: library,
            open_live,
            fileno,
            close,
            compile,
            setfilter,
            freecode,
            next_ex,
            pcap_loop,
            breakloop,
            sendpacket,
        };
        tracing::info!(
            target: "avdecc::protocol_interface",
            library = PCAP_LIBRARY,
            "capture library loaded"
        );
        Ok(resolved)
    }
}

/// Whether the capture library can be loaded with all required symbols
#[must_use]
pub fn is_available() -> bool {
    PcapLibrary::load().is_ok()
}

struct PcapHandle {
    library: PcapLibrary,
    pcap: *mut PcapT,
}

// SAFETY: pcap handle access is serialised: the reader thread only calls
// next_ex, sends go through a mutex, and breakloop is documented safe to
// call from another thread.
unsafe impl Send for PcapHandle {}
unsafe impl Sync for PcapHandle {}

pub(super) struct PcapInterface {
    handle: Arc<PcapHandle>,
    mac: MacAddress,
    send_lock: Mutex<()>,
    running: Arc<AtomicBool>,
    receiver: Option<mpsc::Receiver<Bytes>>,
    reader: Option<std::thread::JoinHandle<()>>,
}

impl PcapInterface {
    pub(super) fn open(interface_name: &str) -> Result<Self, ControllerError> {
        let library = PcapLibrary::load()?;
        let mac = interface_mac(interface_name)?;

        let device = CString::new(interface_name).map_err(|_| {
            ControllerError::InterfaceInvalid {
                name: interface_name.to_string(),
            }
        })?;

        let mut error_buffer = [0 as c_char; 256];
        // SAFETY: device is NUL-terminated, error buffer is PCAP_ERRBUF_SIZE
        let pcap = unsafe {
            (library.open_live)(
                device.as_ptr(),
                SNAPLEN,
                1, // promiscuous, for the ADP/ACMP multicasts
                READ_TIMEOUT_MS,
                error_buffer.as_mut_ptr(),
            )
        };
        if pcap.is_null() {
            let message = unsafe { std::ffi::CStr::from_ptr(error_buffer.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            return Err(ControllerError::InterfaceOpenError {
                message: format!("pcap_open_live({interface_name}): {message}"),
            });
        }

        // Kernel-side filter to AVTP traffic only
        let filter = CString::new(AVTP_FILTER).expect("static filter string");
        // SAFETY: pcap is a live handle, program is out-initialised by compile
        unsafe {
            let mut program = BpfProgram {
                bf_len: 0,
                bf_insns: std::ptr::null_mut(),
            };
            if (library.compile)(pcap, &mut program, filter.as_ptr(), 1, 0) < 0
                || (library.setfilter)(pcap, &mut program) < 0
            {
                (library.close)(pcap);
                return Err(ControllerError::InterfaceOpenError {
                    message: format!("cannot install capture filter on {interface_name}"),
                });
            }
            (library.freecode)(&mut program);
        }

        let handle = Arc::new(PcapHandle { library, pcap });
        let (frame_tx, frame_rx) = mpsc::channel(RECEIVE_CHANNEL_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let reader = std::thread::Builder::new()
            .name("avdecc-pcap".to_string())
            .spawn({
                let handle = handle.clone();
                let running = running.clone();
                move || Self::reader_loop(&handle, &running, &frame_tx)
            })
            .map_err(|e| ControllerError::InternalError {
                message: format!("failed to spawn capture thread: {e}"),
            })?;

        tracing::info!(
            target: "avdecc::protocol_interface",
            interface = interface_name,
            mac = %mac,
            "pcap capture opened"
        );

        Ok(Self {
            handle,
            mac,
            send_lock: Mutex::new(()),
            running,
            receiver: Some(frame_rx),
            reader: Some(reader),
        })
    }

    fn reader_loop(handle: &PcapHandle, running: &AtomicBool, frame_tx: &mpsc::Sender<Bytes>) {
        while running.load(Ordering::Acquire) {
            let mut header: *mut PcapPkthdr = std::ptr::null_mut();
            let mut data: *const u8 = std::ptr::null();
            // SAFETY: pcap is live until Drop joins this thread
            let status =
                unsafe { (handle.library.next_ex)(handle.pcap, &mut header, &mut data) };
            match status {
                1 => {
                    // SAFETY: on status 1, header/data are valid until the
                    // next call on this handle; we copy out immediately
                    let frame = unsafe {
                        Bytes::copy_from_slice(std::slice::from_raw_parts(
                            data,
                            (*header).caplen as usize,
                        ))
                    };
                    if frame_tx.blocking_send(frame).is_err() {
                        break;
                    }
                }
                0 => {} // read timeout: re-check the running flag
                _ => {
                    tracing::warn!(
                        target: "avdecc::protocol_interface",
                        status,
                        "pcap_next_ex failed, stopping reader"
                    );
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ProtocolInterface for PcapInterface {
    fn local_mac(&self) -> MacAddress {
        self.mac
    }

    async fn send(&self, frame: &[u8]) {
        let _guard = self.send_lock.lock().expect("send lock poisoned");
        // SAFETY: frame points to frame.len() valid bytes
        let status = unsafe {
            (self.handle.library.sendpacket)(
                self.handle.pcap,
                frame.as_ptr(),
                frame.len() as c_int,
            )
        };
        if status < 0 {
            tracing::warn!(
                target: "avdecc::protocol_interface",
                "frame transmit failed"
            );
        }
    }

    fn take_receiver(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.receiver.take()
    }

    async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        // SAFETY: breakloop is callable from any thread on a live handle
        unsafe { (self.handle.library.breakloop)(self.handle.pcap) };
    }
}

impl Drop for PcapInterface {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        // SAFETY: wake the reader if it is blocked in next_ex
        unsafe { (self.handle.library.breakloop)(self.handle.pcap) };
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        // SAFETY: the reader has exited; nothing uses the handle anymore
        unsafe { (self.handle.library.close)(self.handle.pcap) };
    }
}

/// MAC address of a local interface.
///
/// Read from sysfs on Linux; other platforms need the raw-socket backend
/// or a platform network helper, so the pcap backend reports the
/// interface invalid there rather than advertising a zero MAC.
fn interface_mac(interface_name: &str) -> Result<MacAddress, ControllerError> {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/sys/class/net/{interface_name}/address");
        let text = std::fs::read_to_string(path).map_err(|_| {
            ControllerError::InterfaceNotFound {
                name: interface_name.to_string(),
            }
        })?;
        let mut bytes = [0u8; 6];
        let mut count = 0;
        for (slot, part) in bytes.iter_mut().zip(text.trim().split(':')) {
            *slot = u8::from_str_radix(part, 16).map_err(|_| {
                ControllerError::InterfaceInvalid {
                    name: interface_name.to_string(),
                }
            })?;
            count += 1;
        }
        if count != 6 {
            return Err(ControllerError::InterfaceInvalid {
                name: interface_name.to_string(),
            });
        }
        Ok(MacAddress::new(bytes))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(ControllerError::InterfaceInvalid {
            name: interface_name.to_string(),
        })
    }
}
