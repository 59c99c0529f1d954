//! Byte-stream transports to a sensor server
//!
//! Every transport implements the [`Link`] trait: connect, send, read an
//! exact number of bytes, read up to a delimiter, disconnect. Reads block
//! for at most the link's timeout.
//!
//! | link | transport |
//! |------|-----------|
//! | [`SerialLink`] | serial port, blocking on the caller's thread |
//! | [`SerialWorkerLink`] | serial port driven by a worker thread |
//! | [`SocketLink`] | TCP |
//! | [`UsbLink`] | USB bulk endpoints |
//! | [`NullLink`] | nothing determined yet |
//! | [`MemoryLink`] | in-memory, for tests |
//!
//! # Example
//!
//! ```
//! use link::{Link, MemoryLink};
//!
//! let mut link = MemoryLink::with_responder(|_| b"{\"ok\":true}\n".to_vec());
//! link.connect().unwrap();
//! link.send(b"{\"cmd\":\"get_system_info\"}\n").unwrap();
//! assert_eq!(link.recv_until(b"\n").unwrap(), b"{\"ok\":true}\n");
//! ```

pub mod buffered;
pub mod discovery;
pub mod error;
#[allow(clippy::module_inception)]
pub mod link;
pub mod memory;
pub mod null;
pub mod resolve;
pub mod serial;
pub mod socket;
pub mod usb;
pub mod worker;

pub use buffered::{BufferedLink, RawTransport};
pub use discovery::{
    DeviceDiscovery, KNOWN_DEVICES, SerialDeviceInfo, SystemDiscovery, UsbDeviceInfo, autodetect,
};
pub use error::{LinkError, Result};
pub use link::{DEFAULT_TIMEOUT, Link};
pub use memory::MemoryLink;
pub use null::NullLink;
pub use resolve::{
    ConnectOutcome, connect_link, ensure_connected_link, link_from_client_info, try_connect,
};
pub use serial::{DEFAULT_BAUDRATE, SerialLink};
pub use socket::SocketLink;
pub use usb::UsbLink;
pub use worker::SerialWorkerLink;
