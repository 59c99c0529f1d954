//! Common utilities for radarlink
//!
//! This crate provides functionality shared by the link and client crates:
//! connection descriptors, tick unwrapping, the channel bridge used by the
//! worker-backed serial link, logging setup and error handling.

pub mod channel;
pub mod client_info;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod tick;

pub use channel::{SerialBridge, SerialWorker, WorkerCommand, create_serial_bridge};
pub use client_info::{ClientInfo, DEFAULT_TCP_PORT, SerialInfo, SocketInfo, UsbInfo};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use tick::{TICK_MODULUS, TickUnwrapper};
