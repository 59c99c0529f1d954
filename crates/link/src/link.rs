//! The uniform byte-channel contract every transport implements

use crate::error::{LinkError, Result};
use std::time::Duration;

/// Timeout applied to a freshly created link
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Point-to-point byte stream to a sensor server
///
/// A link is owned by exactly one message stream for the lifetime of a
/// session and is never used from two threads at once.
pub trait Link: Send {
    /// Open the underlying handle
    fn connect(&mut self) -> Result<()>;

    /// Write all of `data`
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `num_bytes` or fail with a timeout
    fn recv(&mut self, num_bytes: usize) -> Result<Vec<u8>>;

    /// Read up to and including the first `delimiter`, or fail with a timeout
    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>>;

    /// Close the underlying handle; closing a closed link is a no-op
    fn disconnect(&mut self) -> Result<()>;

    fn timeout(&self) -> Duration;

    /// Change the read timeout, taking effect on the transport immediately
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Timeout the link was created with
    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    fn is_connected(&self) -> bool;

    /// Current baudrate for raw serial transports, `None` otherwise
    fn baudrate(&self) -> Option<u32> {
        None
    }

    fn set_baudrate(&mut self, _baudrate: u32) -> Result<()> {
        Err(LinkError::Unsupported("changing baudrate"))
    }

    /// Human readable description used in logs
    fn describe(&self) -> String;
}

impl std::fmt::Debug for dyn Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Link({})", self.describe())
    }
}
