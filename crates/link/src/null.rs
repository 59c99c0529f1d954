//! Link used when no transport could be determined

use crate::error::{LinkError, Result};
use crate::link::{DEFAULT_TIMEOUT, Link};
use std::time::Duration;

/// Every operation fails with [`LinkError::Undetermined`]
///
/// Connection resolution treats that error as the signal to auto-detect a
/// device and retry.
#[derive(Debug, Default)]
pub struct NullLink;

impl Link for NullLink {
    fn connect(&mut self) -> Result<()> {
        Err(LinkError::Undetermined)
    }

    fn send(&mut self, _data: &[u8]) -> Result<()> {
        Err(LinkError::Undetermined)
    }

    fn recv(&mut self, _num_bytes: usize) -> Result<Vec<u8>> {
        Err(LinkError::Undetermined)
    }

    fn recv_until(&mut self, _delimiter: &[u8]) -> Result<Vec<u8>> {
        Err(LinkError::Undetermined)
    }

    fn disconnect(&mut self) -> Result<()> {
        Err(LinkError::Undetermined)
    }

    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Err(LinkError::Undetermined)
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        "null".to_string()
    }
}
