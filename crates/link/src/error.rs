//! Link error types

use std::time::Duration;
use thiserror::Error;

/// Remediation text for serial permission failures
pub const SERIAL_PERMISSION_HELP: &str = "On Linux, add your user to the group owning the port \
(usually 'dialout': `sudo usermod -a -G dialout $USER`) and log in again.";

/// Remediation text for USB permission failures
pub const USB_PERMISSION_HELP: &str = "On Linux, install a udev rule granting access to the \
device (MODE=\"0666\" for its vendor/product id) and re-plug it.";

#[derive(Debug, Error)]
pub enum LinkError {
    /// Nothing satisfied a read within the configured timeout
    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    Timeout {
        timeout: Duration,
        waiting_for: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port {port}: {source}")]
    Serial {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Permission denied for {target}. {help}")]
    PermissionDenied {
        target: String,
        help: &'static str,
    },

    /// Raised by the null link; drives auto-detection
    #[error("No transport was determined for this connection")]
    Undetermined,

    #[error("Auto-detection failed: {0}")]
    AutoDetect(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid connection descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Link is not connected")]
    NotConnected,

    #[error("{0} is not supported by this link")]
    Unsupported(&'static str),

    #[error("Serial worker: {0}")]
    WorkerFailed(String),
}

impl LinkError {
    pub fn timeout(timeout: Duration, waiting_for: impl Into<String>) -> Self {
        LinkError::Timeout {
            timeout,
            waiting_for: waiting_for.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::Timeout { .. })
    }

    /// Map a serial port error, turning permission failures into actionable text
    pub fn from_serial(port: &str, err: serialport::Error) -> Self {
        let denied = matches!(
            err.kind(),
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied)
        ) || err.description.to_lowercase().contains("permission denied");

        if denied {
            LinkError::PermissionDenied {
                target: port.to_string(),
                help: SERIAL_PERMISSION_HELP,
            }
        } else {
            LinkError::Serial {
                port: port.to_string(),
                source: err,
            }
        }
    }

    /// Map a rusb error, turning access failures into actionable text
    pub fn from_usb(target: &str, err: rusb::Error) -> Self {
        match err {
            rusb::Error::Access => LinkError::PermissionDenied {
                target: target.to_string(),
                help: USB_PERMISSION_HELP,
            },
            rusb::Error::NoDevice | rusb::Error::NotFound => {
                LinkError::DeviceNotFound(target.to_string())
            }
            other => LinkError::Usb(other),
        }
    }
}

impl From<common::Error> for LinkError {
    fn from(err: common::Error) -> Self {
        match err {
            common::Error::Config(msg) => LinkError::InvalidDescriptor(msg),
            common::Error::Io(e) => LinkError::Io(e),
            common::Error::Worker(msg) | common::Error::Channel(msg) => LinkError::WorkerFailed(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
