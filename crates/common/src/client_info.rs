//! Connection descriptors
//!
//! A [`ClientInfo`] names at most one transport. An empty descriptor means
//! "not determined yet" and makes connection resolution fall back to
//! auto-detection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default TCP port of the exploration server
pub const DEFAULT_TCP_PORT: u16 = 6110;

/// TCP socket target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketInfo {
    pub ip: String,
    #[serde(default)]
    pub tcp_port: Option<u16>,
}

impl SocketInfo {
    pub fn port(&self) -> u16 {
        self.tcp_port.unwrap_or(DEFAULT_TCP_PORT)
    }
}

/// Serial port target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialInfo {
    pub port: String,
    #[serde(default)]
    pub flow_control: bool,
    /// Baudrate to negotiate instead of the server maximum
    #[serde(default)]
    pub override_baudrate: Option<u32>,
    /// Run the blocking serial loop on a dedicated worker thread
    #[serde(default)]
    pub worker: bool,
}

/// USB target, or the mock device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbInfo {
    #[serde(default)]
    pub vid: Option<u16>,
    #[serde(default)]
    pub pid: Option<u16>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub mock: bool,
}

/// Immutable description of where the server lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub socket: Option<SocketInfo>,
    #[serde(default)]
    pub serial: Option<SerialInfo>,
    #[serde(default)]
    pub usb: Option<UsbInfo>,
}

impl ClientInfo {
    pub fn socket(ip: impl Into<String>, tcp_port: Option<u16>) -> Self {
        Self {
            socket: Some(SocketInfo {
                ip: ip.into(),
                tcp_port,
            }),
            ..Default::default()
        }
    }

    pub fn serial(port: impl Into<String>) -> Self {
        Self {
            serial: Some(SerialInfo {
                port: port.into(),
                flow_control: false,
                override_baudrate: None,
                worker: false,
            }),
            ..Default::default()
        }
    }

    pub fn usb(vid: u16, pid: u16, serial: Option<String>) -> Self {
        Self {
            usb: Some(UsbInfo {
                vid: Some(vid),
                pid: Some(pid),
                serial,
                mock: false,
            }),
            ..Default::default()
        }
    }

    /// Descriptor of the built-in mock device
    pub fn mock() -> Self {
        Self {
            usb: Some(UsbInfo {
                mock: true,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn is_mock(&self) -> bool {
        self.usb.as_ref().is_some_and(|u| u.mock)
    }

    /// No transport named at all
    pub fn is_undetermined(&self) -> bool {
        self.socket.is_none() && self.serial.is_none() && self.usb.is_none()
    }

    /// Reject descriptors naming more than one transport
    pub fn validate(&self) -> crate::Result<()> {
        let named = [
            self.socket.is_some(),
            self.serial.is_some(),
            self.usb.is_some(),
        ]
        .iter()
        .filter(|&&set| set)
        .count();

        if named > 1 {
            return Err(crate::Error::Config(format!(
                "Connection names {} transports, expected at most one",
                named
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(socket) = &self.socket {
            write!(f, "socket {}:{}", socket.ip, socket.port())
        } else if let Some(serial) = &self.serial {
            write!(f, "serial {}", serial.port)
        } else if let Some(usb) = &self.usb {
            if usb.mock {
                write!(f, "mock")
            } else {
                write!(
                    f,
                    "usb {:04x}:{:04x}",
                    usb.vid.unwrap_or_default(),
                    usb.pid.unwrap_or_default()
                )?;
                if let Some(serial) = &usb.serial {
                    write!(f, " ({})", serial)?;
                }
                Ok(())
            }
        } else {
            write!(f, "undetermined")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_undetermined() {
        let info = ClientInfo::default();
        assert!(info.is_undetermined());
        assert!(info.validate().is_ok());
        assert_eq!(info.to_string(), "undetermined");
    }

    #[test]
    fn test_constructors_name_one_transport() {
        for info in [
            ClientInfo::socket("127.0.0.1", None),
            ClientInfo::serial("/dev/ttyUSB0"),
            ClientInfo::usb(0x0483, 0xa41d, None),
            ClientInfo::mock(),
        ] {
            assert!(info.validate().is_ok());
            assert!(!info.is_undetermined());
        }
    }

    #[test]
    fn test_rejects_two_transports() {
        let mut info = ClientInfo::socket("10.0.0.1", Some(1234));
        info.serial = ClientInfo::serial("COM3").serial;
        assert!(info.validate().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ClientInfo::socket("10.0.0.1", None).to_string(),
            "socket 10.0.0.1:6110"
        );
        assert_eq!(
            ClientInfo::usb(0x0483, 0xa41d, Some("X1".to_string())).to_string(),
            "usb 0483:a41d (X1)"
        );
        assert!(ClientInfo::mock().is_mock());
    }
}
