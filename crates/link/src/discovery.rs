//! Device discovery and auto-detection
//!
//! Discovery itself is a thin layer over the OS: serial ports come from
//! `serialport::available_ports()` and USB devices from `rusb`. Both are
//! filtered against [`KNOWN_DEVICES`]. [`autodetect`] turns a discovery
//! result into a connection descriptor when it is unambiguous.

use crate::error::{LinkError, Result};
use common::ClientInfo;
use rusb::{Context, UsbContext};
use serialport::SerialPortType;
use std::fmt;
use tracing::{debug, info};

/// How a recognized device exposes the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownTransport {
    /// Vendor bulk interface, opened with `rusb`
    Usb,
    /// USB-to-UART bridge or CDC ACM port, opened as a serial port
    Serial,
}

/// A board the host knows how to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownDevice {
    pub vid: u16,
    pub pid: u16,
    pub name: &'static str,
    pub transport: KnownTransport,
}

pub const KNOWN_DEVICES: &[KnownDevice] = &[
    KnownDevice {
        vid: 0x0483,
        pid: 0xa41d,
        name: "XC120",
        transport: KnownTransport::Usb,
    },
    KnownDevice {
        vid: 0x0483,
        pid: 0xa449,
        name: "XM125",
        transport: KnownTransport::Serial,
    },
    KnownDevice {
        vid: 0x0483,
        pid: 0xa42c,
        name: "XE121",
        transport: KnownTransport::Serial,
    },
    KnownDevice {
        vid: 0x10c4,
        pid: 0xea60,
        name: "XE121 (CP210x bridge)",
        transport: KnownTransport::Serial,
    },
];

pub fn lookup_known(vid: u16, pid: u16, transport: KnownTransport) -> Option<&'static KnownDevice> {
    KNOWN_DEVICES
        .iter()
        .find(|d| d.vid == vid && d.pid == pid && d.transport == transport)
}

/// A recognized USB device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub vid: u16,
    pub pid: u16,
    pub serial: Option<String>,
    pub name: String,
    /// Whether the device could be opened by this process
    pub accessible: bool,
}

impl fmt::Display for UsbDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:04x}:{:04x}]", self.name, self.vid, self.pid)?;
        if let Some(serial) = &self.serial {
            write!(f, " serial {}", serial)?;
        }
        if !self.accessible {
            write!(f, " (inaccessible)")?;
        }
        Ok(())
    }
}

/// A serial port, recognized or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialDeviceInfo {
    pub port: String,
    pub name: Option<String>,
    pub serial: Option<String>,
    pub recognized: bool,
}

impl fmt::Display for SerialDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.port)?;
        if let Some(name) = &self.name {
            write!(f, " ({})", name)?;
        }
        if let Some(serial) = &self.serial {
            write!(f, " serial {}", serial)?;
        }
        Ok(())
    }
}

/// Source of candidate devices
pub trait DeviceDiscovery {
    /// Recognized USB bulk devices
    fn usb_devices(&self) -> Result<Vec<UsbDeviceInfo>>;

    /// All serial ports, with recognized ones flagged
    fn serial_devices(&self) -> Result<Vec<SerialDeviceInfo>>;
}

/// Discovery backed by the host OS
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiscovery;

impl DeviceDiscovery for SystemDiscovery {
    fn usb_devices(&self) -> Result<Vec<UsbDeviceInfo>> {
        let context = Context::new()?;
        let mut found = Vec::new();
        for device in context.devices()?.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            let Some(known) = lookup_known(
                descriptor.vendor_id(),
                descriptor.product_id(),
                KnownTransport::Usb,
            ) else {
                continue;
            };

            let (accessible, serial) = match device.open() {
                Ok(handle) => (true, handle.read_serial_number_string_ascii(&descriptor).ok()),
                Err(e) => {
                    debug!("Cannot open {} at bus {}: {}", known.name, device.bus_number(), e);
                    (false, None)
                }
            };
            found.push(UsbDeviceInfo {
                vid: known.vid,
                pid: known.pid,
                serial,
                name: known.name.to_string(),
                accessible,
            });
        }
        Ok(found)
    }

    fn serial_devices(&self) -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()
            .map_err(|e| LinkError::from_serial("<enumeration>", e))?;

        Ok(ports
            .into_iter()
            .map(|port| match port.port_type {
                SerialPortType::UsbPort(usb) => {
                    let known = lookup_known(usb.vid, usb.pid, KnownTransport::Serial);
                    SerialDeviceInfo {
                        port: port.port_name,
                        name: known.map(|k| k.name.to_string()).or(usb.product),
                        serial: usb.serial_number,
                        recognized: known.is_some(),
                    }
                }
                _ => SerialDeviceInfo {
                    port: port.port_name,
                    name: None,
                    serial: None,
                    recognized: false,
                },
            })
            .collect())
    }
}

/// Pick the single device to connect to
///
/// Exactly one accessible USB device wins; otherwise exactly one recognized
/// serial port. Anything else is ambiguous and fails.
pub fn autodetect(discovery: &dyn DeviceDiscovery) -> Result<ClientInfo> {
    let usb: Vec<_> = discovery
        .usb_devices()?
        .into_iter()
        .filter(|d| d.accessible)
        .collect();

    match usb.as_slice() {
        [device] => {
            info!("Auto-detected USB device {}", device);
            return Ok(ClientInfo::usb(device.vid, device.pid, device.serial.clone()));
        }
        [] => {}
        many => {
            return Err(LinkError::AutoDetect(format!(
                "found {} USB devices, select one explicitly",
                many.len()
            )));
        }
    }

    let serial: Vec<_> = discovery
        .serial_devices()?
        .into_iter()
        .filter(|d| d.recognized)
        .collect();

    match serial.as_slice() {
        [device] => {
            info!("Auto-detected serial device {}", device);
            Ok(ClientInfo::serial(device.port.clone()))
        }
        [] => Err(LinkError::AutoDetect("no device found".to_string())),
        many => Err(LinkError::AutoDetect(format!(
            "found {} serial devices, select one explicitly",
            many.len()
        ))),
    }
}
