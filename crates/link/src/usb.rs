//! USB bulk transport
//!
//! Talks to the server over the bulk IN/OUT endpoint pair of the device's
//! data interface. The device is located by vendor/product id and,
//! optionally, its serial number string.

use crate::buffered::{BufferedLink, CHUNK_SIZE, RawTransport};
use crate::error::{LinkError, Result};
use bytes::BytesMut;
use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bulk endpoints of the claimed data interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BulkEndpoints {
    interface: u8,
    ep_in: u8,
    ep_out: u8,
}

struct OpenDevice {
    handle: DeviceHandle<Context>,
    endpoints: BulkEndpoints,
    claimed: bool,
}

/// USB bulk transport over `rusb`
pub struct UsbTransport {
    vid: u16,
    pid: u16,
    serial: Option<String>,
    timeout: Duration,
    device: Option<OpenDevice>,
}

impl UsbTransport {
    pub fn new(vid: u16, pid: u16, serial: Option<String>) -> Self {
        Self {
            vid,
            pid,
            serial,
            timeout: crate::link::DEFAULT_TIMEOUT,
            device: None,
        }
    }

    fn target(&self) -> String {
        match &self.serial {
            Some(serial) => format!("{:04x}:{:04x} ({})", self.vid, self.pid, serial),
            None => format!("{:04x}:{:04x}", self.vid, self.pid),
        }
    }

    /// Find the device matching vid, pid and (if given) serial number
    fn find_device(&self, context: &Context) -> Result<Device<Context>> {
        let target = self.target();
        for device in context.devices().map_err(|e| LinkError::from_usb(&target, e))?.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() != self.vid || descriptor.product_id() != self.pid {
                continue;
            }

            let Some(wanted) = &self.serial else {
                return Ok(device);
            };
            match device
                .open()
                .and_then(|h| h.read_serial_number_string_ascii(&descriptor))
            {
                Ok(serial) if &serial == wanted => return Ok(device),
                Ok(_) => {}
                Err(e) => debug!("Could not read serial of {:04x}:{:04x}: {}", self.vid, self.pid, e),
            }
        }
        Err(LinkError::DeviceNotFound(target))
    }

    fn handle(&self) -> Result<&OpenDevice> {
        self.device.as_ref().ok_or(LinkError::NotConnected)
    }
}

/// Locate the first interface exposing both a bulk IN and a bulk OUT endpoint
fn find_bulk_endpoints(device: &Device<Context>) -> Result<BulkEndpoints> {
    let config = device.active_config_descriptor()?;
    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            let mut ep_in = None;
            let mut ep_out = None;
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In => ep_in = ep_in.or(Some(endpoint.address())),
                    Direction::Out => ep_out = ep_out.or(Some(endpoint.address())),
                }
            }
            if let (Some(ep_in), Some(ep_out)) = (ep_in, ep_out) {
                return Ok(BulkEndpoints {
                    interface: descriptor.interface_number(),
                    ep_in,
                    ep_out,
                });
            }
        }
    }
    Err(LinkError::DeviceNotFound(
        "device has no bulk IN/OUT endpoint pair".to_string(),
    ))
}

/// Claim `interface`, detaching any kernel driver first
///
/// Platforms without a claim primitive report `NotSupported`; the interface
/// is then treated as already claimed.
fn claim(handle: &mut DeviceHandle<Context>, interface: u8) -> Result<bool> {
    match handle.kernel_driver_active(interface) {
        Ok(true) => {
            debug!("Detaching kernel driver from interface {}", interface);
            if let Err(e) = handle.detach_kernel_driver(interface) {
                warn!("Failed to detach kernel driver from interface {}: {}", interface, e);
            }
        }
        Ok(false) => {}
        Err(e) => debug!("Could not check kernel driver on interface {}: {}", interface, e),
    }

    match handle.claim_interface(interface) {
        Ok(()) => Ok(true),
        Err(rusb::Error::NotSupported) => {
            debug!("Claiming interface {} not supported, assuming claimed", interface);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

impl RawTransport for UsbTransport {
    fn open(&mut self, timeout: Duration) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }
        self.timeout = timeout;

        let target = self.target();
        let context = Context::new().map_err(|e| LinkError::from_usb(&target, e))?;
        let device = self.find_device(&context)?;
        let endpoints = find_bulk_endpoints(&device)?;
        let mut handle = device.open().map_err(|e| LinkError::from_usb(&target, e))?;
        let claimed = claim(&mut handle, endpoints.interface).map_err(|e| match e {
            LinkError::Usb(err) => LinkError::from_usb(&target, err),
            other => other,
        })?;

        info!(
            "Opened USB device {} (interface {}, in 0x{:02x}, out 0x{:02x})",
            target, endpoints.interface, endpoints.ep_in, endpoints.ep_out
        );
        self.device = Some(OpenDevice {
            handle,
            endpoints,
            claimed,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut device) = self.device.take() {
            if device.claimed
                && let Err(e) = device.handle.release_interface(device.endpoints.interface)
            {
                warn!("Failed to release interface {}: {}", device.endpoints.interface, e);
            }
            info!("Closed USB device {}", self.target());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let device = self.handle()?;
        let mut written = 0;
        while written < data.len() {
            match device
                .handle
                .write_bulk(device.endpoints.ep_out, &data[written..], self.timeout)
            {
                Ok(n) => written += n,
                Err(rusb::Error::Timeout) => {
                    return Err(LinkError::timeout(self.timeout, "bulk OUT transfer"));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn read_into(&mut self, buffer: &mut BytesMut, wait: Duration) -> Result<usize> {
        let device = self.handle()?;
        let mut chunk = [0u8; CHUNK_SIZE];
        match device.handle.read_bulk(
            device.endpoints.ep_in,
            &mut chunk,
            wait.max(Duration::from_millis(1)),
        ) {
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(rusb::Error::Timeout) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("usb {}", self.target())
    }
}

pub type UsbLink = BufferedLink<UsbTransport>;

impl UsbLink {
    pub fn open_device(vid: u16, pid: u16, serial: Option<String>) -> Self {
        BufferedLink::new(UsbTransport::new(vid, pid, serial))
    }
}
