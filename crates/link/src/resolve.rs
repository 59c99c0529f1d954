//! Connection resolution: from a descriptor to a connected link

use crate::discovery::{DeviceDiscovery, autodetect};
use crate::error::{LinkError, Result};
use crate::link::Link;
use crate::null::NullLink;
use crate::serial::SerialLink;
use crate::socket::SocketLink;
use crate::usb::UsbLink;
use crate::worker::SerialWorkerLink;
use common::ClientInfo;
use tracing::{info, warn};

/// Build the link a descriptor asks for, without connecting it
///
/// Priority: socket, then serial port, then USB identity. A descriptor
/// naming none of them (or only the mock device) yields a [`NullLink`].
pub fn link_from_client_info(info: &ClientInfo) -> Box<dyn Link> {
    if let Some(socket) = &info.socket {
        return Box::new(SocketLink::open_socket(socket.ip.clone(), socket.port()));
    }

    if let Some(serial) = &info.serial {
        return if serial.worker {
            Box::new(SerialWorkerLink::open_port(serial.port.clone(), serial.flow_control))
        } else {
            Box::new(SerialLink::open_port(serial.port.clone(), serial.flow_control))
        };
    }

    if let Some(usb) = &info.usb
        && !usb.mock
        && let (Some(vid), Some(pid)) = (usb.vid, usb.pid)
    {
        return Box::new(UsbLink::open_device(vid, pid, usb.serial.clone()));
    }

    Box::new(NullLink)
}

/// Result of a connection attempt that is not an error
pub enum ConnectOutcome {
    Connected(Box<dyn Link>),
    /// The link could not know what to connect to
    Undetermined,
}

/// Connect `link`, separating "nothing to connect to" from real failures
pub fn try_connect(mut link: Box<dyn Link>) -> Result<ConnectOutcome> {
    match link.connect() {
        Ok(()) => Ok(ConnectOutcome::Connected(link)),
        Err(LinkError::Undetermined) => Ok(ConnectOutcome::Undetermined),
        Err(e) => Err(e),
    }
}

/// Connect `link`, auto-detecting a device once if it turns out undetermined
///
/// Returns the connected link together with the descriptor that was
/// actually used.
pub fn ensure_connected_link(
    info: &ClientInfo,
    link: Box<dyn Link>,
    discovery: &dyn DeviceDiscovery,
) -> Result<(Box<dyn Link>, ClientInfo)> {
    match try_connect(link)? {
        ConnectOutcome::Connected(link) => {
            info!("Connected via {}", link.describe());
            Ok((link, info.clone()))
        }
        ConnectOutcome::Undetermined => {
            warn!("No transport given for {}, auto-detecting", info);
            let detected = autodetect(discovery)?;
            match try_connect(link_from_client_info(&detected))? {
                ConnectOutcome::Connected(link) => {
                    info!("Connected via {}", link.describe());
                    Ok((link, detected))
                }
                ConnectOutcome::Undetermined => Err(LinkError::AutoDetect(format!(
                    "detected {} but could not resolve a link for it",
                    detected
                ))),
            }
        }
    }
}

/// Resolve and connect the link for `info`
pub fn connect_link(
    info: &ClientInfo,
    discovery: &dyn DeviceDiscovery,
) -> Result<(Box<dyn Link>, ClientInfo)> {
    info.validate()?;
    ensure_connected_link(info, link_from_client_info(info), discovery)
}
