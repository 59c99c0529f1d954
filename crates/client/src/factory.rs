//! Client construction
//!
//! Constructors are tried in order; the first one that applies to the
//! connection descriptor builds the client. Adding a client kind means
//! adding a constructor to the list handed to [`open_client`].

use crate::error::{Error, Result};
use crate::live::LiveClient;
use crate::mock::MockClient;
use crate::session::Client;
use common::ClientInfo;
use link::{DeviceDiscovery, SystemDiscovery};
use tracing::debug;

/// Outcome of one constructor
pub enum Construction {
    Built(Box<dyn Client>),
    /// The descriptor is not meant for this kind of client
    NotApplicable,
}

pub type ClientConstructor = fn(&ClientInfo, &dyn DeviceDiscovery) -> Result<Construction>;

/// Builds a [`MockClient`] for the mock descriptor
pub fn mock_constructor(info: &ClientInfo, _discovery: &dyn DeviceDiscovery) -> Result<Construction> {
    if !info.is_mock() {
        return Ok(Construction::NotApplicable);
    }
    Ok(Construction::Built(Box::new(MockClient::new())))
}

/// Builds a [`LiveClient`] for anything else, auto-detecting if needed
pub fn live_constructor(info: &ClientInfo, discovery: &dyn DeviceDiscovery) -> Result<Construction> {
    if info.is_mock() {
        return Ok(Construction::NotApplicable);
    }
    Ok(Construction::Built(Box::new(LiveClient::open(info, discovery)?)))
}

pub const DEFAULT_CONSTRUCTORS: [ClientConstructor; 2] = [mock_constructor, live_constructor];

/// Build the first client whose constructor applies
pub fn open_client(
    info: &ClientInfo,
    discovery: &dyn DeviceDiscovery,
    constructors: &[ClientConstructor],
) -> Result<Box<dyn Client>> {
    for (i, constructor) in constructors.iter().enumerate() {
        match constructor(info, discovery)? {
            Construction::Built(client) => {
                debug!("Constructor {} built a client for {}", i, info);
                return Ok(client);
            }
            Construction::NotApplicable => continue,
        }
    }
    Err(Error::ClientCreation(format!(
        "no client implementation accepts {}",
        info
    )))
}

/// [`open_client`] with the default constructors and system discovery
pub fn open_default_client(info: &ClientInfo) -> Result<Box<dyn Client>> {
    open_client(info, &SystemDiscovery, &DEFAULT_CONSTRUCTORS)
}
