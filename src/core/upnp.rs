//! UPnP gateway collaborator
//!
//! IPv4 ports flagged in the store's UPnP section are forwarded through the
//! local gateway device (a NAT router answering IGD discovery). The device
//! is driven through the narrow [`Gateway`] trait - discover, add a mapping,
//! enumerate mappings by index, delete a mapping - so the synchronization
//! logic can be tested against a scripted mock while production code
//! delegates the protocol to the `igd` crate.
//!
//! Discovery is bounded by a timeout; a silent network simply yields
//! [`Error::DeviceNotFound`]. Whether that failure is fatal depends on the
//! caller: explicit mapping removal surfaces it, an implicit add during a
//! reload degrades to a logged skip.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use igd::PortMappingProtocol;
use tracing::{debug, info};

use crate::core::error::{Error, Result};
use crate::core::ruleset::Protocol;

/// Upper bound when enumerating device mappings; devices advertise a few
/// dozen entries at most.
const MAX_MAPPING_ENTRIES: u32 = 100;

/// How long discovery waits for a gateway to answer.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// One advertised port mapping on the gateway device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub external_port: u16,
    pub protocol: Protocol,
    pub description: String,
}

/// A discovered gateway device.
pub trait Gateway {
    /// Requests a mapping of external `port` to the same local port.
    fn add_mapping(&self, protocol: Protocol, port: u16, description: &str) -> Result<()>;

    /// Returns the mapping advertised at `index`, or `None` past the end of
    /// the device's mapping table.
    fn list_mapping(&self, index: u32) -> Result<Option<MappingEntry>>;

    /// Deletes the mapping for `external_port`/`protocol`.
    fn delete_mapping(&self, protocol: Protocol, external_port: u16) -> Result<()>;
}

/// Gateway discovery seam, mockable in tests.
pub trait GatewayDiscovery {
    fn discover(&self) -> Result<Box<dyn Gateway>>;
}

/// Deletes every mapping the device advertises. Returns how many were
/// removed. Entries are collected before deletion so the device's index
/// shifting does not skip every other mapping.
pub fn clear_mappings(gateway: &dyn Gateway) -> Result<usize> {
    let mut entries = Vec::new();
    for index in 0..MAX_MAPPING_ENTRIES {
        match gateway.list_mapping(index)? {
            Some(entry) => entries.push(entry),
            None => break,
        }
    }

    for entry in &entries {
        debug!(
            "removing mapping {}/{} ({})",
            entry.external_port, entry.protocol, entry.description
        );
        gateway.delete_mapping(entry.protocol, entry.external_port)?;
    }

    if !entries.is_empty() {
        info!("removed {} gateway mapping(s)", entries.len());
    }
    Ok(entries.len())
}

/// The label attached to mappings so they can be recognized on the device.
pub fn mapping_description(protocol: Protocol, port: u16) -> String {
    format!("portward firewall: {} port {}", protocol, port)
}

impl From<Protocol> for PortMappingProtocol {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Tcp => PortMappingProtocol::TCP,
            Protocol::Udp => PortMappingProtocol::UDP,
        }
    }
}

impl From<PortMappingProtocol> for Protocol {
    fn from(protocol: PortMappingProtocol) -> Self {
        match protocol {
            PortMappingProtocol::TCP => Protocol::Tcp,
            PortMappingProtocol::UDP => Protocol::Udp,
        }
    }
}

/// Production discovery through IGD multicast search.
pub struct IgdDiscovery {
    timeout: Duration,
}

impl IgdDiscovery {
    pub fn new() -> Self {
        Self {
            timeout: DISCOVERY_TIMEOUT,
        }
    }
}

impl Default for IgdDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayDiscovery for IgdDiscovery {
    fn discover(&self) -> Result<Box<dyn Gateway>> {
        let device = igd::search_gateway(igd::SearchOptions {
            timeout: Some(self.timeout),
            ..igd::SearchOptions::default()
        })
        .map_err(|e| Error::DeviceNotFound(e.to_string()))?;

        let local_addr = local_ipv4_towards(device.addr)?;
        info!("gateway device at {} (local address {})", device.addr, local_addr);
        Ok(Box::new(IgdGateway { device, local_addr }))
    }
}

/// A gateway reached through the `igd` crate.
pub struct IgdGateway {
    device: igd::Gateway,
    local_addr: Ipv4Addr,
}

impl Gateway for IgdGateway {
    fn add_mapping(&self, protocol: Protocol, port: u16, description: &str) -> Result<()> {
        self.device
            .add_port(
                protocol.into(),
                port,
                SocketAddrV4::new(self.local_addr, port),
                0, // permanent lease; the resync schedule refreshes it
                description,
            )
            .map_err(|e| Error::DeviceNotFound(e.to_string()))
    }

    fn list_mapping(&self, index: u32) -> Result<Option<MappingEntry>> {
        match self.device.get_generic_port_mapping_entry(index) {
            Ok(entry) => Ok(Some(MappingEntry {
                external_port: entry.external_port,
                protocol: entry.protocol.into(),
                description: entry.port_mapping_description,
            })),
            Err(igd::GetGenericPortMappingEntryError::SpecifiedArrayIndexInvalid) => Ok(None),
            Err(e) => Err(Error::DeviceNotFound(e.to_string())),
        }
    }

    fn delete_mapping(&self, protocol: Protocol, external_port: u16) -> Result<()> {
        self.device
            .remove_port(protocol.into(), external_port)
            .map_err(|e| Error::DeviceNotFound(e.to_string()))
    }
}

/// The local IPv4 address routed towards the gateway, determined by a
/// connected (but never used) UDP socket. Route-correct on multi-homed
/// hosts where "first interface address" would not be.
fn local_ipv4_towards(gateway_addr: SocketAddrV4) -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(gateway_addr)?;
    match socket.local_addr()? {
        SocketAddr::V4(addr) => Ok(*addr.ip()),
        SocketAddr::V6(_) => Err(Error::Internal(
            "IPv4 socket reported an IPv6 local address".into(),
        )),
    }
}
