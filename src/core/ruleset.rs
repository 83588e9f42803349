//! Persisted firewall rule store model
//!
//! This module defines the data structures for the persisted rule store and
//! the bookkeeping that mutates it.
//!
//! # Store Structure
//!
//! A [`FirewallStore`] holds:
//! - Two address-family partitions (`ipv4`, `ipv6`), each a [`PortTable`]
//!   mapping protocol (TCP, UDP) to an ascending, duplicate-free port list
//! - A [`UpnpConfig`] naming the IPv4 ports that should additionally be
//!   forwarded through the local gateway device, plus whether periodic
//!   resynchronization is scheduled
//!
//! # Invariants
//!
//! - Within a (family, protocol) partition no port appears twice and the
//!   list stays sorted ascending after every mutation.
//! - `UPNP.ports[proto]` is a subset of `ipv4[proto]`: closing an IPv4 port
//!   also drops its UPnP registration.
//! - Port 22/TCP ([`ADMIN_PORT`]) is restored to both TCP lists by
//!   [`FirewallStore::ensure_admin_access`] so a reload can never lock out
//!   administrative access.

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// The administrative access port. Reconciliation re-adds it to both TCP
/// lists if it has gone missing.
pub const ADMIN_PORT: u16 = 22;

/// Transport protocol a rule applies to
///
/// `Copy` trait allows efficient passing by value for this small enum.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Protocol {
    /// Transmission Control Protocol
    #[strum(serialize = "TCP")]
    Tcp,
    /// User Datagram Protocol
    #[strum(serialize = "UDP")]
    Udp,
}

impl Protocol {
    /// Returns the lowercase protocol name as passed to the filter engine
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Which concrete protocols an operation applies to.
///
/// `Both` expands to TCP and UDP; the expansion is atomic with respect to
/// the store (either every partition is updated or none is).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum ProtocolSelection {
    #[strum(serialize = "TCP")]
    Tcp,
    #[strum(serialize = "UDP")]
    Udp,
    #[strum(serialize = "Both")]
    Both,
}

impl ProtocolSelection {
    /// The concrete protocols this selection stands for.
    pub const fn protocols(self) -> &'static [Protocol] {
        match self {
            ProtocolSelection::Tcp => &[Protocol::Tcp],
            ProtocolSelection::Udp => &[Protocol::Udp],
            ProtocolSelection::Both => &[Protocol::Tcp, Protocol::Udp],
        }
    }
}

/// Address family a rule partition belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
pub enum Family {
    #[strum(serialize = "ipv4")]
    V4,
    #[strum(serialize = "ipv6")]
    V6,
}

/// Per-protocol ordered, duplicate-free port lists for one address family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortTable {
    #[serde(rename = "TCP", default)]
    pub tcp: Vec<u16>,
    #[serde(rename = "UDP", default)]
    pub udp: Vec<u16>,
}

impl PortTable {
    pub fn ports(&self, protocol: Protocol) -> &[u16] {
        match protocol {
            Protocol::Tcp => &self.tcp,
            Protocol::Udp => &self.udp,
        }
    }

    fn ports_mut(&mut self, protocol: Protocol) -> &mut Vec<u16> {
        match protocol {
            Protocol::Tcp => &mut self.tcp,
            Protocol::Udp => &mut self.udp,
        }
    }

    pub fn contains(&self, protocol: Protocol, port: u16) -> bool {
        self.ports(protocol).binary_search(&port).is_ok()
    }

    /// Inserts `port` keeping the list sorted. Returns `false` if it was
    /// already present.
    pub fn insert(&mut self, protocol: Protocol, port: u16) -> bool {
        let ports = self.ports_mut(protocol);
        match ports.binary_search(&port) {
            Ok(_) => false,
            Err(idx) => {
                ports.insert(idx, port);
                true
            }
        }
    }

    /// Removes `port` if present. Returns whether it was present.
    pub fn remove(&mut self, protocol: Protocol, port: u16) -> bool {
        let ports = self.ports_mut(protocol);
        match ports.binary_search(&port) {
            Ok(idx) => {
                ports.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    /// Restores the sorted, duplicate-free invariant after a hand edit.
    /// Returns whether anything changed.
    fn normalize(&mut self) -> bool {
        let mut changed = false;
        for protocol in [Protocol::Tcp, Protocol::Udp] {
            let ports = self.ports_mut(protocol);
            let before = ports.len();
            let sorted = ports.is_sorted();
            ports.sort_unstable();
            ports.dedup();
            changed |= !sorted || ports.len() != before;
        }
        changed
    }

    fn validate(&self, context: &str) -> Result<()> {
        for protocol in [Protocol::Tcp, Protocol::Udp] {
            if self.ports(protocol).contains(&0) {
                return Err(Error::invalid(
                    "store",
                    format!("{context}.{protocol} contains port 0 (valid range is 1-65535)"),
                ));
            }
        }
        Ok(())
    }
}

/// IPv4 ports that should additionally be mapped through the gateway device,
/// and whether a periodic resynchronization task is scheduled
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpnpConfig {
    #[serde(default)]
    pub ports: PortTable,
    #[serde(default)]
    pub cron: bool,
}

/// The whole persisted rule document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallStore {
    #[serde(default)]
    pub ipv4: PortTable,
    #[serde(default)]
    pub ipv6: PortTable,
    #[serde(rename = "UPNP", default)]
    pub upnp: UpnpConfig,
}

impl Default for FirewallStore {
    /// A fresh store opens nothing but administrative access.
    fn default() -> Self {
        Self {
            ipv4: PortTable {
                tcp: vec![ADMIN_PORT],
                udp: Vec::new(),
            },
            ipv6: PortTable {
                tcp: vec![ADMIN_PORT],
                udp: Vec::new(),
            },
            upnp: UpnpConfig::default(),
        }
    }
}

impl FirewallStore {
    pub fn table(&self, family: Family) -> &PortTable {
        match family {
            Family::V4 => &self.ipv4,
            Family::V6 => &self.ipv6,
        }
    }

    fn table_mut(&mut self, family: Family) -> &mut PortTable {
        match family {
            Family::V4 => &mut self.ipv4,
            Family::V6 => &mut self.ipv6,
        }
    }

    /// Opens `port` for `protocol` in the partition selected by `family`.
    ///
    /// With `upnp` set on an IPv4 call the port is also registered for
    /// gateway mapping. Layering UPnP onto an already-open port is not a
    /// conflict: only the mapping registration is added in that case. UPnP
    /// on an IPv6 call is skipped (the gateway protocol has no IPv6
    /// equivalent here).
    pub fn open_port(
        &mut self,
        protocol: Protocol,
        port: u16,
        family: Family,
        upnp: bool,
    ) -> Result<()> {
        let upnp = upnp && family == Family::V4;
        if self.table_mut(family).insert(protocol, port) {
            if upnp {
                self.upnp.ports.insert(protocol, port);
            }
            return Ok(());
        }
        if upnp && self.upnp.ports.insert(protocol, port) {
            return Ok(());
        }
        Err(Error::Conflict(format!("port {port}/{protocol} already open")))
    }

    /// Closes `port` for `protocol` in the partition selected by `family`.
    ///
    /// With `upnp` set on an IPv4 call only the mapping registration is
    /// dropped; without it the port is removed from the rule list and from
    /// the mapping registrations, keeping the subset invariant. IPv6
    /// removal never touches the mapping registrations.
    pub fn close_port(
        &mut self,
        protocol: Protocol,
        port: u16,
        family: Family,
        upnp: bool,
    ) -> Result<()> {
        match family {
            Family::V4 if upnp => {
                if self.upnp.ports.remove(protocol, port) {
                    Ok(())
                } else {
                    Err(Error::Conflict(format!(
                        "UPnP mapping for port {port}/{protocol} already removed"
                    )))
                }
            }
            Family::V4 => {
                self.upnp.ports.remove(protocol, port);
                if self.ipv4.remove(protocol, port) {
                    Ok(())
                } else {
                    Err(Error::Conflict(format!(
                        "port {port}/{protocol} already closed"
                    )))
                }
            }
            Family::V6 => {
                if self.ipv6.remove(protocol, port) {
                    Ok(())
                } else {
                    Err(Error::Conflict(format!(
                        "port {port}/{protocol} already closed"
                    )))
                }
            }
        }
    }

    /// Re-adds [`ADMIN_PORT`] to both TCP lists if missing.
    /// Returns whether the store was modified.
    pub fn ensure_admin_access(&mut self) -> bool {
        let v4 = self.ipv4.insert(Protocol::Tcp, ADMIN_PORT);
        let v6 = self.ipv6.insert(Protocol::Tcp, ADMIN_PORT);
        v4 || v6
    }

    /// Fails fast on values the model cannot represent (out-of-range ports).
    pub fn validate(&self) -> Result<()> {
        self.ipv4.validate("ipv4")?;
        self.ipv6.validate("ipv6")?;
        self.upnp.ports.validate("UPNP.ports")?;
        Ok(())
    }

    /// Restores the list invariants after a hand edit: sorted duplicate-free
    /// partitions, and mapping registrations limited to open IPv4 ports.
    /// Returns whether anything changed.
    pub fn normalize(&mut self) -> bool {
        let mut changed = self.ipv4.normalize();
        changed |= self.ipv6.normalize();
        changed |= self.upnp.ports.normalize();
        for protocol in [Protocol::Tcp, Protocol::Udp] {
            let orphans: Vec<u16> = self
                .upnp
                .ports
                .ports(protocol)
                .iter()
                .copied()
                .filter(|&p| !self.ipv4.contains(protocol, p))
                .collect();
            for port in orphans {
                self.upnp.ports.remove(protocol, port);
                changed = true;
            }
        }
        changed
    }
}
