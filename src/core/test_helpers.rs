//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Mutex;

use crate::core::error::{Error, Result};
use crate::core::filter::{PacketFilter, Policy};
use crate::core::ruleset::{Family, Protocol};
use crate::core::upnp::{Gateway, GatewayDiscovery, MappingEntry};

/// Mutex for tests that need exclusive access to environment variables.
///
/// Environment variables are process-global while tests run on multiple
/// threads; hold this guard around any test that sets or removes one.
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// A [`PacketFilter`] that records every operation as a readable string
/// instead of touching the host.
pub struct MockFilter {
    pub ops: Vec<String>,
    ipv6: bool,
    fail_on: Option<String>,
}

impl MockFilter {
    pub fn new(ipv6: bool) -> Self {
        Self {
            ops: Vec::new(),
            ipv6,
            fail_on: None,
        }
    }

    /// Makes the named operation fail while still being recorded.
    pub fn failing_on(mut self, op: &str) -> Self {
        self.fail_on = Some(op.to_string());
        self
    }

    fn record(&mut self, op: String) -> Result<()> {
        let failing = self.fail_on.as_deref() == Some(op.as_str());
        self.ops.push(op.clone());
        if failing {
            Err(Error::Filter {
                message: op,
                stderr: None,
                exit_code: Some(1),
            })
        } else {
            Ok(())
        }
    }
}

impl PacketFilter for MockFilter {
    fn ipv6_available(&self) -> bool {
        self.ipv6
    }

    fn set_input_policy(&mut self, family: Family, policy: Policy) -> Result<()> {
        self.record(format!("{family} policy {}", policy.as_str()))
    }

    fn flush(&mut self, family: Family) -> Result<()> {
        self.record(format!("{family} flush"))
    }

    fn accept_established(&mut self, family: Family) -> Result<()> {
        self.record(format!("{family} accept established"))
    }

    fn accept_port(&mut self, family: Family, protocol: Protocol, port: u16) -> Result<()> {
        self.record(format!("{family} accept {} {port}", protocol.as_str()))
    }

    fn accept_loopback(&mut self, family: Family) -> Result<()> {
        self.record(format!("{family} accept loopback"))
    }

    fn accept_icmp(&mut self, family: Family) -> Result<()> {
        self.record(format!("{family} accept icmp"))
    }

    fn restart_intrusion_guard(&mut self) -> Result<()> {
        self.record("restart intrusion guard".to_string())
    }
}

/// A [`Gateway`] holding its mapping table in memory.
pub struct MockGateway {
    mappings: Rc<RefCell<Vec<MappingEntry>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::with_mappings(Vec::new())
    }

    pub fn with_mappings(mappings: Vec<MappingEntry>) -> Self {
        Self {
            mappings: Rc::new(RefCell::new(mappings)),
        }
    }

    fn shared(mappings: Rc<RefCell<Vec<MappingEntry>>>) -> Self {
        Self { mappings }
    }

    pub fn mappings(&self) -> Vec<MappingEntry> {
        self.mappings.borrow().clone()
    }
}

impl Gateway for MockGateway {
    fn add_mapping(&self, protocol: Protocol, port: u16, description: &str) -> Result<()> {
        self.mappings.borrow_mut().push(MappingEntry {
            external_port: port,
            protocol,
            description: description.to_string(),
        });
        Ok(())
    }

    fn list_mapping(&self, index: u32) -> Result<Option<MappingEntry>> {
        Ok(self.mappings.borrow().get(index as usize).cloned())
    }

    fn delete_mapping(&self, protocol: Protocol, external_port: u16) -> Result<()> {
        let mut mappings = self.mappings.borrow_mut();
        let before = mappings.len();
        mappings.retain(|m| !(m.protocol == protocol && m.external_port == external_port));
        if mappings.len() == before {
            Err(Error::DeviceNotFound(format!(
                "no mapping for {external_port}/{protocol}"
            )))
        } else {
            Ok(())
        }
    }
}

/// A [`GatewayDiscovery`] that either hands out views of one shared
/// [`MockGateway`] or reports that no device answered.
pub struct MockDiscovery {
    mappings: Rc<RefCell<Vec<MappingEntry>>>,
    available: bool,
}

impl MockDiscovery {
    pub fn available() -> Self {
        Self {
            mappings: Rc::new(RefCell::new(Vec::new())),
            available: true,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            mappings: Rc::new(RefCell::new(Vec::new())),
            available: false,
        }
    }

    /// The device's mapping table, shared with every discovered handle.
    pub fn mappings(&self) -> Vec<MappingEntry> {
        self.mappings.borrow().clone()
    }
}

impl GatewayDiscovery for MockDiscovery {
    fn discover(&self) -> Result<Box<dyn Gateway>> {
        if self.available {
            Ok(Box::new(MockGateway::shared(Rc::clone(&self.mappings))))
        } else {
            Err(Error::DeviceNotFound("discovery timed out".into()))
        }
    }
}
