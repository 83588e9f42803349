//! Core firewall management functionality
//!
//! This module contains the core types and logic for keeping the persisted
//! rule store and the live packet-filter state in agreement. It provides:
//!
//! - [`ruleset`]: the persisted store model and its mutation bookkeeping
//! - [`store`]: locked, atomic persistence with backup and checksum
//! - [`filter`]: the narrow packet-filter seam the reconciler drives
//! - [`iptables`]: the iptables/ip6tables implementation of that seam
//! - [`reconcile`]: the flush-and-rebuild reconciliation pass
//! - [`upnp`]: the gateway-device collaborator for port mappings
//! - [`schedule`]: periodic resynchronization registration
//! - [`ops`]: one function per CLI operation
//! - [`error`]: error types for firewall operations

pub mod error;
pub mod filter;
pub mod iptables;
pub mod ops;
pub mod reconcile;
pub mod ruleset;
pub mod schedule;
pub mod store;
pub mod upnp;

#[cfg(test)]
pub mod test_helpers;
