//! Packet-filter engine seam
//!
//! The reconciliation pass drives the OS packet filter through this narrow
//! trait (policy-set, flush, append-rule) so the algorithm can be exercised
//! against a recording mock while production code shells out to
//! iptables/ip6tables.

use crate::core::error::Result;
use crate::core::ruleset::{Family, Protocol};

/// Default chain policy for inbound traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Accept,
    Drop,
}

impl Policy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Policy::Accept => "ACCEPT",
            Policy::Drop => "DROP",
        }
    }
}

/// Abstraction over the packet-filter engine.
///
/// All methods are synchronous and best-effort: the reconciler collects
/// individual failures instead of aborting, so implementations should
/// return a structured error rather than panic.
pub trait PacketFilter {
    /// Whether the host has an IPv6 stack worth programming.
    fn ipv6_available(&self) -> bool;

    /// Sets the default policy of the inbound chain.
    fn set_input_policy(&mut self, family: Family, policy: Policy) -> Result<()>;

    /// Flushes all rules and deletes all custom chains.
    fn flush(&mut self, family: Family) -> Result<()>;

    /// Re-admits already-established connections so existing sessions
    /// survive a rebuild.
    fn accept_established(&mut self, family: Family) -> Result<()>;

    /// Appends an accept rule for one protocol/port.
    fn accept_port(&mut self, family: Family, protocol: Protocol, port: u16) -> Result<()>;

    /// Permits loopback traffic.
    fn accept_loopback(&mut self, family: Family) -> Result<()>;

    /// Permits ICMP (echo, errors, neighbour discovery on v6).
    fn accept_icmp(&mut self, family: Family) -> Result<()>;

    /// Restarts the intrusion-prevention service so it re-attaches its
    /// chains to the rebuilt filter state.
    fn restart_intrusion_guard(&mut self) -> Result<()>;
}
