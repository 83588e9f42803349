//! iptables/ip6tables implementation of the packet-filter seam
//!
//! Commands are executed through the elevation layer ([`crate::exec`]);
//! every invocation is checked and a non-zero exit is surfaced as a
//! structured error for the reconciler to aggregate.

use tracing::debug;

use crate::core::error::Result;
use crate::core::filter::{PacketFilter, Policy};
use crate::core::ruleset::{Family, Protocol};
use crate::exec::{self, SystemBinary};
use crate::utils;

/// Service that must be bounced after a rebuild so its ban chains re-attach.
const INTRUSION_GUARD: &str = "fail2ban";

/// Production [`PacketFilter`] backed by the iptables frontends.
pub struct IptablesFilter {
    ipv6: bool,
}

impl IptablesFilter {
    /// Detects IPv6 support from the running kernel.
    pub fn new() -> Self {
        Self {
            ipv6: utils::ipv6_stack_available(),
        }
    }

    /// Overrides IPv6 detection. Used by tests and by hosts where the stack
    /// exists but must not be programmed.
    pub fn with_ipv6(ipv6: bool) -> Self {
        Self { ipv6 }
    }

    fn binary(family: Family) -> SystemBinary {
        match family {
            Family::V4 => SystemBinary::Iptables,
            Family::V6 => SystemBinary::Ip6tables,
        }
    }

    fn run(family: Family, args: &[&str]) -> Result<()> {
        debug!("{} {}", Self::binary(family).name(), args.join(" "));
        exec::run_checked(Self::binary(family), args)
    }
}

impl Default for IptablesFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketFilter for IptablesFilter {
    fn ipv6_available(&self) -> bool {
        self.ipv6
    }

    fn set_input_policy(&mut self, family: Family, policy: Policy) -> Result<()> {
        Self::run(family, &["-P", "INPUT", policy.as_str()])
    }

    fn flush(&mut self, family: Family) -> Result<()> {
        Self::run(family, &["-F"])?;
        Self::run(family, &["-X"])
    }

    fn accept_established(&mut self, family: Family) -> Result<()> {
        Self::run(
            family,
            &[
                "-A",
                "INPUT",
                "-m",
                "state",
                "--state",
                "ESTABLISHED",
                "-j",
                "ACCEPT",
            ],
        )
    }

    fn accept_port(&mut self, family: Family, protocol: Protocol, port: u16) -> Result<()> {
        let port = port.to_string();
        Self::run(
            family,
            &[
                "-A",
                "INPUT",
                "-p",
                protocol.as_str(),
                "--dport",
                &port,
                "-j",
                "ACCEPT",
            ],
        )
    }

    fn accept_loopback(&mut self, family: Family) -> Result<()> {
        Self::run(family, &["-A", "INPUT", "-i", "lo", "-j", "ACCEPT"])
    }

    fn accept_icmp(&mut self, family: Family) -> Result<()> {
        let protocol = match family {
            Family::V4 => "icmp",
            Family::V6 => "icmpv6",
        };
        Self::run(family, &["-A", "INPUT", "-p", protocol, "-j", "ACCEPT"])
    }

    fn restart_intrusion_guard(&mut self) -> Result<()> {
        exec::run_checked(SystemBinary::Service, &[INTRUSION_GUARD, "restart"])
    }
}
