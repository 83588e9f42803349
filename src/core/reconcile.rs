//! Reconciliation: rebuild live filter state from the persisted store
//!
//! A reload flushes the packet filter and rebuilds it from scratch so the
//! live state exactly matches the store, for both address families (IPv6 is
//! skipped when the host has no IPv6 stack). The pass is idempotent: two
//! consecutive reloads with no intervening mutation issue the same command
//! sequence.
//!
//! Failures are best-effort by design - a single failing command must not
//! leave the host half-locked - but they are not silent: every failure is
//! collected into the returned [`ReloadOutcome`] for the caller to report
//! as one aggregated error.

use tracing::{info, warn};

use crate::core::error::Result;
use crate::core::filter::{PacketFilter, Policy};
use crate::core::ruleset::{Family, FirewallStore, Protocol};
use crate::core::store::Store;
use crate::core::upnp::{self, Gateway, GatewayDiscovery};

/// What a reconciliation pass did, including every command that failed.
#[derive(Debug, Default)]
pub struct ReloadOutcome {
    /// Accept rules appended from the store.
    pub rules_applied: usize,
    /// Gateway mappings refreshed during the pass.
    pub upnp_synced: usize,
    /// Human-readable descriptions of the commands that failed.
    pub failures: Vec<String>,
}

impl ReloadOutcome {
    fn note(&mut self, result: Result<()>) {
        if let Err(e) = result {
            warn!("{e}");
            self.failures.push(e.to_string());
        }
    }
}

/// Rebuilds the live filter state from `store`.
///
/// `gateway` enables the UPnP portion of the pass: the device's mapping
/// table is cleared first, then a mapping is re-requested for every flagged
/// IPv4 port as its accept rule is appended. Discovery failure here is an
/// implicit use of the gateway and degrades to a logged skip - the filter
/// rebuild must complete regardless.
///
/// If the administrative access port had gone missing from the store it is
/// silently re-added and the store is saved through `store_file`.
pub fn reload(
    store: &mut FirewallStore,
    store_file: &Store,
    filter: &mut impl PacketFilter,
    gateway: Option<&dyn GatewayDiscovery>,
) -> Result<ReloadOutcome> {
    let mut outcome = ReloadOutcome::default();

    let mut families = vec![Family::V4];
    if filter.ipv6_available() {
        families.push(Family::V6);
    } else {
        info!("host has no IPv6 stack, skipping ip6tables");
    }

    // Open up and tear down while rebuilding, keeping existing sessions
    // alive. ACCEPT first so a failure further down cannot lock us out.
    for &family in &families {
        outcome.note(filter.set_input_policy(family, Policy::Accept));
        outcome.note(filter.flush(family));
        outcome.note(filter.accept_established(family));
    }

    // Administrative access must survive every reload, for both families,
    // whether or not the v6 stack is currently programmable.
    if store.ensure_admin_access() {
        info!("administrative port was missing from the store, re-added");
        store_file.save(store)?;
    }

    let gateway = gateway.and_then(|discovery| start_upnp_pass(discovery, &mut outcome));

    for &family in &families {
        for protocol in [Protocol::Tcp, Protocol::Udp] {
            for &port in store.table(family).ports(protocol) {
                outcome.note(filter.accept_port(family, protocol, port));
                outcome.rules_applied += 1;

                if family == Family::V4
                    && store.upnp.ports.contains(protocol, port)
                    && let Some(gw) = gateway.as_deref()
                {
                    let description = upnp::mapping_description(protocol, port);
                    match gw.add_mapping(protocol, port, &description) {
                        Ok(()) => outcome.upnp_synced += 1,
                        Err(e) => {
                            warn!("UPnP mapping for {port}/{protocol} failed: {e}");
                            outcome.failures.push(e.to_string());
                        }
                    }
                }
            }
        }
    }

    for &family in &families {
        outcome.note(filter.accept_loopback(family));
        outcome.note(filter.accept_icmp(family));
        outcome.note(filter.set_input_policy(family, Policy::Drop));
    }

    outcome.note(filter.restart_intrusion_guard());

    info!(
        "reload applied {} rule(s), {} UPnP mapping(s), {} failure(s)",
        outcome.rules_applied,
        outcome.upnp_synced,
        outcome.failures.len()
    );
    Ok(outcome)
}

/// Discovers the gateway and clears its mapping table for a clean slate.
/// Returns `None` (logged skip) when no device answers.
fn start_upnp_pass(
    discovery: &dyn GatewayDiscovery,
    outcome: &mut ReloadOutcome,
) -> Option<Box<dyn Gateway>> {
    match discovery.discover() {
        Ok(gateway) => {
            if let Err(e) = upnp::clear_mappings(gateway.as_ref()) {
                warn!("could not clear gateway mappings: {e}");
                outcome.failures.push(e.to_string());
            }
            Some(gateway)
        }
        Err(e) => {
            warn!("skipping UPnP synchronization: {e}");
            outcome.failures.push(e.to_string());
            None
        }
    }
}

/// Opens everything up: INPUT policy ACCEPT and a full flush for both
/// families. Used by `portward stop`.
pub fn open_everything(filter: &mut impl PacketFilter) -> ReloadOutcome {
    let mut outcome = ReloadOutcome::default();
    let mut families = vec![Family::V4];
    if filter.ipv6_available() {
        families.push(Family::V6);
    }
    for &family in &families {
        outcome.note(filter.set_input_policy(family, Policy::Accept));
        outcome.note(filter.flush(family));
    }
    outcome
}
