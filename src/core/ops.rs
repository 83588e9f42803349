//! The operations behind the CLI surface
//!
//! Each function is one complete invocation: acquire the store lock, apply
//! the mutation, persist, and reconcile the live filter state so the change
//! takes effect before returning. The lock is held for the whole cycle.

use std::path::Path;

use crate::core::error::Result;
use crate::core::filter::PacketFilter;
use crate::core::reconcile::{self, ReloadOutcome};
use crate::core::ruleset::{Family, FirewallStore, ProtocolSelection};
use crate::core::schedule;
use crate::core::store::Store;
use crate::core::upnp::GatewayDiscovery;

/// Opens `port` and reconciles. With `Both` the expansion is atomic: a
/// conflict on either protocol leaves the store untouched.
pub fn allow(
    config_dir: &Path,
    selection: ProtocolSelection,
    port: u16,
    family: Family,
    upnp: bool,
    filter: &mut impl PacketFilter,
    discovery: Option<&dyn GatewayDiscovery>,
) -> Result<ReloadOutcome> {
    let store_file = Store::open(config_dir)?;
    let mut store = store_file.load_or_default()?;

    for &protocol in selection.protocols() {
        store.open_port(protocol, port, family, upnp)?;
    }
    store_file.save(&store)?;

    reconcile::reload(
        &mut store,
        &store_file,
        filter,
        if upnp { discovery } else { None },
    )
}

/// Closes `port` and reconciles. Mirror of [`allow`].
pub fn disallow(
    config_dir: &Path,
    selection: ProtocolSelection,
    port: u16,
    family: Family,
    upnp: bool,
    filter: &mut impl PacketFilter,
    discovery: Option<&dyn GatewayDiscovery>,
) -> Result<ReloadOutcome> {
    let store_file = Store::open(config_dir)?;
    let mut store = store_file.load_or_default()?;

    for &protocol in selection.protocols() {
        store.close_port(protocol, port, family, upnp)?;
    }
    store_file.save(&store)?;

    reconcile::reload(
        &mut store,
        &store_file,
        filter,
        if upnp { discovery } else { None },
    )
}

/// Reconciles the live filter state with the store as-is.
pub fn reload(
    config_dir: &Path,
    filter: &mut impl PacketFilter,
    discovery: Option<&dyn GatewayDiscovery>,
) -> Result<ReloadOutcome> {
    let store_file = Store::open(config_dir)?;
    let mut store = store_file.load_or_default()?;
    reconcile::reload(&mut store, &store_file, filter, discovery)
}

/// Returns the current store document for display.
pub fn list(config_dir: &Path) -> Result<FirewallStore> {
    let store_file = Store::open(config_dir)?;
    store_file.load_or_default()
}

/// Opens everything up and drops the resync schedule if one is installed.
pub fn stop(
    config_dir: &Path,
    cron_file: &Path,
    filter: &mut impl PacketFilter,
) -> Result<ReloadOutcome> {
    let outcome = reconcile::open_everything(filter);
    if cron_file.exists() {
        schedule::remove(config_dir, cron_file)?;
    }
    Ok(outcome)
}
