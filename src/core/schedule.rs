//! Periodic UPnP resynchronization registration
//!
//! Gateway mappings on consumer routers are best treated as leases: the
//! device may forget them on reboot or expiry. Installing the schedule drops
//! a cron entry that re-runs `reload --upnp` at a fixed interval, and
//! records the fact in the store's `cron` flag so `upnp check` can answer
//! without touching the filesystem entry.

use std::path::Path;

use tracing::info;

use crate::core::error::{Error, Result};
use crate::core::store::Store;

/// Every 50 minutes, offset from the hour so it does not pile onto other
/// on-the-hour jobs.
const CRON_LINE: &str = "*/50 * * * * root portward reload --upnp >/dev/null 2>&1\n";

/// Installs the periodic resynchronization task and records it in the store.
pub fn install(config_dir: &Path, cron_file: &Path) -> Result<()> {
    let store_file = Store::open(config_dir)?;
    let mut store = store_file.load_or_default()?;

    std::fs::write(cron_file, CRON_LINE)?;
    store.upnp.cron = true;
    store_file.save(&store)?;

    info!("UPnP resynchronization scheduled ({})", cron_file.display());
    Ok(())
}

/// Removes the periodic resynchronization task.
///
/// Fails with [`Error::NotConfigured`] - leaving the store untouched - when
/// the task was never installed.
pub fn remove(config_dir: &Path, cron_file: &Path) -> Result<()> {
    let store_file = Store::open(config_dir)?;
    let mut store = store_file.load_or_default()?;

    if !cron_file.exists() {
        return Err(Error::NotConfigured(
            "UPnP resynchronization is not installed".into(),
        ));
    }
    std::fs::remove_file(cron_file)?;

    store.upnp.cron = false;
    store_file.save(&store)?;

    info!("UPnP resynchronization unscheduled");
    Ok(())
}

/// Reports whether periodic resynchronization is active.
///
/// Fails with [`Error::NotConfigured`] when it is not, mirroring the error
/// surface of [`remove`].
pub fn check(config_dir: &Path) -> Result<()> {
    let store_file = Store::open(config_dir)?;
    let store = store_file.load_or_default()?;
    if store.upnp.cron {
        Ok(())
    } else {
        Err(Error::NotConfigured(
            "UPnP resynchronization is not active".into(),
        ))
    }
}
