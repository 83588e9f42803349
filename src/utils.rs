//! Utility functions for directory management and host facts
//!
//! portward keeps its state at fixed system paths (it is a host-wide
//! administration tool, not a per-user application). Every path can be
//! overridden through an environment variable so the test suite can run
//! against scratch directories:
//!
//! - Config: `/etc/portward/` (`PORTWARD_CONFIG_DIR`) - the rule store
//! - State: `/var/lib/portward/` (`PORTWARD_STATE_DIR`) - logs, audit trail
//! - Hooks: `/usr/share/portward/hooks/` (`PORTWARD_HOOKS_DIR`)
//! - Cron entry: `/etc/cron.d/portward-firewall` (`PORTWARD_CRON_FILE`)

use std::path::{Path, PathBuf};

fn dir_from_env(var: &str, default: &str) -> PathBuf {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(default), PathBuf::from)
}

/// Directory holding the persisted rule store.
pub fn config_dir() -> PathBuf {
    dir_from_env("PORTWARD_CONFIG_DIR", "/etc/portward")
}

/// Directory holding runtime state (log file, audit trail).
pub fn state_dir() -> PathBuf {
    dir_from_env("PORTWARD_STATE_DIR", "/var/lib/portward")
}

/// Directory holding extension hook scripts, one subdirectory per action.
pub fn hooks_dir() -> PathBuf {
    dir_from_env("PORTWARD_HOOKS_DIR", "/usr/share/portward/hooks")
}

/// The cron entry that re-runs UPnP resynchronization periodically.
pub fn cron_file() -> PathBuf {
    dir_from_env("PORTWARD_CRON_FILE", "/etc/cron.d/portward-firewall")
}

/// Creates the config and state directories if they do not exist.
pub fn ensure_dirs() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o755);
        builder.recursive(true);
        builder.create(config_dir())?;
        builder.create(state_dir())?;
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(config_dir())?;
        std::fs::create_dir_all(state_dir())?;
    }

    Ok(())
}

/// Whether the host kernel exposes an IPv6 stack.
pub fn ipv6_stack_available() -> bool {
    Path::new("/proc/net/if_inet6").exists()
}
