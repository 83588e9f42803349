//! Rule store persistence
//!
//! The store is a single pretty-printed JSON document (`firewall.json`) in
//! the config directory. All access goes through [`Store`], which holds an
//! exclusive lock for its whole lifetime so two concurrent invocations
//! cannot interleave a read-mutate-write cycle and lose an update.
//!
//! Every save:
//! 1. copies the previous version to `firewall.json.old`,
//! 2. writes a temp file with restrictive permissions and syncs it,
//! 3. atomically renames it over the target,
//! 4. refreshes the SHA-256 sidecar used to detect corruption.
//!
//! On load the sidecar is verified; a mismatch warns but does not fail, so
//! hand edits to the store remain possible.

use std::fs::File;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::error::{Error, Result};
use crate::core::ruleset::FirewallStore;

const STORE_FILE: &str = "firewall.json";
const BACKUP_FILE: &str = "firewall.json.old";
const TEMP_FILE: &str = "firewall.json.tmp";
const CHECKSUM_FILE: &str = "firewall.json.sha256";
const LOCK_FILE: &str = "firewall.lock";

/// Handle on the store directory. Construction acquires an exclusive lock
/// that is released when the handle is dropped.
pub struct Store {
    dir: PathBuf,
    _lock: Flock<File>,
}

impl Store {
    /// Opens the store directory, blocking until the exclusive lock is
    /// acquired.
    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_with(dir, FlockArg::LockExclusive)
    }

    /// Opens the store directory without waiting; fails with a conflict if
    /// another invocation holds the lock.
    pub fn try_open(dir: &Path) -> Result<Self> {
        Self::open_with(dir, FlockArg::LockExclusiveNonblock)
    }

    fn open_with(dir: &Path, arg: FlockArg) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let lock_file = File::options()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        let lock = Flock::lock(lock_file, arg).map_err(|(_, errno)| {
            if errno == nix::errno::Errno::EWOULDBLOCK {
                Error::Conflict("store is locked by another invocation".into())
            } else {
                Error::Io(errno.into())
            }
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STORE_FILE)
    }

    /// Loads and validates the store document.
    pub fn load(&self) -> Result<FirewallStore> {
        let path = self.path();
        let json = std::fs::read_to_string(&path)?;

        // Verify checksum if present (warns but doesn't fail for manually
        // edited stores)
        if let Ok(expected) = std::fs::read_to_string(self.dir.join(CHECKSUM_FILE)) {
            let actual = checksum(&json);
            if expected.trim() != actual {
                warn!(
                    "store checksum mismatch (expected: {}, got: {})",
                    expected.trim(),
                    actual
                );
            }
        }

        let mut store: FirewallStore = serde_json::from_str(&json)?;
        store.validate()?;
        if store.normalize() {
            warn!("store required normalization (hand edit?); invariants restored");
        }
        Ok(store)
    }

    /// Loads the store, falling back to the default document when none has
    /// been written yet.
    pub fn load_or_default(&self) -> Result<FirewallStore> {
        if self.path().exists() {
            self.load()
        } else {
            debug!("no store document yet, starting from the default");
            Ok(FirewallStore::default())
        }
    }

    /// Persists the store document atomically, keeping the previous version
    /// as a backup copy.
    pub fn save(&self, store: &FirewallStore) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::copy(&path, self.dir.join(BACKUP_FILE))?;
        }

        let json = serde_json::to_string_pretty(store)?;
        let temp_path = self.dir.join(TEMP_FILE);

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            // Restrictive permissions from the start; the document names the
            // host's open ports
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600)
                .open(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&temp_path, &json)?;
        }

        std::fs::rename(temp_path, &path)?;
        std::fs::write(self.dir.join(CHECKSUM_FILE), checksum(&json))?;
        Ok(())
    }
}

fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
