//! Privileged command execution for system operations
//!
//! This module provides controlled privilege escalation to execute the
//! external tools portward drives. The tool usually runs as root (it is a
//! system administration helper), in which case commands run directly; when
//! started unprivileged it elevates per invocation:
//!
//! - **Preferred (all modes)**: `run0` when available (systemd v256+, no SUID)
//! - **CLI fallback**: `sudo` for terminal environments
//! - **Non-interactive fallback**: `pkexec` for graphical authentication
//!
//! # Environment Variables
//!
//! - `PORTWARD_ELEVATION_METHOD`: force a specific elevation method
//!   (`sudo`, `run0`, or `pkexec`), e.g. for scripts with sudoers NOPASSWD
//!   rules.
//! - `PORTWARD_TEST_NO_ELEVATION`: bypass elevation entirely (testing only).
//! - `PORTWARD_<BINARY>_COMMAND` (e.g. `PORTWARD_IPTABLES_COMMAND`): replace
//!   a system binary with a stand-in, bypassing elevation. Used by the test
//!   suite to run against a mock filter engine.
//!
//! # Security
//!
//! Only the binaries named by [`SystemBinary`] can be executed, and
//! arguments are passed without shell interpolation.

use std::io;
use std::process::Command;

use crate::core::error::{Error, Result};

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `PORTWARD_ELEVATION_METHOD`
    #[error("Invalid PORTWARD_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The closed set of external tools portward is allowed to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemBinary {
    /// IPv4 packet-filter frontend
    Iptables,
    /// IPv6 packet-filter frontend
    Ip6tables,
    /// SysV service control, used to bounce the intrusion-prevention daemon
    Service,
    /// Hook script interpreter
    Bash,
}

impl SystemBinary {
    pub const fn name(self) -> &'static str {
        match self {
            SystemBinary::Iptables => "iptables",
            SystemBinary::Ip6tables => "ip6tables",
            SystemBinary::Service => "service",
            SystemBinary::Bash => "bash",
        }
    }

    /// Environment variable that replaces this binary with a test stand-in.
    const fn command_override(self) -> &'static str {
        match self {
            SystemBinary::Iptables => "PORTWARD_IPTABLES_COMMAND",
            SystemBinary::Ip6tables => "PORTWARD_IP6TABLES_COMMAND",
            SystemBinary::Service => "PORTWARD_SERVICE_COMMAND",
            SystemBinary::Bash => "PORTWARD_BASH_COMMAND",
        }
    }
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

/// Builds a command for one of the approved system binaries, elevated when
/// necessary.
pub fn command(binary: SystemBinary, args: &[&str]) -> std::result::Result<Command, ExecError> {
    use std::os::fd::AsFd;

    // 1. Per-binary stand-in (test suites point these at mock scripts)
    if let Ok(path) = std::env::var(binary.command_override())
        && !path.is_empty()
    {
        let mut cmd = Command::new(path);
        cmd.args(args);
        return Ok(cmd);
    }

    let program = binary.name();

    // 2. Strict test mode override
    if std::env::var("PORTWARD_TEST_NO_ELEVATION").is_ok() {
        let mut cmd = Command::new(program);
        cmd.args(args);
        return Ok(cmd);
    }

    // 3. Direct root execution (the common case for this tool)
    if nix::unistd::getuid().is_root() {
        let mut cmd = Command::new(program);
        cmd.args(args);
        return Ok(cmd);
    }

    // 4. Explicit elevation method override
    if let Ok(method) = std::env::var("PORTWARD_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if !binary_exists(&method) {
                        return Err(ExecError::MethodNotAvailable(method));
                    }
                    let mut cmd = Command::new(&method);
                    cmd.arg(program).args(args);
                    Ok(cmd)
                }
                _ => Err(ExecError::InvalidMethod(method)),
            };
        }
    }

    // 5. Automatic detection - prefer run0 (modern, no SUID), fall back to
    // sudo on a terminal and pkexec otherwise
    if binary_exists("run0") {
        let mut cmd = Command::new("run0");
        cmd.arg(program).args(args);
        return Ok(cmd);
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);
    if is_atty {
        let mut cmd = Command::new("sudo");
        cmd.arg(program).args(args);
        Ok(cmd)
    } else {
        if !binary_exists("pkexec") {
            return Err(ExecError::PkexecNotFound);
        }
        let mut cmd = Command::new("pkexec");
        cmd.arg(program).args(args);
        Ok(cmd)
    }
}

/// Runs one of the approved binaries to completion, mapping a non-zero exit
/// into a structured [`Error::Filter`].
pub fn run_checked(binary: SystemBinary, args: &[&str]) -> Result<()> {
    let mut cmd = command(binary, args)
        .map_err(|e| Error::Internal(format!("privilege escalation unavailable: {e}")))?;

    let output = cmd.output()?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(Error::Filter {
        message: format!("{} {}", binary.name(), args.join(" ")),
        stderr: (!stderr.is_empty()).then_some(stderr),
        exit_code: output.status.code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ENV_VAR_MUTEX;

    #[test]
    fn test_binary_exists() {
        // sh should exist on all Unix systems
        assert!(binary_exists("sh"));
        assert!(!binary_exists("portward_nonexistent_binary_xyz"));
    }

    #[test]
    fn test_command_override_bypasses_elevation() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("PORTWARD_IPTABLES_COMMAND", "/bin/true");
        }

        let cmd = command(SystemBinary::Iptables, &["-L"]).unwrap();
        assert_eq!(cmd.get_program(), "/bin/true");

        unsafe {
            std::env::remove_var("PORTWARD_IPTABLES_COMMAND");
        }
    }

    #[test]
    fn test_invalid_elevation_method() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::remove_var("PORTWARD_TEST_NO_ELEVATION");
            std::env::set_var("PORTWARD_ELEVATION_METHOD", "invalid_method");
        }

        let result = command(SystemBinary::Iptables, &["-L"]);

        unsafe {
            std::env::remove_var("PORTWARD_ELEVATION_METHOD");
        }

        // Root runs directly and never consults the method override
        if nix::unistd::getuid().is_root() {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(ExecError::InvalidMethod(_))));
        }
    }

    #[test]
    fn test_no_elevation_mode_runs_program_directly() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("PORTWARD_TEST_NO_ELEVATION", "1");
        }

        let cmd = command(SystemBinary::Service, &["fail2ban", "restart"]).unwrap();
        assert_eq!(cmd.get_program(), "service");

        unsafe {
            std::env::remove_var("PORTWARD_TEST_NO_ELEVATION");
        }
    }
}
