//! Input validation and sanitization
//!
//! Centralized validation for user inputs, run before any state is touched.

use crate::core::error::{Error, Result};

/// Validates a port number given as an arbitrary integer.
///
/// The CLI accepts a wide integer so an out-of-range value reaches this
/// check (and produces the documented error) instead of dying in argument
/// parsing.
pub fn validate_port(port: u32) -> Result<u16> {
    match u16::try_from(port) {
        Ok(p) if p >= 1 => Ok(p),
        _ => Err(Error::invalid(
            "port",
            format!("not between 1 and 65535: {port}"),
        )),
    }
}

/// Validates a hook action name for filesystem safety.
///
/// Constraints:
/// - Alphanumeric, underscores, and hyphens only: prevents shell injection
///   and cross-platform filename issues.
/// - Max 64 chars: keeps paths within system limits while allowing
///   descriptive names.
/// - Rejects "." and "..": path traversal protection.
pub fn validate_action_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("action", "name cannot be empty"));
    }

    if name.len() > 64 {
        return Err(Error::invalid("action", "name too long (max 64 chars)"));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::invalid(
            "action",
            "name contains invalid characters (use only a-z, 0-9, _, -)",
        ));
    }

    if name == "." || name == ".." {
        return Err(Error::invalid("action", "invalid name"));
    }

    Ok(())
}
